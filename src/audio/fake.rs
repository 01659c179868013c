// Scripted native player for registry tests
use parking_lot::Mutex;
use std::sync::Arc;

use super::player::{NativePlayer, PlayerEvent, PlayerFactory, PlayerListener};
use crate::error::{Result, SoundError};
use crate::resolver::ResolvedSource;
use crate::route::StreamRoute;

#[derive(Debug, Default)]
pub struct FakeState {
    pub source: Option<ResolvedSource>,
    pub route: Option<StreamRoute>,
    pub playing: bool,
    pub looping: bool,
    pub released: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub left: f32,
    pub right: f32,
    pub starts: usize,
}

/// Test-side view of one player the factory handed out
#[derive(Clone)]
pub struct FakeProbe {
    pub state: Arc<Mutex<FakeState>>,
    listener: PlayerListener,
}

impl FakeProbe {
    /// Play on for `ms`, stopping short of the end
    pub fn advance(&self, ms: u64) {
        let mut state = self.state.lock();
        if state.playing {
            state.position_ms = (state.position_ms + ms).min(state.duration_ms);
        }
    }

    /// Reach end of media the way a native player does
    pub fn reach_end(&self) {
        let completed = {
            let mut state = self.state.lock();
            if state.released || !state.playing {
                return;
            }
            if state.looping {
                state.position_ms = 0;
                false
            } else {
                state.playing = false;
                state.position_ms = state.duration_ms;
                true
            }
        };
        if completed {
            (self.listener)(PlayerEvent::Completed);
        }
    }

    pub fn fail(&self, message: &str) {
        {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            state.playing = false;
        }
        (self.listener)(PlayerEvent::Error(message.to_string()));
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&FakeState) -> T) -> T {
        f(&*self.state.lock())
    }
}

pub struct FakePlayer {
    state: Arc<Mutex<FakeState>>,
}

impl NativePlayer for FakePlayer {
    fn start(&mut self) {
        let mut state = self.state.lock();
        if state.position_ms >= state.duration_ms {
            state.position_ms = 0;
        }
        state.playing = true;
        state.starts += 1;
    }

    fn pause(&mut self) {
        self.state.lock().playing = false;
    }

    fn seek_to(&mut self, position_ms: u64) {
        let mut state = self.state.lock();
        state.position_ms = position_ms.min(state.duration_ms);
    }

    fn set_volume(&mut self, left: f32, right: f32) {
        let mut state = self.state.lock();
        state.left = left;
        state.right = right;
    }

    fn set_looping(&mut self, looping: bool) {
        self.state.lock().looping = looping;
    }

    fn is_looping(&self) -> bool {
        self.state.lock().looping
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn position_ms(&self) -> u64 {
        self.state.lock().position_ms
    }

    fn duration_ms(&self) -> u64 {
        self.state.lock().duration_ms
    }

    fn channels(&self) -> u16 {
        2
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.playing = false;
        state.released = true;
    }
}

/// Hands out `FakePlayer`s and keeps a probe for each.
///
/// Sources whose file name contains "corrupt" fail with a load error.
pub struct FakeFactory {
    pub duration_ms: u64,
    pub probes: Arc<Mutex<Vec<FakeProbe>>>,
}

impl FakeFactory {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            probes: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl PlayerFactory for FakeFactory {
    type Player = FakePlayer;

    fn open(
        &self,
        source: &ResolvedSource,
        route: StreamRoute,
        listener: PlayerListener,
    ) -> Result<FakePlayer> {
        let corrupt = source
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().contains("corrupt"))
            .unwrap_or(false);
        if corrupt {
            return Err(SoundError::Load(format!("{:?}", source.path())));
        }

        let state = Arc::new(Mutex::new(FakeState {
            source: Some(source.clone()),
            route: Some(route),
            duration_ms: self.duration_ms,
            left: 1.0,
            right: 1.0,
            ..FakeState::default()
        }));
        self.probes.lock().push(FakeProbe {
            state: state.clone(),
            listener,
        });
        Ok(FakePlayer { state })
    }
}
