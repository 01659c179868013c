// Keyed registry of native audio handles
//
// Every bridge operation lands here. Unknown keys are a normal condition:
// everything except `prepare` and `play` quietly does nothing for them.
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::audio::player::{NativePlayer, PlayerEvent, PlayerFactory, PlayerListener};
use crate::error::Result;
use crate::resolver::{ResolvedSource, SourceResolver};
use crate::route::StreamRoute;

/// Caller-assigned handle identifier
pub type HandleKey = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HandleState {
    Created,
    Prepared,
    Playing,
    Paused,
    Stopped,
    Released,
}

/// How a `play` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Reached end of media with looping off
    Completed,
    /// No such handle, or the native player reported an error
    Failed,
}

impl PlayOutcome {
    pub fn success(self) -> bool {
        self == PlayOutcome::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedInfo {
    /// Seconds
    pub duration: f64,
    pub channels: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTime {
    pub position_seconds: f64,
    pub is_playing: bool,
}

impl CurrentTime {
    /// Reported for keys with no live handle
    pub const ABSENT: CurrentTime = CurrentTime {
        position_seconds: -1.0,
        is_playing: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Pending,
    Done(PlayOutcome),
    /// Released, superseded by a later `play`, or never armed
    Cancelled,
}

enum CompletionInner {
    Ready(Option<PlayOutcome>),
    Waiting(oneshot::Receiver<PlayOutcome>),
}

/// Single-fire result of one `play` call.
///
/// Resolves to `None` when no callback will ever come: the handle was
/// released, a later `play` re-armed the handle, or the handle was already
/// playing when this call was made.
pub struct PlayCompletion {
    inner: CompletionInner,
}

impl PlayCompletion {
    fn ready(outcome: Option<PlayOutcome>) -> Self {
        Self {
            inner: CompletionInner::Ready(outcome),
        }
    }

    fn waiting(rx: oneshot::Receiver<PlayOutcome>) -> Self {
        Self {
            inner: CompletionInner::Waiting(rx),
        }
    }

    pub async fn wait(self) -> Option<PlayOutcome> {
        match self.inner {
            CompletionInner::Ready(outcome) => outcome,
            CompletionInner::Waiting(rx) => rx.await.ok(),
        }
    }

    /// Blocking variant of `wait`. Must not be called from inside a tokio runtime.
    pub fn blocking_wait(self) -> Option<PlayOutcome> {
        match self.inner {
            CompletionInner::Ready(outcome) => outcome,
            CompletionInner::Waiting(rx) => rx.blocking_recv().ok(),
        }
    }

    /// Non-blocking check
    pub fn status(&mut self) -> CompletionStatus {
        if let CompletionInner::Waiting(rx) = &mut self.inner {
            match rx.try_recv() {
                Ok(outcome) => self.inner = CompletionInner::Ready(Some(outcome)),
                Err(oneshot::error::TryRecvError::Empty) => return CompletionStatus::Pending,
                Err(oneshot::error::TryRecvError::Closed) => self.inner = CompletionInner::Ready(None),
            }
        }
        match self.inner {
            CompletionInner::Ready(Some(outcome)) => CompletionStatus::Done(outcome),
            _ => CompletionStatus::Cancelled,
        }
    }
}

// Sender side of the completion armed by the most recent `play`
type CompletionSlot = Arc<Mutex<Option<oneshot::Sender<PlayOutcome>>>>;

pub struct AudioHandle<P> {
    key: HandleKey,
    source: ResolvedSource,
    route: StreamRoute,
    state: HandleState,
    looping: bool,
    volume: (f32, f32),
    player: P,
    completion: CompletionSlot,
}

impl<P: NativePlayer> AudioHandle<P> {
    pub fn key(&self) -> HandleKey {
        self.key
    }

    pub fn source(&self) -> &ResolvedSource {
        &self.source
    }

    pub fn route(&self) -> StreamRoute {
        self.route
    }

    /// A handle left `Playing` whose player has since ended or failed
    /// reports `Stopped`.
    pub fn state(&self) -> HandleState {
        if self.state == HandleState::Playing && !self.player.is_playing() {
            HandleState::Stopped
        } else {
            self.state
        }
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    /// (left, right)
    pub fn volume(&self) -> (f32, f32) {
        self.volume
    }

    pub fn duration_ms(&self) -> u64 {
        self.player.duration_ms()
    }

    pub fn position_ms(&self) -> u64 {
        self.player.position_ms()
    }

    fn dispose(mut self) {
        // Disarm first so the playback thread can't complete after release
        self.completion.lock().take();
        self.player.release();
        self.state = HandleState::Released;
        tracing::debug!("Released handle {} ({:?})", self.key, self.state);
    }
}

pub struct AudioHandleRegistry<F: PlayerFactory> {
    factory: F,
    resolver: SourceResolver,
    handles: HashMap<HandleKey, AudioHandle<F::Player>>,
}

impl<F: PlayerFactory> AudioHandleRegistry<F> {
    pub fn new(factory: F, resolver: SourceResolver) -> Self {
        Self {
            factory,
            resolver,
            handles: HashMap::new(),
        }
    }

    /// Load `source` under `key`, bound to `route`.
    ///
    /// A key that is still live is overwritten; the displaced handle is
    /// released rather than leaked. On error nothing is registered.
    pub fn prepare(&mut self, source: &str, key: HandleKey, route: StreamRoute) -> Result<PreparedInfo> {
        let resolved = self.resolver.resolve(source).map_err(|e| {
            tracing::warn!("prepare({}): {}", key, e);
            e
        })?;

        let completion: CompletionSlot = Arc::new(Mutex::new(None));
        let player = self
            .factory
            .open(&resolved, route, completion_listener(key, completion.clone()))
            .map_err(|e| {
                tracing::warn!("prepare({}): {}", key, e);
                e
            })?;

        let mut handle = AudioHandle {
            key,
            source: resolved,
            route,
            state: HandleState::Created,
            looping: false,
            volume: (1.0, 1.0),
            player,
            completion,
        };
        let info = PreparedInfo {
            duration: handle.player.duration_ms() as f64 * 0.001,
            channels: handle.player.channels(),
        };
        handle.state = HandleState::Prepared;

        tracing::info!(
            "Prepared handle {} from {:?} on {:?} ({:.3}s)",
            key,
            handle.source.path(),
            route,
            info.duration
        );

        if let Some(previous) = self.handles.insert(key, handle) {
            tracing::warn!("Handle {} was still live, releasing the old player", key);
            previous.dispose();
        }

        Ok(info)
    }

    /// Start playback. Never blocks; the outcome arrives through the
    /// returned completion.
    ///
    /// Calling `play` on a handle that is already playing changes nothing:
    /// the completion from the earlier call stays armed and this one
    /// resolves to `None`.
    pub fn play(&mut self, key: HandleKey) -> PlayCompletion {
        let Some(handle) = self.handles.get_mut(&key) else {
            tracing::debug!("play({}): no such handle", key);
            return PlayCompletion::ready(Some(PlayOutcome::Failed));
        };

        if handle.player.is_playing() {
            tracing::debug!("play({}): already playing", key);
            return PlayCompletion::ready(None);
        }

        let (tx, rx) = oneshot::channel();
        // Replacing the sender cancels any earlier completion for this handle
        *handle.completion.lock() = Some(tx);
        handle.player.start();
        handle.state = HandleState::Playing;

        PlayCompletion::waiting(rx)
    }

    pub fn pause(&mut self, key: HandleKey) {
        if let Some(handle) = self.playing_handle(key) {
            handle.player.pause();
            handle.state = HandleState::Paused;
        }
    }

    pub fn stop(&mut self, key: HandleKey) {
        if let Some(handle) = self.playing_handle(key) {
            handle.player.pause();
            handle.player.seek_to(0);
            handle.state = HandleState::Stopped;
        }
    }

    /// Free the handle's native resources. A pending completion never fires.
    pub fn release(&mut self, key: HandleKey) {
        if let Some(handle) = self.handles.remove(&key) {
            handle.dispose();
        }
    }

    pub fn release_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.dispose();
        }
    }

    pub fn set_volume(&mut self, key: HandleKey, left: f32, right: f32) {
        if let Some(handle) = self.handles.get_mut(&key) {
            let left = clamp_gain(left);
            let right = clamp_gain(right);
            handle.volume = (left, right);
            handle.player.set_volume(left, right);
        }
    }

    pub fn set_looping(&mut self, key: HandleKey, looping: bool) {
        if let Some(handle) = self.handles.get_mut(&key) {
            handle.looping = looping;
            handle.player.set_looping(looping);
        }
    }

    /// Seek to `seconds`, rounded to the nearest millisecond
    pub fn set_current_time(&mut self, key: HandleKey, seconds: f64) {
        if let Some(handle) = self.handles.get_mut(&key) {
            handle.player.seek_to(seconds_to_ms(seconds));
        }
    }

    pub fn get_current_time(&self, key: HandleKey) -> CurrentTime {
        match self.handles.get(&key) {
            Some(handle) => CurrentTime {
                position_seconds: handle.player.position_ms() as f64 * 0.001,
                is_playing: handle.player.is_playing(),
            },
            None => CurrentTime::ABSENT,
        }
    }

    pub fn handle(&self, key: HandleKey) -> Option<&AudioHandle<F::Player>> {
        self.handles.get(&key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn playing_handle(&mut self, key: HandleKey) -> Option<&mut AudioHandle<F::Player>> {
        self.handles
            .get_mut(&key)
            .filter(|handle| handle.player.is_playing())
    }
}

impl<F: PlayerFactory> Drop for AudioHandleRegistry<F> {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Turns player events into the armed completion, at most once per `play`
fn completion_listener(key: HandleKey, slot: CompletionSlot) -> PlayerListener {
    Arc::new(move |event| {
        let outcome = match event {
            PlayerEvent::Completed => PlayOutcome::Completed,
            PlayerEvent::Error(message) => {
                tracing::warn!("Handle {} playback error: {}", key, message);
                PlayOutcome::Failed
            }
        };
        if let Some(tx) = slot.lock().take() {
            let _ = tx.send(outcome);
        }
    })
}

fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, 1.0)
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * 1000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::FakeFactory;
    use crate::error::SoundError;
    use std::fs;
    use tempfile::TempDir;

    const DURATION_MS: u64 = 3000;

    struct Fixture {
        dir: TempDir,
        registry: AudioHandleRegistry<FakeFactory>,
        probes: Arc<Mutex<Vec<crate::audio::fake::FakeProbe>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("tone.wav"), b"RIFF").unwrap();
            fs::write(dir.path().join("corrupt.wav"), b"????").unwrap();
            let bundle = dir.path().join("raw");
            fs::create_dir(&bundle).unwrap();
            fs::write(bundle.join("ding.ogg"), b"OggS").unwrap();

            let factory = FakeFactory::new(DURATION_MS);
            let probes = factory.probes.clone();
            let registry = AudioHandleRegistry::new(factory, SourceResolver::new(Some(bundle)));
            Self { dir, registry, probes }
        }

        fn path(&self, name: &str) -> String {
            self.dir.path().join(name).to_string_lossy().to_string()
        }

        fn prepared(key: HandleKey) -> Self {
            let mut fixture = Self::new();
            let tone = fixture.path("tone.wav");
            fixture.registry.prepare(&tone, key, StreamRoute::Music).unwrap();
            fixture
        }

        fn probe(&self, index: usize) -> crate::audio::fake::FakeProbe {
            self.probes.lock()[index].clone()
        }
    }

    #[test]
    fn test_prepare_reports_duration_and_starts_at_zero() {
        let mut f = Fixture::new();
        let tone = f.path("tone.wav");
        let info = f.registry.prepare(&tone, 1, StreamRoute::Alarm).unwrap();

        assert_eq!(info, PreparedInfo { duration: 3.0, channels: 2 });
        assert_eq!(
            f.registry.get_current_time(1),
            CurrentTime { position_seconds: 0.0, is_playing: false }
        );

        let handle = f.registry.handle(1).unwrap();
        assert_eq!(handle.state(), HandleState::Prepared);
        assert_eq!(handle.route(), StreamRoute::Alarm);
        assert_eq!(f.probe(0).snapshot(|s| s.route), Some(StreamRoute::Alarm));
    }

    #[test]
    fn test_prepare_bundled_resource_by_name() {
        let mut f = Fixture::new();
        f.registry.prepare("Ding.mp3", 4, StreamRoute::Notification).unwrap();
        assert!(matches!(
            f.registry.handle(4).unwrap().source(),
            ResolvedSource::Bundled { name, .. } if name == "ding"
        ));
        let opened = f.probe(0).snapshot(|s| s.source.clone()).unwrap();
        assert!(opened.path().ends_with("raw/ding.ogg"));
    }

    #[test]
    fn test_prepare_missing_source_is_not_found() {
        let mut f = Fixture::new();
        let missing = f.path("missing.wav");

        let err = f.registry.prepare(&missing, 1, StreamRoute::Music).unwrap_err();
        assert!(matches!(err, SoundError::ResourceNotFound(_)));
        assert_eq!(err.code(), -1);
        assert!(f.registry.is_empty());

        assert!(matches!(
            f.registry.prepare("nothing", 2, StreamRoute::Music),
            Err(SoundError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_load_error_registers_nothing() {
        let mut f = Fixture::new();
        let corrupt = f.path("corrupt.wav");

        let err = f.registry.prepare(&corrupt, 1, StreamRoute::Music).unwrap_err();
        assert_eq!(err.code(), -2);
        assert!(f.registry.handle(1).is_none());
        assert_eq!(f.registry.get_current_time(1), CurrentTime::ABSENT);
    }

    #[test]
    fn test_prepare_same_key_releases_previous_player() {
        let mut f = Fixture::prepared(1);
        let mut first = f.registry.play(1);
        let tone = f.path("tone.wav");

        f.registry.prepare(&tone, 1, StreamRoute::Ring).unwrap();

        assert_eq!(f.registry.len(), 1);
        assert!(f.probe(0).snapshot(|s| s.released));
        assert!(!f.probe(1).snapshot(|s| s.released));
        assert_eq!(f.registry.handle(1).unwrap().route(), StreamRoute::Ring);
        assert_eq!(first.status(), CompletionStatus::Cancelled);
    }

    #[test]
    fn test_play_unknown_key_fails_immediately() {
        let mut f = Fixture::new();
        let mut completion = f.registry.play(99);
        assert_eq!(completion.status(), CompletionStatus::Done(PlayOutcome::Failed));
    }

    #[tokio::test]
    async fn test_natural_completion_fires_once() {
        let mut f = Fixture::prepared(1);
        let completion = f.registry.play(1);
        assert!(f.registry.get_current_time(1).is_playing);
        assert_eq!(f.registry.handle(1).unwrap().state(), HandleState::Playing);

        f.probe(0).reach_end();

        assert_eq!(completion.wait().await, Some(PlayOutcome::Completed));
        assert!(!f.registry.get_current_time(1).is_playing);
        assert_eq!(f.registry.handle(1).unwrap().state(), HandleState::Stopped);
    }

    #[tokio::test]
    async fn test_native_error_reports_failure() {
        let mut f = Fixture::prepared(1);
        let completion = f.registry.play(1);

        f.probe(0).fail("device unplugged");
        // A second event for the same play is swallowed
        f.probe(0).fail("again");

        let outcome = completion.wait().await.unwrap();
        assert_eq!(outcome, PlayOutcome::Failed);
        assert!(!outcome.success());
        // Handle stays registered for the caller to release
        assert!(f.registry.handle(1).is_some());
    }

    #[test]
    fn test_play_while_playing_keeps_first_completion() {
        let mut f = Fixture::prepared(1);
        let mut first = f.registry.play(1);
        let mut second = f.registry.play(1);

        assert_eq!(second.status(), CompletionStatus::Cancelled);
        assert_eq!(f.probe(0).snapshot(|s| s.starts), 1);

        f.probe(0).reach_end();
        assert_eq!(first.status(), CompletionStatus::Done(PlayOutcome::Completed));
    }

    #[test]
    fn test_pause_keeps_position() {
        let mut f = Fixture::prepared(1);
        let mut completion = f.registry.play(1);
        f.probe(0).advance(1250);

        f.registry.pause(1);

        assert_eq!(
            f.registry.get_current_time(1),
            CurrentTime { position_seconds: 1.25, is_playing: false }
        );
        assert_eq!(f.registry.handle(1).unwrap().state(), HandleState::Paused);
        // Sinks stay armed across pause
        assert_eq!(completion.status(), CompletionStatus::Pending);
    }

    #[test]
    fn test_stop_rewinds_to_zero() {
        let mut f = Fixture::prepared(1);
        let _completion = f.registry.play(1);
        f.probe(0).advance(2000);

        f.registry.stop(1);

        assert_eq!(
            f.registry.get_current_time(1),
            CurrentTime { position_seconds: 0.0, is_playing: false }
        );
        assert_eq!(f.registry.handle(1).unwrap().state(), HandleState::Stopped);
    }

    #[test]
    fn test_pause_and_stop_ignore_idle_handles() {
        let mut f = Fixture::prepared(1);
        f.registry.set_current_time(1, 1.0);

        f.registry.stop(1);
        f.registry.pause(1);
        f.registry.stop(42);

        assert_eq!(f.registry.get_current_time(1).position_seconds, 1.0);
        assert_eq!(f.registry.handle(1).unwrap().state(), HandleState::Prepared);
    }

    #[test]
    fn test_resume_after_pause_rearms_completion() {
        let mut f = Fixture::prepared(1);
        let mut first = f.registry.play(1);
        f.registry.pause(1);
        let mut second = f.registry.play(1);

        assert_eq!(first.status(), CompletionStatus::Cancelled);
        f.probe(0).reach_end();
        assert_eq!(second.status(), CompletionStatus::Done(PlayOutcome::Completed));
    }

    #[test]
    fn test_looping_suppresses_completion() {
        let mut f = Fixture::prepared(1);
        f.registry.set_looping(1, true);
        let mut completion = f.registry.play(1);
        f.probe(0).advance(2999);

        f.probe(0).reach_end();

        assert_eq!(completion.status(), CompletionStatus::Pending);
        assert_eq!(
            f.registry.get_current_time(1),
            CurrentTime { position_seconds: 0.0, is_playing: true }
        );
        assert!(f.registry.handle(1).unwrap().looping());
        assert!(f.probe(0).snapshot(|s| s.looping));
    }

    #[test]
    fn test_release_unknown_key_is_noop() {
        let mut f = Fixture::prepared(1);
        f.registry.release(7);
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_release_mid_playback_cancels_completion() {
        let mut f = Fixture::prepared(1);
        let completion = f.registry.play(1);

        f.registry.release(1);
        // The playback thread racing to the end finds nothing armed
        f.probe(0).reach_end();
        f.probe(0).fail("late");

        assert_eq!(completion.wait().await, None);
        assert!(f.probe(0).snapshot(|s| s.released));
        assert!(f.registry.handle(1).is_none());
        assert_eq!(f.registry.get_current_time(1), CurrentTime::ABSENT);

        // Further calls on the released key are no-ops
        f.registry.set_volume(1, 0.5, 0.5);
        f.registry.pause(1);
        let mut replay = f.registry.play(1);
        assert_eq!(replay.status(), CompletionStatus::Done(PlayOutcome::Failed));
    }

    #[test]
    fn test_set_current_time_rounds_to_millisecond() {
        let mut f = Fixture::prepared(1);

        f.registry.set_current_time(1, 1.2345);
        assert_eq!(f.registry.handle(1).unwrap().position_ms(), 1235);
        let reported = f.registry.get_current_time(1).position_seconds;
        assert!((reported - 1.2345).abs() <= 0.001);

        f.registry.set_current_time(1, 0.0004);
        assert_eq!(f.registry.handle(1).unwrap().position_ms(), 0);

        f.registry.set_current_time(1, -3.0);
        assert_eq!(f.registry.handle(1).unwrap().position_ms(), 0);
    }

    #[test]
    fn test_set_volume_is_clamped_per_channel() {
        let mut f = Fixture::prepared(1);

        f.registry.set_volume(1, 0.25, 1.5);
        assert_eq!(f.registry.handle(1).unwrap().volume(), (0.25, 1.0));
        assert_eq!(f.probe(0).snapshot(|s| (s.left, s.right)), (0.25, 1.0));

        f.registry.set_volume(1, f32::NAN, -1.0);
        assert_eq!(f.registry.handle(1).unwrap().volume(), (0.0, 0.0));
        // No state transition
        assert_eq!(f.registry.handle(1).unwrap().state(), HandleState::Prepared);
    }

    #[test]
    fn test_play_after_completion_restarts() {
        let mut f = Fixture::prepared(1);
        let _ = f.registry.play(1);
        f.probe(0).reach_end();
        assert_eq!(f.registry.get_current_time(1).position_seconds, 3.0);

        let mut again = f.registry.play(1);
        assert_eq!(again.status(), CompletionStatus::Pending);
        assert_eq!(
            f.registry.get_current_time(1),
            CurrentTime { position_seconds: 0.0, is_playing: true }
        );
    }

    #[test]
    fn test_release_all_frees_every_handle() {
        let mut f = Fixture::prepared(1);
        let tone = f.path("tone.wav");
        f.registry.prepare(&tone, 2, StreamRoute::Music).unwrap();

        f.registry.release_all();

        assert!(f.registry.is_empty());
        assert!(f.probe(0).snapshot(|s| s.released));
        assert!(f.probe(1).snapshot(|s| s.released));
    }

    #[test]
    fn test_blocking_wait() {
        let mut f = Fixture::prepared(3);
        assert_eq!(f.registry.play(8).blocking_wait(), Some(PlayOutcome::Failed));

        let completion = f.registry.play(3);
        let handle = f.registry.handle(3).unwrap();
        assert_eq!(handle.key(), 3);
        assert_eq!(handle.duration_ms(), DURATION_MS);

        f.registry.release(3);
        assert_eq!(completion.blocking_wait(), None);
    }

    #[test]
    fn test_seconds_to_ms() {
        assert_eq!(seconds_to_ms(2.5), 2500);
        assert_eq!(seconds_to_ms(0.0015), 2);
        assert_eq!(seconds_to_ms(f64::NAN), 0);
        assert_eq!(seconds_to_ms(f64::INFINITY), 0);
    }
}
