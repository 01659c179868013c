// Native player seam
//
// The registry only talks to players through these traits. The default
// engine lives in `engine.rs`; tests plug in a scripted fake.
use std::sync::Arc;

use crate::error::Result;
use crate::resolver::ResolvedSource;
use crate::route::StreamRoute;

/// Terminal events a native player reports from its playback thread.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Reached end of media with looping off
    Completed,
    /// Playback failed; the player has stopped
    Error(String),
}

/// Receives `PlayerEvent`s. Called from whatever thread the player plays on.
pub type PlayerListener = Arc<dyn Fn(PlayerEvent) + Send + Sync>;

pub trait NativePlayer: Send {
    fn start(&mut self);
    fn pause(&mut self);
    fn seek_to(&mut self, position_ms: u64);
    fn set_volume(&mut self, left: f32, right: f32);
    fn set_looping(&mut self, looping: bool);
    fn is_looping(&self) -> bool;
    fn is_playing(&self) -> bool;
    fn position_ms(&self) -> u64;
    fn duration_ms(&self) -> u64;
    fn channels(&self) -> u16;
    /// Free native resources. No events are delivered afterwards.
    fn release(&mut self);
}

pub trait PlayerFactory: Send {
    type Player: NativePlayer;

    /// Build a prepared player for `source`, bound to `route`.
    ///
    /// Fails with `SoundError::Load` when the resource can't be parsed.
    fn open(
        &self,
        source: &ResolvedSource,
        route: StreamRoute,
        listener: PlayerListener,
    ) -> Result<Self::Player>;
}
