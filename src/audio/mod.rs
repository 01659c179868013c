// Audio playback module
// Native player seam plus the default engine (Symphonia decoding, cpal output)

pub mod decoder;
pub mod engine;
pub mod output;
pub mod player;
pub mod resampler;

#[cfg(test)]
pub mod fake;

pub use engine::{CpalPlayer, CpalPlayerFactory};
pub use player::{NativePlayer, PlayerEvent, PlayerFactory, PlayerListener};
