// Soundbridge - keyed native audio handles for a webview host
// Module declarations
pub mod audio;
pub mod config;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod route;

#[cfg(feature = "tauri")]
mod commands;
#[cfg(feature = "tauri")]
mod plugin;
#[cfg(feature = "tauri")]
pub mod state;

pub use config::SoundConfig;
pub use error::{Result, SoundError};
pub use registry::{
    AudioHandle, AudioHandleRegistry, CompletionStatus, CurrentTime, HandleKey, HandleState,
    PlayCompletion, PlayOutcome, PreparedInfo,
};
pub use resolver::{ResolvedSource, SourceResolver};
pub use route::{constants, StreamRoute};

#[cfg(feature = "tauri")]
pub use plugin::init;
