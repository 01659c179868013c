// Plugin state management
use parking_lot::Mutex;

use crate::audio::CpalPlayerFactory;
use crate::config::SoundConfig;
use crate::registry::AudioHandleRegistry;
use crate::resolver::SourceResolver;

pub struct SoundState {
    pub registry: Mutex<AudioHandleRegistry<CpalPlayerFactory>>,
}

impl SoundState {
    pub fn new(config: &SoundConfig) -> Self {
        let registry = AudioHandleRegistry::new(
            CpalPlayerFactory::new(config),
            SourceResolver::new(config.bundle_dir.clone()),
        );
        Self {
            registry: Mutex::new(registry),
        }
    }
}
