// Bridge configuration and persistence
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SoundError};
use crate::route::StreamRoute;

/// Default output buffer length, in milliseconds (~250ms like the desktop player)
pub const DEFAULT_RING_BUFFER_MS: u32 = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub version: i32, // Config schema version for future migrations
    /// Directory searched for bundled sounds by name
    pub bundle_dir: Option<PathBuf>,
    pub ring_buffer_ms: u32, // 20-2000ms
    /// Output device name per route; unmapped routes use the default device
    pub route_devices: BTreeMap<StreamRoute, String>,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            version: 1,
            bundle_dir: None,
            ring_buffer_ms: DEFAULT_RING_BUFFER_MS,
            route_devices: BTreeMap::new(),
        }
    }
}

impl SoundConfig {
    /// Get the config file path
    pub fn get_config_path(config_dir: &Path) -> PathBuf {
        config_dir.join("sound.json")
    }

    /// Load config from file, or return defaults if the file doesn't exist
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = Self::get_config_path(config_dir);

        if !path.exists() {
            tracing::debug!("No sound config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let mut config: SoundConfig = serde_json::from_str(&content)
            .map_err(|e| SoundError::Config(format!("Failed to parse {:?}: {}", path, e)))?;
        config.ring_buffer_ms = config.ring_buffer_ms.clamp(20, 2000);

        tracing::info!("Loaded sound config from {:?}", path);
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        fs::create_dir_all(config_dir)?;

        let path = Self::get_config_path(config_dir);
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SoundError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(&path, content)?;

        tracing::info!("Saved sound config to {:?}", path);
        Ok(())
    }

    pub fn device_for(&self, route: StreamRoute) -> Option<&str> {
        self.route_devices.get(&route).map(String::as_str)
    }
}
