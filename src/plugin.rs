// Tauri plugin wiring
use tauri::plugin::{Builder, TauriPlugin};
use tauri::{Manager, Runtime};

use crate::commands;
use crate::config::SoundConfig;
use crate::state::SoundState;

/// Build the `sound` plugin.
///
/// Config comes from `sound.json` in the app config directory. Without an
/// explicit `bundle_dir`, bundled sounds are looked up under the app's
/// `raw/` resource directory.
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("sound")
        .invoke_handler(tauri::generate_handler![
            commands::prepare,
            commands::play,
            commands::pause,
            commands::stop,
            commands::release,
            commands::set_volume,
            commands::set_looping,
            commands::set_current_time,
            commands::get_current_time,
            commands::get_constants,
            commands::enable,
        ])
        .setup(|app, _api| {
            let config_dir = app.path().app_config_dir()?;
            let mut config = SoundConfig::load(&config_dir)?;
            if config.bundle_dir.is_none() {
                config.bundle_dir = app.path().resource_dir().ok().map(|dir| dir.join("raw"));
            }

            tracing::info!("Sound bridge ready (bundle dir {:?})", config.bundle_dir);
            app.manage(SoundState::new(&config));
            Ok(())
        })
        .on_drop(|app| {
            if let Some(state) = app.try_state::<SoundState>() {
                state.registry.lock().release_all();
            }
        })
        .build()
}
