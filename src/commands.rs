// Tauri command handlers
use std::collections::BTreeMap;
use tauri::ipc::Channel;
use tauri::State;

use crate::error::SoundError;
use crate::registry::{CurrentTime, PreparedInfo};
use crate::route::{self, StreamRoute};
use crate::state::SoundState;

#[tauri::command]
pub fn prepare(
    source: String,
    key: i32,
    stream_route: i32,
    state: State<'_, SoundState>,
) -> Result<PreparedInfo, SoundError> {
    state
        .registry
        .lock()
        .prepare(&source, key, StreamRoute::from_raw(stream_route))
}

/// `on_end` receives exactly one bool per play that ends, and nothing if
/// the handle is released first.
#[tauri::command]
pub fn play(key: i32, on_end: Channel<bool>, state: State<'_, SoundState>) {
    let completion = state.registry.lock().play(key);

    tauri::async_runtime::spawn(async move {
        if let Some(outcome) = completion.wait().await {
            if let Err(e) = on_end.send(outcome.success()) {
                tracing::warn!("Failed to deliver play result for {}: {}", key, e);
            }
        }
    });
}

#[tauri::command]
pub fn pause(key: i32, state: State<'_, SoundState>) {
    state.registry.lock().pause(key);
}

#[tauri::command]
pub fn stop(key: i32, state: State<'_, SoundState>) {
    state.registry.lock().stop(key);
}

#[tauri::command]
pub fn release(key: i32, state: State<'_, SoundState>) {
    state.registry.lock().release(key);
}

#[tauri::command]
pub fn set_volume(key: i32, left: f32, right: f32, state: State<'_, SoundState>) {
    state.registry.lock().set_volume(key, left, right);
}

#[tauri::command]
pub fn set_looping(key: i32, looping: bool, state: State<'_, SoundState>) {
    state.registry.lock().set_looping(key, looping);
}

#[tauri::command]
pub fn set_current_time(key: i32, seconds: f64, state: State<'_, SoundState>) {
    state.registry.lock().set_current_time(key, seconds);
}

#[tauri::command]
pub fn get_current_time(key: i32, state: State<'_, SoundState>) -> CurrentTime {
    state.registry.lock().get_current_time(key)
}

#[tauri::command]
pub fn get_constants() -> BTreeMap<&'static str, i32> {
    route::constants()
}

// Kept for API parity with mobile hosts; output is always enabled here
#[tauri::command]
pub fn enable(enabled: bool) {
    tracing::debug!("enable({}) ignored", enabled);
}
