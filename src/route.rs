// Stream routes and the constants table exposed to the webview
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output routing class a handle is bound to for its whole life.
///
/// Discriminants match the platform's `AudioManager` stream types so the
/// raw integers coming over the bridge can be passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum StreamRoute {
    VoiceCall = 0,
    System = 1,
    Ring = 2,
    Music = 3,
    Alarm = 4,
    Notification = 5,
    Dtmf = 8,
    Default = i32::MIN,
}

impl StreamRoute {
    pub const ALL: [StreamRoute; 8] = [
        StreamRoute::Alarm,
        StreamRoute::Dtmf,
        StreamRoute::Music,
        StreamRoute::Notification,
        StreamRoute::Ring,
        StreamRoute::System,
        StreamRoute::VoiceCall,
        StreamRoute::Default,
    ];

    /// Map a raw bridge value; unknown values fall back to `Default`.
    pub fn from_raw(raw: i32) -> Self {
        match Self::ALL.iter().find(|route| route.raw() == raw) {
            Some(route) => *route,
            None => {
                tracing::warn!("Unknown stream route {}, using default", raw);
                StreamRoute::Default
            }
        }
    }

    pub fn raw(self) -> i32 {
        self as i32
    }

    /// Name of the constant this route is published under.
    pub fn constant_name(self) -> &'static str {
        match self {
            StreamRoute::Alarm => "STREAM_ALARM",
            StreamRoute::Dtmf => "STREAM_DTMF",
            StreamRoute::Music => "STREAM_MUSIC",
            StreamRoute::Notification => "STREAM_NOTIFICATION",
            StreamRoute::Ring => "STREAM_RING",
            StreamRoute::System => "STREAM_SYSTEM",
            StreamRoute::VoiceCall => "STREAM_VOICE_CALL",
            StreamRoute::Default => "USE_DEFAULT_STREAM_TYPE",
        }
    }
}

impl Default for StreamRoute {
    fn default() -> Self {
        StreamRoute::Default
    }
}

/// Constants table queried once when the webview module loads.
pub fn constants() -> BTreeMap<&'static str, i32> {
    StreamRoute::ALL
        .iter()
        .map(|route| (route.constant_name(), route.raw()))
        .collect()
}
