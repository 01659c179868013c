// Error types for the sound bridge
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SoundError {
    /// Source is neither a bundled resource nor an existing file
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The native player could not parse or prepare the resource
    #[error("cannot load url: {0}")]
    Load(String),

    /// Audio output device errors
    #[error("audio device error: {0}")]
    Device(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SoundError {
    /// Numeric code handed back across the bridge.
    ///
    /// `-1` and `-2` are the two `prepare` failures the webview side
    /// switches on; everything else shares `-3`.
    pub fn code(&self) -> i32 {
        match self {
            Self::ResourceNotFound(_) => -1,
            Self::Load(_) => -2,
            Self::Device(_) | Self::Config(_) | Self::Io(_) => -3,
        }
    }
}

// Serialized as `{ code, message }` so bridge commands can return it directly
impl Serialize for SoundError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SoundError", 2)?;
        state.serialize_field("code", &self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type Result<T> = std::result::Result<T, SoundError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_error_codes() {
        assert_eq!(SoundError::ResourceNotFound("a".into()).code(), -1);
        assert_eq!(SoundError::Load("b".into()).code(), -2);
        assert_eq!(SoundError::Device("c".into()).code(), -3);
    }

    #[test]
    fn test_serializes_code_and_message() {
        let json = serde_json::to_value(SoundError::ResourceNotFound("beep".into())).unwrap();
        assert_eq!(json["code"], -1);
        assert_eq!(json["message"], "resource not found: beep");
    }
}
