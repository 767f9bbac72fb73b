//! Error types for speech synthesis

use std::io;
use thiserror::Error;

/// Main error type for the speech layer
#[derive(Error, Debug)]
pub enum SpeechError {
    /// Native engine unreachable; fatal for the engine instance
    #[error("Failed to initialize {backend} backend: {reason}")]
    InitializationFailure { backend: String, reason: String },

    /// Operation attempted before a successful initialize, or after shutdown
    #[error("Speech engine is not initialized")]
    NotInitialized,

    /// Native engine refused to queue the utterance
    #[error("Speak rejected: {0}")]
    SpeakRejected(String),

    /// Requested voice is not installed; callers fall back to the default voice
    #[error("Voice not found: {0}")]
    VoiceNotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("INI parse error: {0}")]
    IniParse(String),
}

/// Result type alias for speech operations
pub type Result<T> = std::result::Result<T, SpeechError>;

impl SpeechError {
    /// Build an initialization failure for the named backend
    pub fn init(backend: &str, reason: impl ToString) -> Self {
        SpeechError::InitializationFailure {
            backend: backend.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for SpeechError {
    fn from(e: serde_json::Error) -> Self {
        SpeechError::Protocol(format!("JSON error: {}", e))
    }
}

#[cfg(target_os = "linux")]
impl From<speech_dispatcher::Error> for SpeechError {
    fn from(e: speech_dispatcher::Error) -> Self {
        SpeechError::Backend(format!("speech-dispatcher: {}", e))
    }
}

impl From<tts::Error> for SpeechError {
    fn from(e: tts::Error) -> Self {
        SpeechError::Backend(format!("tts: {}", e))
    }
}
