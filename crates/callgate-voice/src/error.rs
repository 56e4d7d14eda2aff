//! Error types for the callgate voice engine

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the turn-taking engine
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Call session closed")]
    SessionClosed,
}
