//! Error types for the chatterbox voice client

use thiserror::Error;

/// Result type alias for chatterbox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture device could not be acquired
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),

    /// Transcription endpoint failure
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Chat gateway non-success
    #[error("gateway error: {message}")]
    Gateway {
        /// HTTP status code, if the gateway responded at all
        status: Option<u16>,
        /// Human-readable failure description
        message: String,
    },

    /// Speech synthesis endpoint failure
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// Audio playback failure
    #[error("playback failed: {0}")]
    Playback(String),

    /// Control channel send attempted while the transport is closed
    #[error("control channel not connected")]
    NotConnected,

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
