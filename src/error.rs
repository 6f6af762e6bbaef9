//! Error types for story-reel

use thiserror::Error;

/// Result type alias for story-reel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for story-reel
#[derive(Error, Debug)]
pub enum Error {
    /// Segment index outside the story
    #[error("segment index {index} out of range (story has {count} segments)")]
    OutOfRange { index: usize, count: usize },

    /// Segment declares no video
    #[error("segment '{0}' has no video reference")]
    MissingVideo(String),

    /// Failure reported by the video decode backend
    #[error("video backend error: {0:#}")]
    Video(#[from] anyhow::Error),

    /// Persistent storage errors
    #[error("storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation not valid in the current playback state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
