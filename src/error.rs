//! Error types for the run synchronization engine.
//!
//! None of these are terminal: the supervisor records them in the feed state
//! and keeps retrying until it is disposed.

use thiserror::Error;

/// Synchronization error type.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The snapshot request failed (transport, status or body).
    #[error("Snapshot fetch failed: {message}")]
    Fetch {
        /// HTTP status code, if the server answered.
        status: Option<u16>,
        /// Error detail.
        message: String,
    },

    /// The push channel failed or ended.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A single stream message could not be decoded as a run event.
    #[error("Malformed run event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    /// Invalid base URL or endpoint path.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Build a [`SyncError::Fetch`] from a transport failure.
    pub(crate) fn fetch_transport(err: &reqwest::Error) -> Self {
        Self::Fetch {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Result type alias for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
