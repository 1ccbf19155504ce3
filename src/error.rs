use std::time::Duration;
use thiserror::Error;

/// Errors raised while resolving, opening, or playing a radio stream.
#[derive(Debug, Error)]
pub enum StationError {
    /// Playlist resolution failed: wrong content type, empty body, or no
    /// usable playlist entry.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// A playlist fetch exceeded its time budget.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying HTTP transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The voice bridge refused to join, leave, or start playback.
    #[error("voice bridge error: {0}")]
    Bridge(String),
}

impl StationError {
    pub(crate) fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    pub(crate) fn bridge(error: impl std::fmt::Display) -> Self {
        Self::Bridge(error.to_string())
    }
}
