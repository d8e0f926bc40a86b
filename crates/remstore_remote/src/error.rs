//! Error types for remote adapters.

use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors a remote adapter reports instead of a response.
///
/// HTTP statuses, including 4xx and 5xx, are not errors: they come back
/// as a [`RemoteResponse`](crate::RemoteResponse).
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network failure before a response was received.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The request did not complete within the request timeout.
    #[error("request timed out after {millis} ms")]
    Timeout {
        /// The timeout that elapsed.
        millis: u64,
    },

    /// The adapter has no storage address or token.
    #[error("not connected to a remote storage")]
    NotConnected,

    /// The request cannot be expressed, e.g. a PUT on a folder.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true if the failure says the remote is unreachable.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}
