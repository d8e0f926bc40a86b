//! Error types for the sync engine.

use remstore_core::CoreError;
use remstore_remote::RemoteError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local cache error.
    #[error("local cache unavailable: {0}")]
    Cache(#[from] CoreError),

    /// Remote adapter error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A remote request did not complete within the request timeout.
    #[error("request timed out after {millis} ms")]
    Timeout {
        /// Timeout that elapsed.
        millis: u64,
    },

    /// A response could not be merged, such as a folder listing that
    /// fails the protocol's structural checks.
    #[error("invalid response for {path}: {reason}")]
    InvalidResponse {
        /// Requested path.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The remote answered with a status the engine cannot use.
    #[error("request for {path} failed with status {status}")]
    Status {
        /// Requested path.
        path: String,
        /// HTTP-style status.
        status: u16,
    },

    /// The claimed access does not cover the request.
    #[error("no {mode} access to {path}")]
    AccessDenied {
        /// Requested path.
        path: String,
        /// Mode the request needs.
        mode: &'static str,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Returns true if the remote could not be reached.
    ///
    /// Network errors take the remote offline.
    pub fn is_network(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_network(),
            SyncError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Status { status, .. } => *status >= 500,
            _ => self.is_network(),
        }
    }
}
