//! Error types for remstore core.

use remstore_node::NodeError;
use remstore_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in caching-layer and configuration operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Node store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Path or node error.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Invalid argument passed to an operation.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Access scope is malformed.
    #[error("invalid scope '{scope}': scope should be a non-empty string without forward slashes")]
    InvalidScope {
        /// The rejected scope.
        scope: String,
    },

    /// Access mode is neither `r` nor `rw`.
    #[error("invalid access mode '{mode}': mode should be either 'r' or 'rw'")]
    InvalidMode {
        /// The rejected mode.
        mode: String,
    },

    /// A node required by the operation is not cached locally.
    #[error("cannot delete a non-existing node; retrieve its parent folder first; missing node: {path}")]
    MissingNode {
        /// The missing path.
        path: String,
    },

    /// A freshness requirement cannot be met right now.
    #[error("cannot fulfill maxAge requirement - {reason}")]
    FetchUnavailable {
        /// Why the remote cannot be asked.
        reason: String,
    },

    /// The queued fetch for a freshness requirement failed.
    #[error("fetch of {path} failed: {reason}")]
    FetchFailed {
        /// The path being fetched.
        path: String,
        /// Why it failed.
        reason: String,
    },
}

impl CoreError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a fetch unavailable error.
    pub fn fetch_unavailable(reason: impl Into<String>) -> Self {
        Self::FetchUnavailable {
            reason: reason.into(),
        }
    }

    /// Returns true for errors caused by the caller's arguments.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Node(_)
                | Self::InvalidArgument { .. }
                | Self::InvalidScope { .. }
                | Self::InvalidMode { .. }
        )
    }
}
