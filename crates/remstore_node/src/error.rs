//! Error types for the node crate.

use thiserror::Error;

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors that can occur while validating paths or encoding nodes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Failed to encode a node to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes into a node.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The path is not an absolute storage path.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Invalid snapshot structure.
    #[error("invalid snapshot structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },
}

impl NodeError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}
