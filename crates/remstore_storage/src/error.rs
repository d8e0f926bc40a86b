//! Error types for node store operations.

use std::io;
use std::path::PathBuf;

use remstore_node::NodeError;
use thiserror::Error;

/// Result type for node store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during node store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A node could not be encoded or the snapshot could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] NodeError),

    /// The store file is corrupted beyond per-record recovery.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store lock.
    #[error("store is locked by another process")]
    Locked,

    /// The store directory does not exist.
    #[error("store directory does not exist: {0}")]
    Missing(PathBuf),

    /// The store cannot serve requests right now.
    #[error("store is unavailable")]
    Unavailable,
}
