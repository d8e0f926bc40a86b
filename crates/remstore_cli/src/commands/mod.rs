//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use std::path::Path;

use remstore_storage::FileNodeStore;
use tracing::debug;

/// Opens an existing store directory without creating it.
pub fn open_store(path: &Path) -> Result<FileNodeStore, Box<dyn std::error::Error>> {
    let store = FileNodeStore::open(path, false)?;
    debug!(path = %path.display(), nodes = store.len(), "store opened");
    Ok(store)
}
