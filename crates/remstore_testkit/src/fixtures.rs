//! Store fixtures.
//!
//! Provides ready-made node stores for tests, with automatic cleanup of
//! anything written to disk.

use std::path::PathBuf;
use std::sync::Arc;

use remstore_node::Node;
use remstore_storage::{FileNodeStore, InMemoryNodeStore};
use tempfile::TempDir;

/// A file-backed store in a temporary directory.
///
/// The directory is removed when the fixture is dropped.
pub struct TempFileStore {
    /// The store instance.
    pub store: Arc<FileNodeStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: TempDir,
}

impl TempFileStore {
    /// Returns the store directory.
    pub fn path(&self) -> PathBuf {
        store_dir(&self.temp_dir)
    }

    /// Drops the open store and opens the same directory again.
    ///
    /// Fails if another handle to the store is still alive, since the
    /// directory lock is held until the last one is dropped.
    pub fn reopen(self) -> Self {
        let Self { store, temp_dir } = self;
        drop(store);
        let store =
            FileNodeStore::open(&store_dir(&temp_dir), false).expect("Failed to reopen file store");
        Self {
            store: Arc::new(store),
            temp_dir,
        }
    }
}

impl std::ops::Deref for TempFileStore {
    type Target = FileNodeStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Creates an empty in-memory store.
pub fn memory_store() -> Arc<InMemoryNodeStore> {
    Arc::new(InMemoryNodeStore::new())
}

/// Creates an in-memory store holding `nodes`.
pub fn memory_store_with<I>(nodes: I) -> Arc<InMemoryNodeStore>
where
    I: IntoIterator<Item = Node>,
{
    let store = InMemoryNodeStore::new();
    for node in nodes {
        store.insert(node);
    }
    Arc::new(store)
}

/// Creates an empty file-backed store in a fresh temporary directory.
pub fn temp_file_store() -> TempFileStore {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = FileNodeStore::open(&store_dir(&temp_dir), true)
        .expect("Failed to open file store");
    TempFileStore {
        store: Arc::new(store),
        temp_dir,
    }
}

fn store_dir(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("cache")
}
