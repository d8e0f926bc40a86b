//! File-backed node store.
//!
//! Directory layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for a single writer
//! └─ nodes.cbor        # Snapshot of every node record
//! ```
//!
//! The snapshot is rewritten on every batch using write-then-rename, so a
//! crash leaves either the old or the new snapshot on disk. The rewrite
//! runs on the blocking thread pool; batches are applied one at a time.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::RwLock;
use remstore_node::{decode_node, decode_snapshot, encode_node, encode_snapshot, Node, NodeMap};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::NodeStore;

const LOCK_FILE: &str = "LOCK";
const NODES_FILE: &str = "nodes.cbor";
const NODES_TEMP: &str = "nodes.cbor.tmp";

/// A node store persisted to a directory.
///
/// All records are held in memory and the snapshot file is rewritten on
/// each [`set_nodes`](NodeStore::set_nodes), so the cost of a batch grows
/// with the whole cache. Meant for caches of a few thousand nodes. Records that fail to decode
/// on open are kept as [`Node::unreadable`] placeholders, which the sync
/// engine treats as corrupt and re-fetches.
///
/// # Example
///
/// ```no_run
/// use remstore_storage::FileNodeStore;
/// use std::path::Path;
///
/// let store = FileNodeStore::open(Path::new("cache"), true).unwrap();
/// println!("{} nodes", store.len());
/// ```
#[derive(Debug)]
pub struct FileNodeStore {
    path: PathBuf,
    nodes: RwLock<BTreeMap<String, Node>>,
    writer: Mutex<()>,
    unreadable: Vec<String>,
    _lock_file: File,
}

impl FileNodeStore {
    /// Opens or creates a store directory.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the store directory
    /// * `create_if_missing` - If true, creates the directory if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `Locked`)
    /// - The snapshot file cannot be read or its framing is damaged
    pub fn open(path: &Path, create_if_missing: bool) -> StorageResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StorageError::Missing(path.to_path_buf()));
            }
        }
        if !path.is_dir() {
            return Err(StorageError::Corrupted(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let (nodes, unreadable) = Self::load(&path.join(NODES_FILE))?;
        debug!(path = %path.display(), nodes = nodes.len(), "opened node store");

        Ok(Self {
            path: path.to_path_buf(),
            nodes: RwLock::new(nodes),
            writer: Mutex::new(()),
            unreadable,
            _lock_file: lock_file,
        })
    }

    fn load(file: &Path) -> StorageResult<(BTreeMap<String, Node>, Vec<String>)> {
        if !file.exists() {
            return Ok((BTreeMap::new(), Vec::new()));
        }
        let mut data = Vec::new();
        File::open(file)?.read_to_end(&mut data)?;
        let records = decode_snapshot(&data)?;

        let mut nodes = BTreeMap::new();
        let mut unreadable = Vec::new();
        for (key, bytes) in records {
            let node = match decode_node(&bytes) {
                Ok(node) => node,
                Err(e) => {
                    warn!(path = %key, error = %e, "unreadable node record");
                    unreadable.push(key.clone());
                    Node::unreadable(key.clone())
                }
            };
            nodes.insert(key, node);
        }
        Ok((nodes, unreadable))
    }

    fn persist(dir: &Path, nodes: &BTreeMap<String, Node>) -> StorageResult<()> {
        let mut records = BTreeMap::new();
        for (key, node) in nodes {
            records.insert(key.clone(), encode_node(node)?);
        }
        let data = encode_snapshot(&records)?;

        let temp_path = dir.join(NODES_TEMP);
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, dir.join(NODES_FILE))?;
        Ok(())
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Keys of the records that failed to decode when the store was opened.
    #[must_use]
    pub fn unreadable(&self) -> &[String] {
        &self.unreadable
    }

    /// Returns every record with the key it is stored under.
    #[must_use]
    pub fn records(&self) -> Vec<(String, Node)> {
        self.nodes
            .read()
            .iter()
            .map(|(k, n)| (k.clone(), n.clone()))
            .collect()
    }
}

#[async_trait]
impl NodeStore for FileNodeStore {
    async fn get_nodes(&self, paths: &[String]) -> StorageResult<NodeMap> {
        let nodes = self.nodes.read();
        Ok(paths
            .iter()
            .map(|p| (p.clone(), nodes.get(p).cloned()))
            .collect())
    }

    async fn set_nodes(&self, batch: NodeMap) -> StorageResult<()> {
        let _writer = self.writer.lock().await;
        let mut next = self.nodes.read().clone();
        for (path, node) in batch {
            match node {
                Some(node) => {
                    next.insert(path, node);
                }
                None => {
                    next.remove(&path);
                }
            }
        }
        let dir = self.path.clone();
        let next = tokio::task::spawn_blocking(move || Self::persist(&dir, &next).map(|()| next))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;
        *self.nodes.write() = next;
        Ok(())
    }

    async fn for_all_nodes(&self, visitor: &mut (dyn FnMut(Node) + Send)) -> StorageResult<()> {
        let snapshot: Vec<Node> = self.nodes.read().values().cloned().collect();
        for node in snapshot {
            visitor(node);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remstore_node::{Body, Revision};
    use tempfile::tempdir;

    fn doc(path: &str, text: &str) -> Node {
        let mut node = Node::new(path, 1);
        node.local = Some(Revision::at(2).with_body(Body::from(text), Some("text/plain".into())));
        node
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileNodeStore::open(dir.path(), true).unwrap();
            let mut batch = NodeMap::new();
            batch.insert("/a".into(), Some(doc("/a", "one")));
            batch.insert("/b".into(), Some(doc("/b", "two")));
            store.set_nodes(batch).await.unwrap();

            let mut batch = NodeMap::new();
            batch.insert("/b".into(), None);
            store.set_nodes(batch).await.unwrap();
        }
        let store = FileNodeStore::open(dir.path(), false).unwrap();
        assert_eq!(store.len(), 1);
        let got = store.get_nodes(&["/a".into()]).await.unwrap();
        assert_eq!(got["/a"], Some(doc("/a", "one")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_batches_are_all_persisted() {
        let dir = tempdir().unwrap();
        {
            let store = std::sync::Arc::new(FileNodeStore::open(dir.path(), true).unwrap());
            let writers: Vec<_> = (0..8)
                .map(|i| {
                    let store = std::sync::Arc::clone(&store);
                    tokio::spawn(async move {
                        let path = format!("/n{i}");
                        let batch = NodeMap::from([(path.clone(), Some(doc(&path, "x")))]);
                        store.set_nodes(batch).await
                    })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap().unwrap();
            }
            assert_eq!(store.len(), 8);
        }
        let store = FileNodeStore::open(dir.path(), false).unwrap();
        assert_eq!(store.len(), 8);
        assert!(store.unreadable().is_empty());
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = FileNodeStore::open(dir.path(), true).unwrap();
        assert!(matches!(
            FileNodeStore::open(dir.path(), false),
            Err(StorageError::Locked)
        ));
    }

    #[test]
    fn missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope");
        assert!(matches!(
            FileNodeStore::open(&path, false),
            Err(StorageError::Missing(_))
        ));
    }

    #[test]
    fn damaged_record_becomes_placeholder() {
        let dir = tempdir().unwrap();
        let mut records = BTreeMap::new();
        records.insert("/ok".to_string(), encode_node(&Node::new("/ok", 1)).unwrap());
        records.insert("/bad".to_string(), vec![0xa1, 0xff]);
        fs::write(dir.path().join(NODES_FILE), encode_snapshot(&records).unwrap()).unwrap();

        let store = FileNodeStore::open(dir.path(), false).unwrap();
        assert_eq!(store.unreadable(), &["/bad".to_string()]);
        let records = store.records();
        let bad = records.iter().find(|(k, _)| k == "/bad").unwrap();
        assert!(bad.1.common.is_none());
    }
}
