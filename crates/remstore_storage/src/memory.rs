//! In-memory node store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use remstore_node::{Node, NodeMap};

use crate::error::{StorageError, StorageResult};
use crate::store::NodeStore;

/// A node store that keeps every record in memory.
///
/// Suitable for:
/// - Unit and integration tests
/// - Ephemeral caches that don't need persistence
///
/// [`set_unavailable`](Self::set_unavailable) makes every call fail with
/// [`StorageError::Unavailable`], which lets tests exercise the sync
/// engine's store-failure path.
///
/// # Example
///
/// ```rust
/// use remstore_node::Node;
/// use remstore_storage::InMemoryNodeStore;
///
/// let store = InMemoryNodeStore::new();
/// store.insert(Node::new("/a", 0));
/// assert_eq!(store.len(), 1);
/// assert!(store.node("/a").is_some());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryNodeStore {
    nodes: RwLock<BTreeMap<String, Node>>,
    unavailable: AtomicBool,
}

impl InMemoryNodeStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a node under its own path.
    pub fn insert(&self, node: Node) {
        self.nodes.write().insert(node.path.clone(), node);
    }

    /// Stores a node under an arbitrary key.
    ///
    /// Useful for seeding records whose key and path disagree.
    pub fn insert_at(&self, key: impl Into<String>, node: Node) {
        self.nodes.write().insert(key.into(), node);
    }

    /// Returns a copy of the record stored under `path`.
    #[must_use]
    pub fn node(&self, path: &str) -> Option<Node> {
        self.nodes.read().get(path).cloned()
    }

    /// Returns all stored paths.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
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

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn get_nodes(&self, paths: &[String]) -> StorageResult<NodeMap> {
        self.check_available()?;
        let nodes = self.nodes.read();
        Ok(paths
            .iter()
            .map(|p| (p.clone(), nodes.get(p).cloned()))
            .collect())
    }

    async fn set_nodes(&self, batch: NodeMap) -> StorageResult<()> {
        self.check_available()?;
        let mut nodes = self.nodes.write();
        for (path, node) in batch {
            match node {
                Some(node) => {
                    nodes.insert(path, node);
                }
                None => {
                    nodes.remove(&path);
                }
            }
        }
        Ok(())
    }

    async fn for_all_nodes(&self, visitor: &mut (dyn FnMut(Node) + Send)) -> StorageResult<()> {
        self.check_available()?;
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

    #[tokio::test]
    async fn get_reports_absent_paths() {
        let store = InMemoryNodeStore::new();
        store.insert(Node::new("/a", 1));
        let got = store.get_nodes(&["/a".into(), "/b".into()]).await.unwrap();
        assert_eq!(got.len(), 2);
        assert!(got["/a"].is_some());
        assert!(got["/b"].is_none());
    }

    #[tokio::test]
    async fn none_deletes() {
        let store = InMemoryNodeStore::new();
        store.insert(Node::new("/a", 1));
        let mut batch = NodeMap::new();
        batch.insert("/a".into(), None);
        batch.insert("/b/".into(), Some(Node::new("/b/", 2)));
        store.set_nodes(batch).await.unwrap();
        assert_eq!(store.paths(), vec!["/b/".to_string()]);
    }

    #[tokio::test]
    async fn visits_every_node() {
        let store = InMemoryNodeStore::new();
        for p in ["/a", "/b", "/c/"] {
            store.insert(Node::new(p, 0));
        }
        let mut seen = Vec::new();
        store.for_all_nodes(&mut |n| seen.push(n.path)).await.unwrap();
        assert_eq!(seen, vec!["/a", "/b", "/c/"]);
    }

    #[tokio::test]
    async fn unavailable_store_fails() {
        let store = InMemoryNodeStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get_nodes(&["/a".into()]).await,
            Err(StorageError::Unavailable)
        ));
        store.set_unavailable(false);
        assert!(store.get_nodes(&["/a".into()]).await.is_ok());
    }
}
