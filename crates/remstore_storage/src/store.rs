//! Node store trait definition.

use async_trait::async_trait;
use remstore_node::{Node, NodeMap};

use crate::error::StorageResult;

/// A local key-value table of cached nodes.
///
/// Node stores know nothing about revisions or sync state. They read and
/// write whole [`Node`] records keyed by path; the caching layer owns all
/// interpretation.
///
/// # Invariants
///
/// - `get_nodes` returns an entry for every requested path, `None` when
///   the path has no record
/// - `set_nodes` applies the whole batch or nothing; a `None` value
///   deletes the record
/// - `for_all_nodes` visits every record exactly once
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryNodeStore`] - For tests and ephemeral caches
/// - [`super::FileNodeStore`] - For persistent caches
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Reads the records stored under `paths`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    async fn get_nodes(&self, paths: &[String]) -> StorageResult<NodeMap>;

    /// Writes a batch of records.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable. In that
    /// case none of its records were applied.
    async fn set_nodes(&self, nodes: NodeMap) -> StorageResult<()>;

    /// Calls `visitor` once for every stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    async fn for_all_nodes(&self, visitor: &mut (dyn FnMut(Node) + Send)) -> StorageResult<()>;
}

#[async_trait]
impl<T: NodeStore + ?Sized> NodeStore for std::sync::Arc<T> {
    async fn get_nodes(&self, paths: &[String]) -> StorageResult<NodeMap> {
        (**self).get_nodes(paths).await
    }

    async fn set_nodes(&self, nodes: NodeMap) -> StorageResult<()> {
        (**self).set_nodes(nodes).await
    }

    async fn for_all_nodes(&self, visitor: &mut (dyn FnMut(Node) + Send)) -> StorageResult<()> {
        (**self).for_all_nodes(visitor).await
    }
}
