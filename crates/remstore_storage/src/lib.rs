//! # remstore Storage
//!
//! Local node store contract and implementations for remstore.
//!
//! Node stores are plain key-value tables of [`remstore_node::Node`]
//! records. They do not interpret revisions; the caching layer and the
//! sync engine own all of that.
//!
//! ## Available Stores
//!
//! - [`InMemoryNodeStore`] - For testing and ephemeral caches
//! - [`FileNodeStore`] - For persistent caches, one CBOR record per node
//!
//! ## Example
//!
//! ```rust
//! use remstore_node::{Node, NodeMap};
//! use remstore_storage::{InMemoryNodeStore, NodeStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = InMemoryNodeStore::new();
//! let mut batch = NodeMap::new();
//! batch.insert("/notes/".to_string(), Some(Node::new("/notes/", 0)));
//! store.set_nodes(batch).await.unwrap();
//!
//! let nodes = store.get_nodes(&["/notes/".to_string()]).await.unwrap();
//! assert!(nodes["/notes/"].is_some());
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileNodeStore;
pub use memory::InMemoryNodeStore;
pub use store::NodeStore;
