//! # remstore Core
//!
//! The caching layer applications talk to, and the configuration that
//! decides what gets synchronized.
//!
//! - [`Cache`]: get/put/delete/flush over any [`remstore_storage::NodeStore`],
//!   with change events and legacy-record migration
//! - [`ChangeFeed`]: ordered delivery of [`ChangeEvent`]s to subscribers
//! - [`Caching`]: per-path caching strategies
//! - [`Access`]: claimed read/read-write scopes
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use remstore_core::Cache;
//! use remstore_node::Body;
//! use remstore_storage::InMemoryNodeStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = Cache::new(Arc::new(InMemoryNodeStore::new()));
//! cache.put("/notes/today", Body::from("hello"), Some("text/plain".into())).await.unwrap();
//!
//! let read = cache.get("/notes/today", None).await.unwrap();
//! assert_eq!(read.status_code(), 200);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod access;
mod cache;
mod caching;
mod change_feed;
mod error;

pub use access::{Access, AccessMode, ROOT_SCOPE};
pub use cache::{Cache, DiffHandler, FetchQueue, Item, ReadResult};
pub use caching::{ActivateHandler, Caching, Strategy};
pub use change_feed::{ChangeEvent, ChangeFeed, ChangeValue, Origin};
pub use error::{CoreError, CoreResult};
