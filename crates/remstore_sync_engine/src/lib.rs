//! # remstore Sync Engine
//!
//! Keeps a local [`remstore_core::Cache`] converged with a remote store.
//!
//! This crate provides:
//! - Task discovery: corrupt nodes, pending fetches and pushes, stale data
//! - A per-path task scheduler with bounded concurrency
//! - Conditional pushes and fetches with conflict detection
//! - Merging of fetched documents and folder listings, including
//!   deletion of whole subtrees that vanished remotely
//! - The [`Client`] context object with its maintenance loop
//!
//! ## Architecture
//!
//! Each task owns one path. It reads the node, plans one request, sends
//! it and merges the response in a single store batch. Up to
//! `num_threads` tasks run while the remote is online, one while it is
//! offline and none while it is disconnected. When the queue drains the
//! engine emits [`SyncEvent::Done`], and the maintenance loop waits one
//! sync interval before the next cycle.
//!
//! ## Key Invariants
//!
//! - A path is never dispatched twice at the same time
//! - Fetches require read access, pushes read-write access
//! - A local change is only discarded by a conflict, and the conflict is
//!   reported as a change event
//! - Pushes are conditional: `If-Match` on a known revision, otherwise
//!   `If-None-Match: *`
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use remstore_core::AccessMode;
//! use remstore_node::Body;
//! use remstore_remote::MemoryRemote;
//! use remstore_storage::InMemoryNodeStore;
//! use remstore_sync_engine::{Client, SyncConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let remote = Arc::new(MemoryRemote::new());
//! let client = Client::new(
//!     Arc::new(InMemoryNodeStore::new()),
//!     Arc::clone(&remote),
//!     SyncConfig::default(),
//! )
//! .unwrap();
//! client.claim_access("notes", AccessMode::ReadWrite).unwrap();
//!
//! client
//!     .cache()
//!     .put("/notes/today", Body::from("hello"), Some("text/plain".into()))
//!     .await
//!     .unwrap();
//! client.sync_cycle().await.unwrap();
//!
//! assert!(remote.document("/notes/today").is_some());
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod conflict;
mod engine;
mod error;
mod events;
mod status;
mod tasks;

pub use client::Client;
pub use config::{SyncConfig, DEFAULT_NUM_THREADS, DEFAULT_SYNC_INTERVAL};
pub use conflict::{
    auto_merge, converge_folder, is_pending_deletion, settle_folder_markers, ConflictPolicy,
};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use events::{SyncEvent, SyncStats};
pub use status::{interpret_status, StatusMeaning};
pub use tasks::{is_stale, plan_request, Action, Request};
