//! # remstore Node
//!
//! Cached node model for remstore.
//!
//! This crate holds the types every other remstore crate agrees on:
//!
//! - [`Node`] and [`Revision`]: the per-path cache record with its
//!   `common`/`local`/`remote`/`push` revisions
//! - [`Body`]: document bodies, including the deletion tombstone
//! - path helpers ([`nodes_from_root`], [`parent_path`], ...)
//! - structural corruption checks ([`corruption`])
//! - the protocol version table ([`ProtocolVersion`])
//! - the CBOR record codec used by persistent stores
//!
//! ## Usage
//!
//! ```
//! use remstore_node::{Body, Node, Revision};
//!
//! let mut node = Node::new("/notes/today", 0);
//! node.local = Some(Revision::at(1).with_body(Body::from("hello"), Some("text/plain".into())));
//!
//! assert!(node.needs_push());
//! assert_eq!(node.latest().unwrap().live_body(), Some(&Body::from("hello")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod body;
mod codec;
mod corrupt;
mod error;
mod node;
mod path;
mod protocol;

pub use body::Body;
pub use codec::{decode_node, decode_snapshot, encode_node, encode_snapshot, now_millis, SNAPSHOT_VERSION};
pub use corrupt::{corruption, corruption_at, is_corrupt, Corruption};
pub use error::{NodeError, NodeResult};
pub use node::{ItemsMap, Node, NodeMap, Revision};
pub use path::{
    child_name, containing_folder, is_document, is_folder, is_valid_item_name, join,
    nodes_from_root, parent_path, validate_document_path, validate_path, SEPARATOR,
};
pub use protocol::{ListingRules, ProtocolVersion};
