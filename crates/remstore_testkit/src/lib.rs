//! # remstore Testkit
//!
//! Test utilities for remstore.
//!
//! This crate provides:
//! - [`NodeBuilder`] for assembling nodes revision by revision
//! - Store fixtures backed by memory or a temporary directory
//! - Property-based generators for bodies, paths and nodes
//!
//! ## Usage
//!
//! ```rust
//! use remstore_testkit::{text, NodeBuilder};
//!
//! let node = NodeBuilder::new("/notes/today")
//!     .common_body(text("old"), "text/plain", "r1")
//!     .local_body(text("new"), "text/plain")
//!     .build();
//! assert!(node.needs_push());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod builder;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builder::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use builder::*;
pub use fixtures::*;
pub use generators::*;
