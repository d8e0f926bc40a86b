//! # remstore Remote
//!
//! The contract between the sync engine and a remote storage backend,
//! plus two backends:
//!
//! - [`WireRemote`]: the generic remoteStorage HTTP protocol over any
//!   [`HttpClient`]
//! - [`MemoryRemote`]: an in-memory server with failure controls
//!
//! ## Usage
//!
//! ```rust
//! use remstore_node::Body;
//! use remstore_remote::{MemoryRemote, Remote, RequestOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let remote = MemoryRemote::new();
//! let created = remote
//!     .put("/notes/a", Body::from("hi"), Some("text/plain".into()), RequestOptions::create_only())
//!     .await
//!     .unwrap();
//! assert_eq!(created.status, 201);
//!
//! let listing = remote.get("/notes/", RequestOptions::none()).await.unwrap();
//! assert!(listing.listing().unwrap().contains_key("a"));
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod http;
mod listing;
mod memory;
mod remote;
mod wire;

pub use error::{RemoteError, RemoteResult};
#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
pub use http::{HttpClient, HttpRequest, HttpResponse, Method};
pub use listing::{is_corrupt_listing, listing_defect, FolderListing, ItemMeta, ListingDefect};
pub use memory::{MemoryRemote, RequestRecord};
pub use remote::{Remote, RemoteContent, RemoteResponse, RequestOptions};
pub use wire::{WireRemote, FOLDER_DESCRIPTION_CONTEXT, REQUEST_TIMEOUT};
