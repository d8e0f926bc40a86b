//! Structural checks for cached nodes.
//!
//! A corrupt node is never surfaced as a failure. The sync engine
//! re-fetches it, which replaces the broken record.

use thiserror::Error;

use crate::node::{Node, Revision};
use crate::path::{is_folder, is_valid_item_name, validate_path};

/// Why a node was classified as corrupt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    /// The node path is not an absolute storage path.
    #[error("path is not absolute")]
    InvalidPath,
    /// The node has no `common` revision.
    #[error("missing common revision")]
    MissingCommon,
    /// A document revision carries a folder listing.
    #[error("{0} revision of a document has a listing")]
    ListingOnDocument(&'static str),
    /// A folder revision carries a body.
    #[error("{0} revision of a folder has a body")]
    BodyOnFolder(&'static str),
    /// A listing contains a malformed item name.
    #[error("{revision} listing has invalid item name '{name}'")]
    InvalidItemName {
        /// Which revision holds the listing.
        revision: &'static str,
        /// The offending name.
        name: String,
    },
    /// The record is stored under a different key than its path.
    #[error("stored under '{0}'")]
    KeyMismatch(String),
}

/// Checks a node for structural damage.
#[must_use]
pub fn corruption(node: &Node) -> Option<Corruption> {
    if validate_path(&node.path).is_err() {
        return Some(Corruption::InvalidPath);
    }
    let Some(common) = &node.common else {
        return Some(Corruption::MissingCommon);
    };
    let folder = is_folder(&node.path);
    let revisions = [
        ("common", Some(common)),
        ("local", node.local.as_ref()),
        ("remote", node.remote.as_ref()),
        ("push", node.push.as_ref()),
    ];
    revisions
        .into_iter()
        .filter_map(|(name, rev)| rev.map(|r| (name, r)))
        .find_map(|(name, rev)| revision_corruption(name, rev, folder))
}

/// Like [`corruption`], but also checks the key the node was stored under.
#[must_use]
pub fn corruption_at(key: &str, node: &Node) -> Option<Corruption> {
    if node.path != key {
        return Some(Corruption::KeyMismatch(key.to_string()));
    }
    corruption(node)
}

/// Returns true if the node is structurally damaged.
#[must_use]
pub fn is_corrupt(node: &Node) -> bool {
    corruption(node).is_some()
}

fn revision_corruption(name: &'static str, rev: &Revision, folder: bool) -> Option<Corruption> {
    if folder {
        if rev.body.is_some() {
            return Some(Corruption::BodyOnFolder(name));
        }
    } else if rev.items_map.is_some() {
        return Some(Corruption::ListingOnDocument(name));
    }
    rev.items_map
        .iter()
        .flat_map(|items| items.keys())
        .find(|item| !is_valid_item_name(item))
        .map(|item| Corruption::InvalidItemName {
            revision: name,
            name: item.clone(),
        })
}
