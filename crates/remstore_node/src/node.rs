//! Cached node model.
//!
//! A [`Node`] is the cached state of one path. It carries up to four
//! revisions:
//!
//! - `common`: the state local and remote last agreed on
//! - `local`: a pending local change not yet pushed
//! - `remote`: a fetched remote state not yet merged
//! - `push`: the snapshot of `local` taken when a push was issued

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::body::Body;
use crate::path::is_folder;

/// Folder listing: relative child name to presence flag.
///
/// In a `local` revision a `false` value marks a child whose deletion has
/// not been confirmed yet.
pub type ItemsMap = BTreeMap<String, bool>;

/// A batch of nodes keyed by path. `None` means "absent" on read and
/// "delete" on write.
pub type NodeMap = BTreeMap<String, Option<Node>>;

/// One revision of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// When this revision was recorded, in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Remote revision tag (ETag).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Document body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    /// Document content type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Document length as reported by a folder listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    /// Folder listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_map: Option<ItemsMap>,
    /// Body before the local write that produced this revision.
    ///
    /// Only used to build change events; never persisted.
    #[serde(skip)]
    pub previous_body: Option<Body>,
    /// Content type before the local write that produced this revision.
    #[serde(skip)]
    pub previous_content_type: Option<String>,
}

impl Revision {
    /// Creates a revision stamped with `now`.
    #[must_use]
    pub fn at(now: u64) -> Self {
        Self {
            timestamp: Some(now),
            ..Self::default()
        }
    }

    /// Sets the revision tag.
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Sets the body and content type.
    #[must_use]
    pub fn with_body(mut self, body: Body, content_type: Option<String>) -> Self {
        self.body = Some(body);
        self.content_type = content_type;
        self
    }

    /// Sets the folder listing.
    #[must_use]
    pub fn with_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items_map = Some(items.into_iter().map(|i| (i.into(), true)).collect());
        self
    }

    /// Returns true if the revision carries a body or a listing.
    ///
    /// A revision with only a tag is "bare": the remote is known to hold
    /// something newer, but it has not been retrieved yet.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.body.is_some() || self.items_map.is_some()
    }

    /// Returns true if the body is the tombstone.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        matches!(self.body, Some(Body::Deleted))
    }

    /// Returns the body unless absent or a tombstone.
    #[must_use]
    pub fn live_body(&self) -> Option<&Body> {
        self.body.as_ref().and_then(Body::live)
    }

    /// Returns the listing entries that are present.
    #[must_use]
    pub fn live_items(&self) -> ItemsMap {
        self.items_map
            .iter()
            .flatten()
            .filter(|(_, present)| **present)
            .map(|(name, _)| (name.clone(), true))
            .collect()
    }

    /// Returns true if the listing contains a `false` marker.
    #[must_use]
    pub fn has_deletion_markers(&self) -> bool {
        self.items_map
            .as_ref()
            .is_some_and(|items| items.values().any(|present| !present))
    }

    /// Drops the fields that only exist to build change events.
    pub fn clear_previous(&mut self) {
        self.previous_body = None;
        self.previous_content_type = None;
    }
}

/// Cached state of one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Absolute path of the node.
    pub path: String,
    /// Last agreed state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common: Option<Revision>,
    /// Pending local change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<Revision>,
    /// Fetched remote state awaiting merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<Revision>,
    /// Snapshot of `local` for an in-flight push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<Revision>,
    /// Body of a legacy record without revisions.
    #[serde(default, rename = "body", skip_serializing_if = "Option::is_none")]
    pub legacy_body: Option<serde_json::Value>,
    /// Content type of a legacy record without revisions.
    #[serde(
        default,
        rename = "contentType",
        skip_serializing_if = "Option::is_none"
    )]
    pub legacy_content_type: Option<String>,
}

impl Node {
    /// Creates an empty node. Folders start with an empty listing.
    #[must_use]
    pub fn new(path: impl Into<String>, now: u64) -> Self {
        let path = path.into();
        let mut common = Revision::at(now);
        if is_folder(&path) {
            common.items_map = Some(ItemsMap::new());
        }
        Self {
            common: Some(common),
            ..Self::blank(path)
        }
    }

    /// Creates a node known to exist remotely whose content has not been
    /// retrieved yet.
    ///
    /// Its `common` revision is empty, so the node needs a fetch.
    #[must_use]
    pub fn bare(path: impl Into<String>) -> Self {
        Self {
            common: Some(Revision::default()),
            ..Self::blank(path.into())
        }
    }

    /// Placeholder for a stored record that could not be decoded.
    ///
    /// It has no revisions at all, so it is classified as corrupt and
    /// re-fetched.
    #[must_use]
    pub fn unreadable(path: impl Into<String>) -> Self {
        Self::blank(path.into())
    }

    fn blank(path: String) -> Self {
        Self {
            path,
            common: None,
            local: None,
            remote: None,
            push: None,
            legacy_body: None,
            legacy_content_type: None,
        }
    }

    /// Returns true if this node is a folder.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        is_folder(&self.path)
    }

    /// Returns the revision an application read should see.
    ///
    /// `local` wins over `common`. A pending local deletion hides the
    /// document.
    #[must_use]
    pub fn latest(&self) -> Option<&Revision> {
        if self.is_folder() {
            if let Some(local) = self.local.as_ref().filter(|r| r.items_map.is_some()) {
                return Some(local);
            }
            return self.common.as_ref().filter(|r| r.items_map.is_some());
        }
        if let Some(local) = &self.local {
            if local.is_deletion() {
                return None;
            }
            if local.body.is_some() {
                return Some(local);
            }
        }
        self.common.as_ref().filter(|r| r.live_body().is_some())
    }

    /// Returns true when both a local change and materialized remote
    /// content are present.
    #[must_use]
    pub fn in_conflict(&self) -> bool {
        self.local.is_some() && self.remote.as_ref().is_some_and(Revision::has_content)
    }

    /// Returns true if the node should be fetched from the remote.
    #[must_use]
    pub fn needs_fetch(&self) -> bool {
        if self.in_conflict() {
            return true;
        }
        if self.common.as_ref().is_some_and(|c| !c.has_content()) {
            return true;
        }
        self.remote.as_ref().is_some_and(|r| !r.has_content())
    }

    /// Returns true if the node has a local change that is not being
    /// pushed yet.
    #[must_use]
    pub fn needs_push(&self) -> bool {
        !self.in_conflict() && self.local.is_some() && self.push.is_none()
    }

    /// Returns true if the node has a local change that was never agreed
    /// with the remote.
    #[must_use]
    pub fn is_pending_creation(&self) -> bool {
        self.local.is_some()
            && self
                .common
                .as_ref()
                .map_or(true, |c| c.revision.is_none())
    }

    /// Returns true if the record still uses the legacy flat layout.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.common.is_none() && (self.legacy_body.is_some() || self.legacy_content_type.is_some())
    }

    /// Upgrades a legacy record in place.
    ///
    /// Returns true if the node changed.
    pub fn migrate(&mut self) -> bool {
        if !self.is_legacy() {
            return false;
        }
        let legacy_body = self.legacy_body.take();
        let legacy_content_type = self.legacy_content_type.take();
        let mut common = Revision::default();
        if self.is_folder() {
            if let Some(serde_json::Value::Object(items)) = legacy_body {
                common.items_map = Some(
                    items
                        .into_iter()
                        .map(|(name, v)| {
                            let present = v.as_bool().unwrap_or(!v.is_null());
                            (name, present)
                        })
                        .collect(),
                );
            }
        } else if let Some(body) = legacy_body {
            let local = self.local.get_or_insert_with(Revision::default);
            local.body = Some(match body {
                serde_json::Value::String(s) => Body::Text(s),
                other => Body::Json(other),
            });
            local.content_type = legacy_content_type;
        }
        self.common = Some(common);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_nodes_await_content() {
        for path in ["/a/doc", "/a/"] {
            let node = Node::bare(path);
            assert!(!crate::is_corrupt(&node), "{path}");
            assert!(node.needs_fetch(), "{path}");
            assert!(node.latest().map_or(true, |r| !r.has_content()), "{path}");
        }
        assert!(crate::is_corrupt(&Node::unreadable("/a/doc")));
    }

    #[test]
    fn new_folder_has_listing() {
        let folder = Node::new("/foo/", 5);
        assert_eq!(folder.common.as_ref().unwrap().items_map, Some(ItemsMap::new()));
        let doc = Node::new("/foo/bar", 5);
        assert!(doc.common.as_ref().unwrap().items_map.is_none());
        assert_eq!(doc.common.as_ref().unwrap().timestamp, Some(5));
    }

    #[test]
    fn latest_prefers_local() {
        let mut node = Node::new("/a", 1);
        node.common = Some(Revision::at(1).with_body("old".into(), Some("text/plain".into())));
        assert_eq!(node.latest().unwrap().body, Some(Body::from("old")));
        node.local = Some(Revision::at(2).with_body("new".into(), Some("text/plain".into())));
        assert_eq!(node.latest().unwrap().body, Some(Body::from("new")));
        node.local = Some(Revision::at(3).with_body(Body::Deleted, None));
        assert!(node.latest().is_none());
    }

    #[test]
    fn conflict_requires_content() {
        let mut node = Node::new("/a", 1);
        node.local = Some(Revision::at(1).with_body("x".into(), None));
        node.remote = Some(Revision::at(1).with_revision("r1"));
        assert!(!node.in_conflict());
        assert!(node.needs_fetch());
        node.remote = Some(Revision::at(1).with_body("y".into(), None));
        assert!(node.in_conflict());
        assert!(!node.needs_push());
    }

    #[test]
    fn push_pending() {
        let mut node = Node::new("/a", 1);
        node.local = Some(Revision::at(1).with_body("x".into(), None));
        assert!(node.needs_push());
        assert!(node.is_pending_creation());
        node.push = node.local.clone();
        assert!(!node.needs_push());
    }

    #[test]
    fn migrate_legacy_document() {
        let mut node: Node =
            serde_json::from_str(r#"{"path":"/doc","body":"hi","contentType":"text/plain"}"#).unwrap();
        assert!(node.is_legacy());
        assert!(node.migrate());
        assert!(!node.migrate());
        assert_eq!(node.common, Some(Revision::default()));
        let local = node.local.unwrap();
        assert_eq!(local.body, Some(Body::from("hi")));
        assert_eq!(local.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn migrate_legacy_folder() {
        let mut node: Node =
            serde_json::from_str(r#"{"path":"/dir/","body":{"a":true,"b/":true}}"#).unwrap();
        assert!(node.migrate());
        assert_eq!(node.common.unwrap().live_items().len(), 2);
        assert!(node.legacy_body.is_none());
    }

    #[test]
    fn live_items_skip_markers() {
        let mut rev = Revision::at(1).with_items(["a", "b"]);
        rev.items_map.as_mut().unwrap().insert("c".into(), false);
        assert!(rev.has_deletion_markers());
        assert_eq!(rev.live_items().keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
