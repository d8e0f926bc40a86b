//! Merging fetched remote state into cached nodes.
//!
//! [`auto_merge`] consumes a node's `remote` revision once its content is
//! known. Documents with a concurrent local change are settled by the
//! [`ConflictPolicy`]; folders merge listings and never conflict.

use std::collections::BTreeSet;

use remstore_core::{ChangeEvent, ChangeValue, Origin};
use remstore_node::{ItemsMap, Node, Revision};
use tracing::debug;

/// How a conflicting local document change is settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConflictPolicy {
    /// The remote value replaces the local change, which is reported in a
    /// `conflict` change event.
    #[default]
    RemoteWins,
    /// The remote revision becomes the base for the local change, which
    /// is pushed again on the next cycle.
    LocalWins,
}

impl ConflictPolicy {
    /// Returns the policy name.
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictPolicy::RemoteWins => "remote-wins",
            ConflictPolicy::LocalWins => "local-wins",
        }
    }
}

/// Merges the node's `remote` revision.
///
/// Bare remote revisions (tag only) are kept until their content is
/// fetched. Returns `None` when the merge confirmed the document is gone.
/// Events for the application are appended to `events`.
pub fn auto_merge(
    mut node: Node,
    policy: ConflictPolicy,
    events: &mut Vec<ChangeEvent>,
) -> Option<Node> {
    let Some(remote) = node.remote.take() else {
        return Some(node);
    };
    if node.is_folder() {
        Some(merge_folder(node, remote, events))
    } else {
        merge_document(node, remote, policy, events)
    }
}

fn merge_folder(mut node: Node, remote: Revision, events: &mut Vec<ChangeEvent>) -> Node {
    let Some(items) = remote.items_map.clone() else {
        node.remote = Some(remote);
        return node;
    };

    match node.local.as_mut() {
        None => {
            let old = node.common.as_ref().and_then(|c| c.items_map.as_ref());
            let event = ChangeEvent::new(node.path.clone(), Origin::Remote)
                .with_old(ChangeValue::folder(old), None)
                .with_new(ChangeValue::folder(Some(&items)), None);
            if !event.is_noop() {
                events.push(event);
            }
        }
        Some(local) => {
            let listing = local.items_map.get_or_insert_with(ItemsMap::new);
            for name in items.keys() {
                listing.entry(name.clone()).or_insert(false);
            }
            listing.retain(|name, present| *present || items.contains_key(name));
        }
    }
    node.common = Some(remote);
    converge_folder(&mut node);
    node
}

fn merge_document(
    mut node: Node,
    remote: Revision,
    policy: ConflictPolicy,
    events: &mut Vec<ChangeEvent>,
) -> Option<Node> {
    if !remote.has_content() {
        if node.local.is_some() {
            node.push = None;
        }
        node.remote = Some(remote);
        return Some(node);
    }

    let Some(local) = node.local.take() else {
        let (old, old_type) = document_value(node.common.as_ref());
        let (new, new_type) = document_value(Some(&remote));
        let event = ChangeEvent::new(node.path.clone(), Origin::Remote)
            .with_old(old, old_type)
            .with_new(new, new_type);
        if !event.is_noop() {
            events.push(event);
        }
        if remote.is_deletion() {
            return None;
        }
        node.common = Some(remote);
        return Some(node);
    };

    node.push = None;
    if agrees(&local, &remote) {
        if remote.is_deletion() {
            return None;
        }
        node.common = Some(remote);
        return Some(node);
    }

    match policy {
        ConflictPolicy::RemoteWins => {
            debug!(path = %node.path, "conflict: remote value kept");
            let (old, old_type) = document_value(Some(&local));
            let (new, new_type) = document_value(Some(&remote));
            events.push(
                ChangeEvent::new(node.path.clone(), Origin::Conflict)
                    .with_old(old, old_type)
                    .with_new(new, new_type),
            );
            if remote.is_deletion() {
                return None;
            }
            node.common = Some(remote);
        }
        ConflictPolicy::LocalWins => {
            debug!(path = %node.path, "conflict: local value kept");
            node.common = Some(remote);
            node.local = Some(local);
        }
    }
    Some(node)
}

fn agrees(local: &Revision, remote: &Revision) -> bool {
    if local.body != remote.body {
        return false;
    }
    local.is_deletion() || local.content_type == remote.content_type
}

fn document_value(revision: Option<&Revision>) -> (Option<ChangeValue>, Option<String>) {
    match revision {
        Some(rev) => (
            ChangeValue::document(rev.body.as_ref()),
            rev.content_type.clone(),
        ),
        None => (None, None),
    }
}

/// Drops a folder's `local` listing once it says nothing `common` does
/// not.
pub fn converge_folder(node: &mut Node) {
    let Some(local) = &node.local else {
        return;
    };
    if local.has_deletion_markers() {
        return;
    }
    let common = node
        .common
        .as_ref()
        .map(Revision::live_items)
        .unwrap_or_default();
    if local.live_items() == common {
        node.local = None;
    }
}

/// Resolves the `false` markers of a folder's local listing.
///
/// Markers stay for children in `pending_deletions`. Markers for children
/// the common listing no longer has are removed; any other marker names a
/// child that exists remotely and was never deleted here, so it is
/// restored.
pub fn settle_folder_markers(node: &mut Node, pending_deletions: &BTreeSet<String>) {
    let common = node
        .common
        .as_ref()
        .and_then(|c| c.items_map.clone())
        .unwrap_or_default();
    if let Some(listing) = node.local.as_mut().and_then(|l| l.items_map.as_mut()) {
        listing.retain(|name, present| *present || common.contains_key(name));
        for (name, present) in listing.iter_mut() {
            if !*present && !pending_deletions.contains(name) {
                *present = true;
            }
        }
    }
    converge_folder(node);
}

/// Returns true if the node carries a local deletion not yet pushed.
///
/// A folder counts when its local listing has no live children left.
pub fn is_pending_deletion(node: &Node) -> bool {
    let Some(local) = &node.local else {
        return false;
    };
    if node.is_folder() {
        local.items_map.is_some() && local.live_items().is_empty()
    } else {
        local.is_deletion()
    }
}
