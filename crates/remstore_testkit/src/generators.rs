//! Property-based test generators using proptest.
//!
//! Provides strategies for generating bodies, paths and nodes that keep
//! the structural invariants of cached records.

use proptest::prelude::*;
use remstore_node::{Body, Node, Revision};

use crate::builder::NodeBuilder;

/// Strategy for generating a valid item name. Folder names end with `/`.
pub fn arb_item_name() -> impl Strategy<Value = String> {
    (
        prop::string::string_regex("[a-z0-9_-]{1,8}").expect("Invalid regex"),
        any::<bool>(),
    )
        .prop_map(|(name, folder)| if folder { format!("{name}/") } else { name })
}

/// Strategy for generating an absolute document path.
pub fn arb_document_path() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop::string::string_regex("[a-z0-9_-]{1,8}").expect("Invalid regex"),
        1..4,
    )
    .prop_map(|segments| format!("/{}", segments.join("/")))
}

/// Strategy for generating an absolute folder path.
pub fn arb_folder_path() -> impl Strategy<Value = String> {
    arb_document_path().prop_map(|path| format!("{path}/"))
}

/// Strategy for generating a live document body.
pub fn arb_body() -> impl Strategy<Value = Body> {
    prop_oneof![
        ".{0,32}".prop_map(Body::Text),
        prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..4).prop_map(|fields| {
            Body::Json(serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ))
        }),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Body::Binary),
    ]
}

/// Strategy for generating a content type.
pub fn arb_content_type() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("text/plain".to_string()),
        Just("application/json".to_string()),
        Just("application/octet-stream".to_string()),
    ]
}

/// Strategy for generating a revision tag.
pub fn arb_revision_tag() -> impl Strategy<Value = String> {
    prop::string::string_regex("r[0-9]{1,4}").expect("Invalid regex")
}

/// A document revision as generated: content or tombstone.
fn arb_document_revision() -> impl Strategy<Value = Revision> {
    prop_oneof![
        4 => (arb_body(), arb_content_type())
            .prop_map(|(body, ct)| Revision::default().with_body(body, Some(ct))),
        1 => Just(Revision::default().with_body(Body::Deleted, None)),
    ]
}

/// Strategy for generating a document node in any sync state.
///
/// The node may carry an agreed state, a pending local change (with or
/// without an in-flight push of it) and a remote revision that is bare,
/// materialized or a confirmed deletion.
pub fn arb_document_node() -> impl Strategy<Value = Node> {
    (
        arb_document_path(),
        prop::option::of((arb_body(), arb_content_type(), arb_revision_tag())),
        prop::option::of((arb_document_revision(), any::<bool>())),
        prop::option::of((prop::option::of(arb_document_revision()), arb_revision_tag())),
    )
        .prop_map(|(path, common, local, remote)| {
            let mut builder = NodeBuilder::new(&path);
            if let Some((body, ct, rev)) = common {
                builder = builder.common_body(body, &ct, &rev);
            }
            let mut node = builder.build();
            if let Some((local, pushed)) = local {
                if pushed {
                    node.push = Some(local.clone());
                }
                node.local = Some(local);
            }
            if let Some((content, tag)) = remote {
                let mut remote = content.unwrap_or_default();
                if !remote.is_deletion() {
                    remote.revision = Some(tag);
                }
                node.remote = Some(remote);
            }
            node
        })
}

/// Strategy for generating a folder node with a fetched remote listing.
pub fn arb_folder_node() -> impl Strategy<Value = Node> {
    (
        arb_folder_path(),
        prop::collection::btree_set(arb_item_name(), 0..5),
        arb_revision_tag(),
        prop::option::of(prop::collection::btree_map(arb_item_name(), any::<bool>(), 0..5)),
        prop::option::of(prop::collection::btree_set(arb_item_name(), 0..5)),
        arb_revision_tag(),
    )
        .prop_map(|(path, common, common_rev, local, remote, remote_rev)| {
            let mut builder = NodeBuilder::new(&path).common_items(common, &common_rev);
            if let Some(local) = local {
                builder = builder.local_items(local);
            }
            match remote {
                Some(items) => builder.remote_items(items, &remote_rev),
                None => builder.remote_revision(&remote_rev),
            }
            .build()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use remstore_node::{is_corrupt, validate_document_path, validate_path};

    proptest! {
        #[test]
        fn document_paths_are_valid(path in arb_document_path()) {
            prop_assert!(validate_document_path(&path).is_ok());
        }

        #[test]
        fn folder_paths_are_valid(path in arb_folder_path()) {
            prop_assert!(validate_path(&path).is_ok());
        }

        #[test]
        fn generated_nodes_are_well_formed(
            doc in arb_document_node(),
            folder in arb_folder_node(),
        ) {
            prop_assert!(!is_corrupt(&doc));
            prop_assert!(!is_corrupt(&folder));
            prop_assert!(folder.remote.is_some());
        }
    }
}
