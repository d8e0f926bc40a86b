//! Folder listings as returned by a remote.
//!
//! Every entry maps a child name to its metadata. Which metadata fields
//! an entry must carry depends on the protocol version; see
//! [`ListingRules`].

use std::collections::BTreeMap;

use remstore_node::{is_folder, is_valid_item_name, ListingRules, ProtocolVersion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata of one listing entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMeta {
    /// Revision tag of the child.
    #[serde(rename = "ETag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Content type of a child document.
    #[serde(
        rename = "Content-Type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_type: Option<String>,
    /// Byte length of a child document.
    #[serde(
        rename = "Content-Length",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_length: Option<u64>,
}

impl ItemMeta {
    /// Entry carrying only a revision tag.
    pub fn with_etag(etag: impl Into<String>) -> Self {
        Self {
            etag: Some(etag.into()),
            ..Self::default()
        }
    }

    /// Entry for a document.
    pub fn document(etag: impl Into<String>, content_type: impl Into<String>, length: u64) -> Self {
        Self {
            etag: Some(etag.into()),
            content_type: Some(content_type.into()),
            content_length: Some(length),
        }
    }
}

/// A folder listing: child name to metadata. Subfolder names end with `/`.
pub type FolderListing = BTreeMap<String, ItemMeta>;

/// Why a listing was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListingDefect {
    /// The child name is empty or contains a separator.
    #[error("invalid item name '{0}'")]
    InvalidName(String),
    /// An entry lacks its revision tag.
    #[error("item '{0}' has no ETag")]
    MissingEtag(String),
    /// A document entry lacks its content type.
    #[error("item '{0}' has no Content-Type")]
    MissingContentType(String),
    /// A document entry lacks its content length.
    #[error("item '{0}' has no Content-Length")]
    MissingContentLength(String),
}

/// Returns the first defect of `listing` under `rules`, if any.
#[must_use]
pub fn listing_defect(listing: &FolderListing, rules: ListingRules) -> Option<ListingDefect> {
    for (name, meta) in listing {
        if !is_valid_item_name(name) {
            return Some(ListingDefect::InvalidName(name.clone()));
        }
        if rules.require_etag && meta.etag.is_none() {
            return Some(ListingDefect::MissingEtag(name.clone()));
        }
        if is_folder(name) {
            continue;
        }
        if rules.require_content_type && meta.content_type.is_none() {
            return Some(ListingDefect::MissingContentType(name.clone()));
        }
        if rules.require_content_length && meta.content_length.is_none() {
            return Some(ListingDefect::MissingContentLength(name.clone()));
        }
    }
    None
}

/// Returns true if `listing` is unusable under `protocol`'s rules.
#[must_use]
pub fn is_corrupt_listing(listing: &FolderListing, protocol: ProtocolVersion) -> bool {
    listing_defect(listing, protocol.listing_rules()).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn listing(entries: &[(&str, ItemMeta)]) -> FolderListing {
        entries
            .iter()
            .map(|(n, m)| ((*n).to_string(), m.clone()))
            .collect()
    }

    #[test]
    fn draft_02_requires_document_metadata() {
        let bare = listing(&[("a", ItemMeta::with_etag("1"))]);
        assert_eq!(
            listing_defect(&bare, ProtocolVersion::Draft02.listing_rules()),
            Some(ListingDefect::MissingContentType("a".into()))
        );
        assert!(!is_corrupt_listing(&bare, ProtocolVersion::Draft01));

        let full = listing(&[
            ("a", ItemMeta::document("1", "text/plain", 3)),
            ("sub/", ItemMeta::with_etag("2")),
        ]);
        assert!(!is_corrupt_listing(&full, ProtocolVersion::Draft02));
        assert!(!is_corrupt_listing(&full, ProtocolVersion::Head));
    }

    #[test]
    fn every_version_requires_etag() {
        let no_tag = listing(&[("sub/", ItemMeta::default())]);
        for version in ProtocolVersion::ALL {
            assert!(is_corrupt_listing(&no_tag, version), "{version:?}");
        }
    }

    #[test]
    fn rejects_bad_names() {
        let bad = listing(&[("a/b", ItemMeta::with_etag("1"))]);
        assert_eq!(
            listing_defect(&bad, ProtocolVersion::Draft00.listing_rules()),
            Some(ListingDefect::InvalidName("a/b".into()))
        );
    }

    #[test]
    fn defects_describe_the_entry() {
        let defect = ListingDefect::MissingContentLength("a".into());
        assert_eq!(defect.to_string(), "item 'a' has no Content-Length");
        let err: &dyn std::error::Error = &defect;
        assert!(err.source().is_none());
    }

    #[test]
    fn wire_field_names() {
        let meta: ItemMeta = serde_json::from_str(
            r#"{"ETag":"abc","Content-Type":"text/plain","Content-Length":5}"#,
        )
        .unwrap();
        assert_eq!(meta, ItemMeta::document("abc", "text/plain", 5));
        let json = serde_json::to_string(&ItemMeta::with_etag("x")).unwrap();
        assert_eq!(json, r#"{"ETag":"x"}"#);
    }

    proptest! {
        #[test]
        fn complete_listings_pass_every_version(
            docs in prop::collection::btree_map("[a-z]{1,8}", (any::<u32>(), 0u64..4096), 0..6),
            folders in prop::collection::btree_set("[a-z]{1,8}", 0..4),
        ) {
            let mut listing = FolderListing::new();
            for (name, (tag, len)) in docs {
                listing.insert(name, ItemMeta::document(tag.to_string(), "text/plain", len));
            }
            for name in folders {
                listing.insert(format!("{name}/"), ItemMeta::with_etag("f"));
            }
            for version in ProtocolVersion::ALL {
                prop_assert!(!is_corrupt_listing(&listing, version));
            }
        }
    }
}
