//! Remote protocol versions and the listing rules that go with them.

use serde::{Deserialize, Serialize};

/// Storage API version announced by a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// The 2012.04 read-write-web API.
    Api201204,
    /// draft-dejong-remotestorage-00
    Draft00,
    /// draft-dejong-remotestorage-01
    Draft01,
    /// draft-dejong-remotestorage-02
    Draft02,
    /// Any newer, unrecognized draft.
    Head,
}

/// Fields a folder listing entry must carry to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingRules {
    /// Every entry needs an `ETag`.
    pub require_etag: bool,
    /// Document entries need `Content-Type`.
    pub require_content_type: bool,
    /// Document entries need `Content-Length`.
    pub require_content_length: bool,
}

const RULES_PRE_02: ListingRules = ListingRules {
    require_etag: true,
    require_content_type: false,
    require_content_length: false,
};

const RULES_02: ListingRules = ListingRules {
    require_etag: true,
    require_content_type: true,
    require_content_length: true,
};

impl ProtocolVersion {
    /// All known versions, oldest first.
    pub const ALL: [ProtocolVersion; 5] = [
        ProtocolVersion::Api201204,
        ProtocolVersion::Draft00,
        ProtocolVersion::Draft01,
        ProtocolVersion::Draft02,
        ProtocolVersion::Head,
    ];

    /// Maps a storage API identifier to a version.
    ///
    /// Unrecognized identifiers are treated as [`ProtocolVersion::Head`].
    #[must_use]
    pub fn from_storage_api(api: &str) -> Self {
        match api {
            "draft-dejong-remotestorage-00" => Self::Draft00,
            "draft-dejong-remotestorage-01" => Self::Draft01,
            "draft-dejong-remotestorage-02" => Self::Draft02,
            "https://www.w3.org/community/rww/wiki/read-write-web-00#simple" => Self::Api201204,
            _ => Self::Head,
        }
    }

    /// Canonical identifier, where one exists.
    #[must_use]
    pub fn storage_api(self) -> Option<&'static str> {
        match self {
            Self::Api201204 => Some("https://www.w3.org/community/rww/wiki/read-write-web-00#simple"),
            Self::Draft00 => Some("draft-dejong-remotestorage-00"),
            Self::Draft01 => Some("draft-dejong-remotestorage-01"),
            Self::Draft02 => Some("draft-dejong-remotestorage-02"),
            Self::Head => None,
        }
    }

    /// Returns true if the remote supports ETags and conditional requests.
    #[must_use]
    pub fn supports_revisions(self) -> bool {
        self >= Self::Draft00
    }

    /// Returns true if folder listings use the `@context`/`items` format.
    #[must_use]
    pub fn uses_folder_descriptions(self) -> bool {
        self >= Self::Draft02
    }

    /// Listing validation rules for this version.
    #[must_use]
    pub fn listing_rules(self) -> ListingRules {
        if self >= Self::Draft02 {
            RULES_02
        } else {
            RULES_PRE_02
        }
    }

    /// Name of the root scope (`*`) in an OAuth scope parameter.
    #[must_use]
    pub fn root_scope_name(self) -> &'static str {
        match self {
            Self::Api201204 => "",
            Self::Draft00 | Self::Draft01 => "root",
            Self::Draft02 | Self::Head => "*",
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Draft02
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_roundtrip() {
        for version in ProtocolVersion::ALL {
            if let Some(api) = version.storage_api() {
                assert_eq!(ProtocolVersion::from_storage_api(api), version);
            }
        }
        assert_eq!(
            ProtocolVersion::from_storage_api("draft-dejong-remotestorage-03"),
            ProtocolVersion::Head
        );
    }

    #[test]
    fn revisions_from_draft_00() {
        assert!(!ProtocolVersion::Api201204.supports_revisions());
        assert!(ProtocolVersion::Draft00.supports_revisions());
    }

    #[test]
    fn root_scope_names() {
        assert_eq!(ProtocolVersion::Api201204.root_scope_name(), "");
        assert_eq!(ProtocolVersion::Draft01.root_scope_name(), "root");
        assert_eq!(ProtocolVersion::Draft02.root_scope_name(), "*");
    }

    #[test]
    fn rules_table() {
        assert!(!ProtocolVersion::Draft01.listing_rules().require_content_type);
        assert!(ProtocolVersion::Draft02.listing_rules().require_content_length);
        assert!(ProtocolVersion::Head.listing_rules().require_content_type);
    }
}
