//! Document bodies.

use serde::{Deserialize, Serialize};

/// The body of a document revision.
///
/// `Deleted` is the tombstone: in a `local` revision it marks a pending
/// local deletion, in a `remote` revision it records that the remote
/// confirmed the document is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Body {
    /// Tombstone.
    Deleted,
    /// UTF-8 text.
    Text(String),
    /// Parsed JSON document.
    Json(serde_json::Value),
    /// Opaque binary payload.
    Binary(Vec<u8>),
}

impl Body {
    /// Returns true for the tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self, Body::Deleted)
    }

    /// Returns the body unless it is a tombstone.
    #[must_use]
    pub fn live(&self) -> Option<&Body> {
        if self.is_deleted() {
            None
        } else {
            Some(self)
        }
    }

    /// Serialized form used when sending the body over the wire.
    ///
    /// Returns `None` for the tombstone.
    #[must_use]
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Body::Deleted => None,
            Body::Text(s) => Some(s.as_bytes().to_vec()),
            Body::Json(v) => Some(v.to_string().into_bytes()),
            Body::Binary(b) => Some(b.clone()),
        }
    }

    /// Byte length of the serialized body.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Body::Deleted => 0,
            Body::Text(s) => s.len(),
            Body::Json(v) => v.to_string().len(),
            Body::Binary(b) => b.len(),
        }
    }

    /// Returns true if the serialized body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_string())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<serde_json::Value> for Body {
    fn from(v: serde_json::Value) -> Self {
        Body::Json(v)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::Binary(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_is_not_live() {
        assert!(Body::Deleted.live().is_none());
        assert!(Body::Deleted.to_bytes().is_none());
        assert_eq!(Body::from("x").live(), Some(&Body::Text("x".into())));
    }

    #[test]
    fn json_bytes() {
        let body = Body::from(serde_json::json!({"a": 1}));
        assert_eq!(body.to_bytes().unwrap(), br#"{"a":1}"#.to_vec());
        assert_eq!(body.len(), 7);
    }
}
