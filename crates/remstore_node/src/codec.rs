//! CBOR encoding for nodes and node snapshots.
//!
//! Each node is encoded as its own CBOR record. A snapshot is a CBOR map
//! from path to the raw record bytes, so one damaged record can be
//! reported on its own without failing the whole snapshot.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use ciborium::value::Value;

use crate::error::{NodeError, NodeResult};
use crate::node::Node;

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u64 = 1;

const KEY_VERSION: &str = "version";
const KEY_NODES: &str = "nodes";

/// Encodes a single node.
pub fn encode_node(node: &Node) -> NodeResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(node, &mut out)
        .map_err(|e| NodeError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decodes a single node.
pub fn decode_node(bytes: &[u8]) -> NodeResult<Node> {
    ciborium::de::from_reader(bytes).map_err(|e| NodeError::decoding_failed(e.to_string()))
}

/// Encodes a snapshot of raw node records keyed by path.
pub fn encode_snapshot(records: &BTreeMap<String, Vec<u8>>) -> NodeResult<Vec<u8>> {
    let nodes = records
        .iter()
        .map(|(path, bytes)| (Value::Text(path.clone()), Value::Bytes(bytes.clone())))
        .collect();
    let root = Value::Map(vec![
        (Value::Text(KEY_VERSION.into()), Value::Integer(SNAPSHOT_VERSION.into())),
        (Value::Text(KEY_NODES.into()), Value::Map(nodes)),
    ]);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&root, &mut out)
        .map_err(|e| NodeError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decodes a snapshot into raw node records keyed by path.
///
/// Empty input is an empty snapshot.
pub fn decode_snapshot(bytes: &[u8]) -> NodeResult<BTreeMap<String, Vec<u8>>> {
    if bytes.is_empty() {
        return Ok(BTreeMap::new());
    }
    let root: Value =
        ciborium::de::from_reader(bytes).map_err(|e| NodeError::decoding_failed(e.to_string()))?;
    let Value::Map(entries) = root else {
        return Err(NodeError::invalid_structure("snapshot root is not a map"));
    };

    let mut version = None;
    let mut nodes = None;
    for (key, value) in entries {
        match (key.as_text(), value) {
            (Some(KEY_VERSION), Value::Integer(v)) => version = u64::try_from(v).ok(),
            (Some(KEY_NODES), Value::Map(map)) => nodes = Some(map),
            _ => {}
        }
    }
    match version {
        Some(SNAPSHOT_VERSION) => {}
        Some(other) => {
            return Err(NodeError::invalid_structure(format!(
                "unsupported snapshot version {other}"
            )))
        }
        None => return Err(NodeError::invalid_structure("missing snapshot version")),
    }

    let mut records = BTreeMap::new();
    for (key, value) in nodes.unwrap_or_default() {
        match (key, value) {
            (Value::Text(path), Value::Bytes(bytes)) => {
                records.insert(path, bytes);
            }
            _ => return Err(NodeError::invalid_structure("snapshot entry is not path -> bytes")),
        }
    }
    Ok(records)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
