//! Dump command implementation.

use remstore_node::Node;
use std::path::Path;

use super::open_store;

/// Runs the dump command.
pub fn run(
    path: &Path,
    prefix: Option<&str>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let nodes = select(store.records(), prefix, limit);
    println!("{}", serde_json::to_string_pretty(&nodes)?);
    Ok(())
}

/// Picks the nodes to print, in path order.
pub fn select(
    records: Vec<(String, Node)>,
    prefix: Option<&str>,
    limit: Option<usize>,
) -> Vec<Node> {
    records
        .into_iter()
        .filter(|(key, _)| prefix.map_or(true, |p| key.starts_with(p)))
        .map(|(_, node)| node)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}
