//! Inspect command implementation.

use remstore_node::{corruption_at, Node};
use serde::Serialize;
use std::path::Path;

use super::open_store;

/// Store inspection result.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Number of stored records.
    pub node_count: usize,
    /// Number of folder nodes.
    pub folders: usize,
    /// Number of document nodes.
    pub documents: usize,
    /// Nodes with a local change not yet agreed with the remote.
    pub pending_local: usize,
    /// Nodes with a push in flight.
    pub pushing: usize,
    /// Nodes with both a local change and fetched remote content.
    pub conflicts: usize,
    /// Nodes with a remote revision whose content was not fetched yet.
    pub awaiting_fetch: usize,
    /// Structurally damaged records.
    pub corrupt: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let mut result = summarize(&store.records());
    result.path = path.display().to_string();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Counts records by kind and sync state.
pub fn summarize(records: &[(String, Node)]) -> InspectResult {
    let mut result = InspectResult {
        node_count: records.len(),
        ..InspectResult::default()
    };
    for (key, node) in records {
        if corruption_at(key, node).is_some() {
            result.corrupt += 1;
            continue;
        }
        if node.is_folder() {
            result.folders += 1;
        } else {
            result.documents += 1;
        }
        if node.local.is_some() {
            result.pending_local += 1;
        }
        if node.push.is_some() {
            result.pushing += 1;
        }
        if node.in_conflict() {
            result.conflicts += 1;
        }
        if node.remote.as_ref().is_some_and(|r| !r.has_content()) {
            result.awaiting_fetch += 1;
        }
    }
    result
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();
    println!("Nodes");
    println!("  Total:          {}", result.node_count);
    println!("  Folders:        {}", result.folders);
    println!("  Documents:      {}", result.documents);
    println!("  Corrupt:        {}", result.corrupt);
    println!();
    println!("Sync state");
    println!("  Local changes:  {}", result.pending_local);
    println!("  Pushing:        {}", result.pushing);
    println!("  Conflicts:      {}", result.conflicts);
    println!("  Awaiting fetch: {}", result.awaiting_fetch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use remstore_testkit::{text, NodeBuilder};

    fn keyed(node: Node) -> (String, Node) {
        (node.path.clone(), node)
    }

    #[test]
    fn counts_sync_state() {
        let records = vec![
            keyed(NodeBuilder::new("/a/").common_items(["b", "c"], "f1").build()),
            keyed(
                NodeBuilder::new("/a/b")
                    .common_body(text("x"), "text/plain", "r1")
                    .local_body(text("y"), "text/plain")
                    .push_body(text("y"), "text/plain")
                    .build(),
            ),
            keyed(
                NodeBuilder::new("/a/c")
                    .common_body(text("x"), "text/plain", "r1")
                    .local_body(text("y"), "text/plain")
                    .remote_body(text("z"), "text/plain", "r2")
                    .build(),
            ),
            keyed(NodeBuilder::new("/a/d").remote_revision("r5").build()),
        ];
        let result = summarize(&records);
        assert_eq!(result.node_count, 4);
        assert_eq!(result.folders, 1);
        assert_eq!(result.documents, 3);
        assert_eq!(result.pending_local, 2);
        assert_eq!(result.pushing, 1);
        assert_eq!(result.conflicts, 1);
        assert_eq!(result.awaiting_fetch, 1);
        assert_eq!(result.corrupt, 0);
    }

    #[test]
    fn corrupt_records_are_only_counted_as_corrupt() {
        let records = vec![
            ("/x".to_string(), Node::unreadable("/x")),
            ("/y".to_string(), NodeBuilder::new("/z").build()),
        ];
        let result = summarize(&records);
        assert_eq!(result.corrupt, 2);
        assert_eq!(result.documents, 0);
    }
}
