//! Verify command implementation.

use remstore_node::{corruption_at, Node};
use std::path::Path;

use super::open_store;

/// One damaged record.
#[derive(Debug, PartialEq, Eq)]
pub struct Finding {
    /// Key the record is stored under.
    pub key: String,
    /// What is wrong with it.
    pub reason: String,
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let store = open_store(path)?;
    let records = store.records();
    let findings = check(&records);
    for finding in &findings {
        println!("  {}: {}", finding.key, finding.reason);
    }

    println!();
    println!("Records checked: {}", records.len());
    if findings.is_empty() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ {} corrupt record(s); they are fetched again on the next sync", findings.len());
        Err("Verification failed".into())
    }
}

/// Returns every structurally damaged record.
pub fn check(records: &[(String, Node)]) -> Vec<Finding> {
    records
        .iter()
        .filter_map(|(key, node)| {
            corruption_at(key, node).map(|reason| Finding {
                key: key.clone(),
                reason: reason.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use remstore_node::Revision;
    use remstore_testkit::{text, NodeBuilder};

    #[test]
    fn reports_each_defect() {
        let mut folder_with_body = NodeBuilder::new("/f/").build();
        folder_with_body.local = Some(Revision::default().with_body(text("x"), None));

        let records = vec![
            ("/ok".to_string(), NodeBuilder::new("/ok").build()),
            ("/gone".to_string(), Node::unreadable("/gone")),
            ("/f/".to_string(), folder_with_body),
            ("/moved".to_string(), NodeBuilder::new("/elsewhere").build()),
        ];
        let findings = check(&records);
        let keys: Vec<&str> = findings.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["/gone", "/f/", "/moved"]);
        assert_eq!(findings[0].reason, "missing common revision");
        assert_eq!(findings[1].reason, "local revision of a folder has a body");
    }
}
