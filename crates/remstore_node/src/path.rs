//! Storage path helpers.
//!
//! Paths are absolute and `/`-separated. A trailing separator marks a
//! folder; everything else is a document.

use crate::error::{NodeError, NodeResult};

/// Path separator used by storage paths.
pub const SEPARATOR: char = '/';

/// Returns true if the path denotes a folder.
#[must_use]
pub fn is_folder(path: &str) -> bool {
    path.ends_with(SEPARATOR)
}

/// Returns true if the path denotes a document.
#[must_use]
pub fn is_document(path: &str) -> bool {
    !is_folder(path)
}

/// Checks that a path is absolute.
pub fn validate_path(path: &str) -> NodeResult<()> {
    if !path.starts_with(SEPARATOR) {
        return Err(NodeError::invalid_path(path, "path must start with '/'"));
    }
    if path.contains("//") {
        return Err(NodeError::invalid_path(path, "path contains an empty segment"));
    }
    Ok(())
}

/// Checks that a path is an absolute document path.
pub fn validate_document_path(path: &str) -> NodeResult<()> {
    validate_path(path)?;
    if is_folder(path) {
        return Err(NodeError::invalid_path(path, "expected a document path"));
    }
    Ok(())
}

/// Returns the path followed by every ancestor folder up to `/`.
///
/// ```
/// use remstore_node::nodes_from_root;
///
/// assert_eq!(nodes_from_root("/foo/bar"), vec!["/foo/bar", "/foo/", "/"]);
/// assert_eq!(nodes_from_root("/"), vec!["/"]);
/// ```
#[must_use]
pub fn nodes_from_root(path: &str) -> Vec<String> {
    let mut ret = vec![path.to_string()];
    let trimmed = path.strip_suffix(SEPARATOR).unwrap_or(path);
    let mut parts: Vec<&str> = trimmed.split(SEPARATOR).collect();
    while parts.len() > 1 {
        parts.pop();
        ret.push(format!("{}/", parts.join("/")));
    }
    ret
}

/// Returns the folder directly containing `path`, or `None` for `/`.
#[must_use]
pub fn parent_path(path: &str) -> Option<String> {
    let trimmed = path.strip_suffix(SEPARATOR).unwrap_or(path);
    if trimmed.is_empty() {
        return None;
    }
    let idx = trimmed.rfind(SEPARATOR)?;
    Some(trimmed[..=idx].to_string())
}

/// Like [`parent_path`], but `/` is its own container.
#[must_use]
pub fn containing_folder(path: &str) -> String {
    parent_path(path).unwrap_or_else(|| SEPARATOR.to_string())
}

/// Returns the item name of `child` relative to `folder`.
///
/// Folder children keep their trailing separator.
#[must_use]
pub fn child_name<'a>(folder: &str, child: &'a str) -> &'a str {
    child.strip_prefix(folder).unwrap_or(child)
}

/// Joins a folder path and an item name.
#[must_use]
pub fn join(folder: &str, name: &str) -> String {
    format!("{folder}{name}")
}

/// Returns true if `name` is a valid relative item name.
///
/// Folder names end with exactly one separator; no other separator
/// may appear.
#[must_use]
pub fn is_valid_item_name(name: &str) -> bool {
    let stem = name.strip_suffix(SEPARATOR).unwrap_or(name);
    !stem.is_empty() && !stem.contains(SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn folder_and_document() {
        assert!(is_folder("/"));
        assert!(is_folder("/foo/"));
        assert!(is_document("/foo/bar"));
    }

    #[test]
    fn ancestors_of_folder() {
        assert_eq!(nodes_from_root("/a/b/"), vec!["/a/b/", "/a/", "/"]);
    }

    #[test]
    fn parents() {
        assert_eq!(parent_path("/a/b"), Some("/a/".to_string()));
        assert_eq!(parent_path("/a/b/"), Some("/a/".to_string()));
        assert_eq!(parent_path("/a"), Some("/".to_string()));
        assert_eq!(parent_path("/"), None);
        assert_eq!(containing_folder("/"), "/");
    }

    #[test]
    fn item_names() {
        assert!(is_valid_item_name("bar"));
        assert!(is_valid_item_name("baz/"));
        assert!(!is_valid_item_name(""));
        assert!(!is_valid_item_name("/"));
        assert!(!is_valid_item_name("a/b"));
        assert!(!is_valid_item_name("a//"));
        assert_eq!(child_name("/foo/", "/foo/bar/"), "bar/");
    }

    #[test]
    fn validation() {
        assert!(validate_path("/foo").is_ok());
        assert!(validate_path("foo").is_err());
        assert!(validate_path("/foo//bar").is_err());
        assert!(validate_document_path("/foo/").is_err());
    }

    proptest! {
        #[test]
        fn ancestors_chain_through_parents(
            segments in prop::collection::vec("[a-z0-9]{1,6}", 1..5),
            folder in any::<bool>(),
        ) {
            let mut path = format!("/{}", segments.join("/"));
            if folder {
                path.push(SEPARATOR);
            }
            prop_assert!(validate_path(&path).is_ok());
            let chain = nodes_from_root(&path);
            prop_assert_eq!(chain.len(), segments.len() + 1);
            prop_assert_eq!(chain.last().map(String::as_str), Some("/"));
            for pair in chain.windows(2) {
                prop_assert_eq!(parent_path(&pair[0]), Some(pair[1].clone()));
                prop_assert!(is_valid_item_name(child_name(&pair[1], &pair[0])));
            }
        }
    }
}
