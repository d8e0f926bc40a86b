//! Assembling nodes for tests.
//!
//! Every revision a [`NodeBuilder`] sets is untimestamped unless
//! [`NodeBuilder::timestamp`] is called, so nodes compare equal across
//! runs.

use remstore_node::{Body, ItemsMap, Node, Revision};

/// Shorthand for a text body.
pub fn text(value: &str) -> Body {
    Body::Text(value.to_string())
}

/// Builds a [`Node`] one revision at a time.
///
/// The node starts with an empty `common` revision (with an empty listing
/// for folders), matching a freshly created cache record.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    /// Starts a node at `path`.
    pub fn new(path: &str) -> Self {
        let mut node = Node::bare(path);
        if node.is_folder() {
            if let Some(common) = node.common.as_mut() {
                common.items_map = Some(ItemsMap::new());
            }
        }
        Self { node }
    }

    /// Sets the agreed document state.
    pub fn common_body(mut self, body: Body, content_type: &str, revision: &str) -> Self {
        let common = self.node.common.get_or_insert_with(Revision::default);
        common.body = Some(body);
        common.content_type = Some(content_type.to_string());
        common.revision = Some(revision.to_string());
        self
    }

    /// Sets the agreed folder listing.
    pub fn common_items<I, S>(mut self, items: I, revision: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let common = self.node.common.get_or_insert_with(Revision::default);
        common.items_map = Some(items.into_iter().map(|i| (i.into(), true)).collect());
        common.revision = Some(revision.to_string());
        self
    }

    /// Stamps the agreed state.
    pub fn timestamp(mut self, millis: u64) -> Self {
        self.node
            .common
            .get_or_insert_with(Revision::default)
            .timestamp = Some(millis);
        self
    }

    /// Sets a pending local document change.
    pub fn local_body(mut self, body: Body, content_type: &str) -> Self {
        self.node.local = Some(Revision::default().with_body(body, Some(content_type.to_string())));
        self
    }

    /// Sets a pending local deletion.
    pub fn local_deleted(mut self) -> Self {
        self.node.local = Some(Revision::default().with_body(Body::Deleted, None));
        self
    }

    /// Sets a pending local folder listing; `false` marks an unconfirmed
    /// child deletion.
    pub fn local_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        let listing = items.into_iter().map(|(n, p)| (n.into(), p)).collect();
        self.node.local = Some(Revision {
            items_map: Some(listing),
            ..Revision::default()
        });
        self
    }

    /// Records an in-flight push.
    pub fn push_body(mut self, body: Body, content_type: &str) -> Self {
        self.node.push = Some(Revision::default().with_body(body, Some(content_type.to_string())));
        self
    }

    /// Sets fetched remote document content.
    pub fn remote_body(mut self, body: Body, content_type: &str, revision: &str) -> Self {
        self.node.remote = Some(
            Revision::default()
                .with_revision(revision)
                .with_body(body, Some(content_type.to_string())),
        );
        self
    }

    /// Sets a bare remote revision: the tag is known, the content is not.
    pub fn remote_revision(mut self, revision: &str) -> Self {
        self.node.remote = Some(Revision::default().with_revision(revision));
        self
    }

    /// Records that the remote no longer has the document.
    pub fn remote_deleted(mut self) -> Self {
        self.node.remote = Some(Revision::default().with_body(Body::Deleted, None));
        self
    }

    /// Sets a fetched remote folder listing.
    pub fn remote_items<I, S>(mut self, items: I, revision: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node.remote = Some(Revision::default().with_revision(revision).with_items(items));
        self
    }

    /// Returns the node.
    pub fn build(self) -> Node {
        self.node
    }
}
