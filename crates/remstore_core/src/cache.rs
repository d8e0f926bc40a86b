//! Caching layer over a node store.
//!
//! [`Cache`] turns a plain [`NodeStore`] into the get/put/delete interface
//! applications use. Writes record a `local` revision on the document and
//! mark it in every ancestor folder's local listing, all in one store
//! batch. Reads see `local` before `common`.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use remstore_node::{
    child_name, is_document, is_folder, nodes_from_root, now_millis, validate_document_path,
    validate_path, Body, ItemsMap, Node, NodeMap, Revision,
};
use remstore_storage::NodeStore;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::change_feed::{ChangeEvent, ChangeFeed, ChangeValue, Origin};
use crate::error::{CoreError, CoreResult};

/// Callback invoked with the path of every document a local write touched.
pub type DiffHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Fetch scheduling offered by the sync engine.
///
/// [`Cache::get`] uses it when a caller asks for data no older than a
/// given age and the cached copy is too old.
#[async_trait]
pub trait FetchQueue: Send + Sync {
    /// Queues a fetch of `path` and waits until it has been merged.
    ///
    /// # Errors
    ///
    /// Returns `FetchUnavailable` if the remote cannot be reached at all,
    /// `FetchFailed` if the fetch was attempted and failed.
    async fn queue_get(&self, path: &str) -> CoreResult<()>;
}

/// A cached item as seen by the application.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// A document.
    Document {
        /// The body.
        body: Body,
        /// The content type, if known.
        content_type: Option<String>,
    },
    /// A folder listing with only present children.
    Folder {
        /// Child names; subfolders end with `/`.
        items: ItemsMap,
    },
}

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    /// The item exists.
    Found(Item),
    /// Nothing is cached at the path.
    NotFound,
}

impl ReadResult {
    /// HTTP-style status: 200 or 404.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            ReadResult::Found(_) => 200,
            ReadResult::NotFound => 404,
        }
    }

    /// Returns the item if found.
    #[must_use]
    pub fn item(&self) -> Option<&Item> {
        match self {
            ReadResult::Found(item) => Some(item),
            ReadResult::NotFound => None,
        }
    }
}

/// The caching layer.
pub struct Cache<S> {
    store: S,
    feed: ChangeFeed,
    diff_handler: RwLock<Option<DiffHandler>>,
    fetch_queue: RwLock<Option<Weak<dyn FetchQueue>>>,
    /// Serializes application writes with each other and with sync merges.
    write_lock: Mutex<()>,
}

impl<S: NodeStore> Cache<S> {
    /// Wraps a node store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            feed: ChangeFeed::new(),
            diff_handler: RwLock::new(None),
            fetch_queue: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the change feed.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Subscribes to change events.
    pub fn subscribe(&self) -> UnboundedReceiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Emits a change event.
    pub fn emit_change(&self, event: ChangeEvent) {
        trace!(path = %event.path, origin = event.origin.as_str(), "change");
        self.feed.emit(event);
    }

    /// Registers the handler notified after local writes.
    pub fn on_diff(&self, handler: DiffHandler) {
        *self.diff_handler.write() = Some(handler);
    }

    /// Attaches the fetch queue used to satisfy `max_age` reads.
    pub fn set_fetch_queue(&self, queue: Weak<dyn FetchQueue>) {
        *self.fetch_queue.write() = Some(queue);
    }

    /// Locks out application writes until the guard is dropped.
    ///
    /// The sync engine holds it across each read-merge-write round-trip.
    pub async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Reads nodes, upgrading legacy records on the fly.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn get_nodes(&self, paths: &[String]) -> CoreResult<NodeMap> {
        let mut nodes = self.store.get_nodes(paths).await?;
        for node in nodes.values_mut().flatten() {
            node.migrate();
        }
        Ok(nodes)
    }

    /// Writes a batch of nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not apply the batch.
    pub async fn set_nodes(&self, nodes: NodeMap) -> CoreResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        self.store.set_nodes(nodes).await?;
        Ok(())
    }

    /// Visits every stored node, upgrading legacy records on the fly.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn for_all_nodes(&self, visitor: &mut (dyn FnMut(Node) + Send)) -> CoreResult<()> {
        self.store
            .for_all_nodes(&mut |mut node: Node| {
                node.migrate();
                visitor(node);
            })
            .await?;
        Ok(())
    }

    /// Reads the item at `path`.
    ///
    /// With `max_age` (milliseconds), a cached copy whose timestamp is
    /// missing or older is not returned; instead a fetch is queued with
    /// the sync engine and the read is repeated once it completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid, the store is unavailable,
    /// or a required fetch could not be performed.
    pub async fn get(&self, path: &str, max_age: Option<u64>) -> CoreResult<ReadResult> {
        validate_path(path)?;
        let node = self.read_one(path).await?;

        if let Some(max_age) = max_age {
            let fresh = node
                .as_ref()
                .and_then(Node::latest)
                .and_then(|l| l.timestamp)
                .is_some_and(|ts| now_millis().saturating_sub(ts) <= max_age);
            if !fresh {
                debug!(path, max_age, "cached copy too old, queueing fetch");
                self.queue_fetch(path).await?;
                let node = self.read_one(path).await?;
                return Ok(Self::read_result(node.as_ref()));
            }
        }
        Ok(Self::read_result(node.as_ref()))
    }

    async fn read_one(&self, path: &str) -> CoreResult<Option<Node>> {
        let mut nodes = self.get_nodes(&[path.to_string()]).await?;
        Ok(nodes.remove(path).flatten())
    }

    async fn queue_fetch(&self, path: &str) -> CoreResult<()> {
        let queue = self.fetch_queue.read().as_ref().and_then(Weak::upgrade);
        match queue {
            Some(queue) => queue.queue_get(path).await,
            None => Err(CoreError::fetch_unavailable("no sync engine attached")),
        }
    }

    fn read_result(node: Option<&Node>) -> ReadResult {
        let Some(node) = node else {
            return ReadResult::NotFound;
        };
        let Some(latest) = node.latest() else {
            return ReadResult::NotFound;
        };
        if node.is_folder() {
            return ReadResult::Found(Item::Folder {
                items: latest.live_items(),
            });
        }
        match latest.live_body() {
            Some(body) => ReadResult::Found(Item::Document {
                body: body.clone(),
                content_type: latest.content_type.clone(),
            }),
            None => ReadResult::NotFound,
        }
    }

    /// Writes a document locally.
    ///
    /// Missing ancestor folders are created, and every ancestor's local
    /// listing marks its child present.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a document path, the body is
    /// the tombstone, or the store is unavailable.
    pub async fn put(&self, path: &str, body: Body, content_type: Option<String>) -> CoreResult<()> {
        validate_document_path(path)?;
        if body.is_deleted() {
            return Err(CoreError::invalid_argument("use delete() to remove a document"));
        }
        let now = now_millis();
        self.update_nodes(path, |paths, nodes| {
            for (i, node_path) in paths.iter().enumerate() {
                let node = nodes
                    .entry(node_path.clone())
                    .or_insert(None)
                    .get_or_insert_with(|| Node::new(node_path.clone(), now));
                if i == 0 {
                    let previous = node.latest().cloned();
                    node.local = Some(Revision {
                        timestamp: Some(now),
                        body: Some(body.clone()),
                        content_type: content_type.clone(),
                        previous_body: previous.as_ref().and_then(|p| p.body.clone()),
                        previous_content_type: previous.and_then(|p| p.content_type),
                        ..Revision::default()
                    });
                } else {
                    let item = child_name(node_path, &paths[i - 1]).to_string();
                    local_listing(node, now).insert(item, true);
                }
            }
            Ok(())
        })
        .await
    }

    /// Marks a document deleted locally.
    ///
    /// The document and every ancestor up to the first folder that still
    /// has other items must already be cached.
    ///
    /// # Errors
    ///
    /// Returns `MissingNode` if a required node is not cached, or an error
    /// if the path is not a document path or the store is unavailable.
    pub async fn delete(&self, path: &str) -> CoreResult<()> {
        validate_document_path(path)?;
        let now = now_millis();
        self.update_nodes(path, |paths, nodes| {
            for (i, node_path) in paths.iter().enumerate() {
                let Some(Some(node)) = nodes.get_mut(node_path) else {
                    return Err(CoreError::MissingNode {
                        path: node_path.clone(),
                    });
                };
                if i == 0 {
                    let previous = node.latest().cloned();
                    node.local = Some(Revision {
                        timestamp: Some(now),
                        body: Some(Body::Deleted),
                        previous_body: previous.as_ref().and_then(|p| p.body.clone()),
                        previous_content_type: previous.and_then(|p| p.content_type),
                        ..Revision::default()
                    });
                } else {
                    let item = child_name(node_path, &paths[i - 1]).to_string();
                    let listing = local_listing(node, now);
                    listing.remove(&item);
                    if !listing.is_empty() {
                        break;
                    }
                }
            }
            Ok(())
        })
        .await
    }

    /// Read-modify-write of a document and its ancestors.
    ///
    /// Unchanged nodes are dropped from the batch. Document changes are
    /// announced as `window` events and to the diff handler after the
    /// batch is stored.
    async fn update_nodes<F>(&self, path: &str, apply: F) -> CoreResult<()>
    where
        F: FnOnce(&[String], &mut NodeMap) -> CoreResult<()>,
    {
        let _guard = self.write_lock.lock().await;
        let paths = nodes_from_root(path);
        let original = self.get_nodes(&paths).await?;
        let mut nodes = original.clone();
        apply(&paths, &mut nodes)?;

        let mut events = Vec::new();
        let mut batch = NodeMap::new();
        for (node_path, node) in nodes {
            if original.get(&node_path) == Some(&node) {
                continue;
            }
            let mut node = node;
            if is_document(&node_path) {
                if let Some(local) = node.as_mut().and_then(|n| n.local.as_mut()) {
                    let event = ChangeEvent::new(node_path.clone(), Origin::Window)
                        .with_old(
                            ChangeValue::document(local.previous_body.as_ref()),
                            local.previous_content_type.clone(),
                        )
                        .with_new(
                            ChangeValue::document(local.body.as_ref()),
                            local.content_type.clone(),
                        );
                    if !event.is_noop() {
                        events.push(event);
                    }
                    local.clear_previous();
                }
            }
            batch.insert(node_path, node);
        }

        let documents: Vec<String> = batch
            .keys()
            .filter(|p| is_document(p))
            .cloned()
            .collect();
        self.set_nodes(batch).await?;

        for event in events {
            self.emit_change(event);
        }
        let handler = self.diff_handler.read().clone();
        if let Some(handler) = handler {
            for document in &documents {
                handler(document);
            }
        }
        Ok(())
    }

    /// Removes `path` and, for folders, every cached descendant.
    ///
    /// Nodes carrying a local change are announced as `local` events
    /// reverting to their common value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn flush(&self, path: &str) -> CoreResult<()> {
        validate_path(path)?;
        let _guard = self.write_lock.lock().await;
        let paths = self.descendant_paths(path).await?;
        let nodes = self.get_nodes(&paths).await?;

        let mut batch = NodeMap::new();
        for (node_path, node) in nodes {
            if let Some(node) = &node {
                if let (Some(common), Some(local)) = (&node.common, &node.local) {
                    if !node.is_folder() {
                        self.emit_change(
                            ChangeEvent::new(node_path.clone(), Origin::Local)
                                .with_old(
                                    ChangeValue::document(local.body.as_ref()),
                                    local.content_type.clone(),
                                )
                                .with_new(
                                    ChangeValue::document(common.body.as_ref()),
                                    common.content_type.clone(),
                                ),
                        );
                    }
                }
            }
            batch.insert(node_path, None);
        }
        debug!(path, count = batch.len(), "flushing nodes");
        self.set_nodes(batch).await
    }

    async fn descendant_paths(&self, path: &str) -> CoreResult<Vec<String>> {
        let mut all = Vec::new();
        let mut pending = vec![path.to_string()];
        while let Some(current) = pending.pop() {
            if is_folder(&current) {
                let node = self.read_one(&current).await?;
                if let Some(latest) = node.as_ref().and_then(Node::latest) {
                    for item in latest.items_map.iter().flatten().map(|(k, _)| k) {
                        pending.push(format!("{current}{item}"));
                    }
                }
            }
            all.push(current);
        }
        Ok(all)
    }

    /// Emits a `local` change event for every cached document.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn fire_initial(&self) -> CoreResult<()> {
        let mut events = Vec::new();
        self.for_all_nodes(&mut |node: Node| {
            if node.is_folder() {
                return;
            }
            if let Some(latest) = node.latest() {
                events.push(ChangeEvent::new(node.path.clone(), Origin::Local).with_new(
                    ChangeValue::document(latest.body.as_ref()),
                    latest.content_type.clone(),
                ));
            }
        })
        .await?;
        for event in events {
            self.emit_change(event);
        }
        Ok(())
    }
}

/// Returns the folder's local listing, seeding it from `common`.
fn local_listing(node: &mut Node, now: u64) -> &mut ItemsMap {
    let common = node.common.get_or_insert_with(|| Revision::at(now));
    let common_items = common.items_map.get_or_insert_with(ItemsMap::new).clone();
    let local = node.local.get_or_insert_with(|| Revision {
        items_map: Some(common_items.clone()),
        ..Revision::at(now)
    });
    local.items_map.get_or_insert(common_items)
}

impl<S> std::fmt::Debug for Cache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("feed", &self.feed).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remstore_storage::InMemoryNodeStore;

    fn cache() -> Cache<Arc<InMemoryNodeStore>> {
        Cache::new(Arc::new(InMemoryNodeStore::new()))
    }

    fn text(s: &str) -> Body {
        Body::from(s)
    }

    #[tokio::test]
    async fn read_your_writes() {
        let cache = cache();
        cache
            .put("/foo/bar", text("hello"), Some("text/plain".into()))
            .await
            .unwrap();
        assert_eq!(
            cache.get("/foo/bar", None).await.unwrap(),
            ReadResult::Found(Item::Document {
                body: text("hello"),
                content_type: Some("text/plain".into()),
            })
        );
    }

    #[tokio::test]
    async fn put_marks_ancestors() {
        let cache = cache();
        cache.put("/a/b/c", text("x"), None).await.unwrap();

        let store = cache.store();
        let b = store.node("/a/b/").unwrap();
        assert_eq!(b.local.unwrap().items_map.unwrap().get("c"), Some(&true));
        let a = store.node("/a/").unwrap();
        assert_eq!(a.local.unwrap().items_map.unwrap().get("b/"), Some(&true));
        let root = store.node("/").unwrap();
        assert_eq!(root.local.unwrap().items_map.unwrap().get("a/"), Some(&true));

        match cache.get("/a/", None).await.unwrap() {
            ReadResult::Found(Item::Folder { items }) => {
                assert_eq!(items.keys().collect::<Vec<_>>(), vec!["b/"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn put_emits_window_event_and_diff() {
        let cache = cache();
        let mut rx = cache.subscribe();
        let diffs = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&diffs);
        cache.on_diff(Arc::new(move |p: &str| sink.lock().push(p.to_string())));

        cache.put("/n/a", text("1"), Some("text/plain".into())).await.unwrap();
        cache.put("/n/a", text("2"), Some("text/plain".into())).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.origin, Origin::Window);
        assert_eq!(first.old_value, None);
        assert_eq!(first.new_value, Some(ChangeValue::Document(text("1"))));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.old_value, Some(ChangeValue::Document(text("1"))));
        assert_eq!(second.new_value, Some(ChangeValue::Document(text("2"))));

        assert_eq!(*diffs.lock(), vec!["/n/a", "/n/a"]);
        assert!(cache.store().node("/n/a").unwrap().local.unwrap().previous_body.is_none());
    }

    #[tokio::test]
    async fn delete_hides_document() {
        let cache = cache();
        cache.put("/foo/bar", text("hello"), None).await.unwrap();
        cache.delete("/foo/bar").await.unwrap();

        assert_eq!(cache.get("/foo/bar", None).await.unwrap(), ReadResult::NotFound);
        let node = cache.store().node("/foo/bar").unwrap();
        assert!(node.local.unwrap().is_deletion());
        let folder = cache.store().node("/foo/").unwrap();
        assert!(folder.local.unwrap().items_map.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_stops_at_nonempty_folder() {
        let cache = cache();
        cache.put("/a/b/one", text("1"), None).await.unwrap();
        cache.put("/a/b/two", text("2"), None).await.unwrap();
        cache.delete("/a/b/one").await.unwrap();

        let b = cache.store().node("/a/b/").unwrap();
        let items = b.local.unwrap().items_map.unwrap();
        assert!(!items.contains_key("one"));
        assert!(items.contains_key("two"));
        let a = cache.store().node("/a/").unwrap();
        assert!(a.local.unwrap().items_map.unwrap().contains_key("b/"));
    }

    #[tokio::test]
    async fn delete_requires_cached_nodes() {
        let cache = cache();
        let err = cache.delete("/nope/x").await.unwrap_err();
        assert!(matches!(err, CoreError::MissingNode { path } if path == "/nope/x"));
    }

    #[tokio::test]
    async fn validation_errors() {
        let cache = cache();
        assert!(cache.put("/folder/", text("x"), None).await.unwrap_err().is_validation());
        assert!(cache.put("rel", text("x"), None).await.unwrap_err().is_validation());
        assert!(cache.put("/a", Body::Deleted, None).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn flush_removes_subtree() {
        let cache = cache();
        cache.put("/f/a", text("1"), None).await.unwrap();
        cache.put("/f/sub/b", text("2"), None).await.unwrap();
        let mut rx = cache.subscribe();

        cache.flush("/f/").await.unwrap();
        let store = cache.store();
        assert!(store.node("/f/").is_none());
        assert!(store.node("/f/a").is_none());
        assert!(store.node("/f/sub/").is_none());
        assert!(store.node("/f/sub/b").is_none());
        assert!(store.node("/").is_some());

        let mut flushed = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        flushed.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(flushed[0].path, "/f/a");
        assert_eq!(flushed[0].origin, Origin::Local);
        assert_eq!(flushed[0].old_value, Some(ChangeValue::Document(text("1"))));
        assert_eq!(flushed[0].new_value, None);
    }

    #[tokio::test]
    async fn fire_initial_replays_documents() {
        let cache = cache();
        cache.put("/x/a", text("1"), None).await.unwrap();
        cache.put("/x/b", text("2"), None).await.unwrap();
        cache.delete("/x/b").await.unwrap();
        let mut rx = cache.subscribe();

        cache.fire_initial().await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.path, "/x/a");
        assert_eq!(event.origin, Origin::Local);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn legacy_records_are_migrated_on_read() {
        let cache = cache();
        let legacy = Node {
            common: None,
            legacy_body: Some(serde_json::Value::String("legacy".into())),
            legacy_content_type: Some("text/plain".into()),
            ..Node::bare("/old")
        };
        cache.store().insert(legacy);
        assert_eq!(
            cache.get("/old", None).await.unwrap(),
            ReadResult::Found(Item::Document {
                body: text("legacy"),
                content_type: Some("text/plain".into()),
            })
        );
    }

    #[tokio::test]
    async fn max_age_without_engine_fails() {
        let cache = cache();
        cache.put("/a", text("1"), None).await.unwrap();
        assert!(cache.get("/a", Some(60_000)).await.is_ok());
        assert!(matches!(
            cache.get("/missing", Some(60_000)).await,
            Err(CoreError::FetchUnavailable { .. })
        ));
    }

    struct CountingQueue(parking_lot::Mutex<Vec<String>>);

    #[async_trait]
    impl FetchQueue for CountingQueue {
        async fn queue_get(&self, path: &str) -> CoreResult<()> {
            self.0.lock().push(path.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn stale_read_goes_through_queue() {
        let cache = cache();
        let counting = Arc::new(CountingQueue(parking_lot::Mutex::new(Vec::new())));
        let queue: Arc<dyn FetchQueue> = counting.clone();
        cache.set_fetch_queue(Arc::downgrade(&queue));
        assert_eq!(cache.get("/none", Some(1000)).await.unwrap(), ReadResult::NotFound);
        assert_eq!(*counting.0.lock(), vec!["/none"]);
    }
}
