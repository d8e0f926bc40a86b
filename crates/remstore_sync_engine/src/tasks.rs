//! Per-path tasks: what a task sends, and which tasks are pending.

use std::collections::{HashMap, HashSet, VecDeque};

use remstore_core::AccessMode;
use remstore_node::{is_corrupt, Body, Node, Revision};
use remstore_remote::RequestOptions;
use tokio::sync::oneshot;

/// Completion handle for a caller waiting on a path.
pub(crate) type Waiter = oneshot::Sender<Result<(), String>>;

/// Kind of remote request a task issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Fetch a document or listing.
    Get,
    /// Upload a local document change.
    Put,
    /// Delete a document remotely.
    Delete,
}

impl Action {
    /// Returns the action name.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::Put => "put",
            Action::Delete => "delete",
        }
    }

    /// Returns the access mode a request of this kind needs.
    pub fn required_access(self) -> AccessMode {
        match self {
            Action::Get => AccessMode::Read,
            Action::Put | Action::Delete => AccessMode::ReadWrite,
        }
    }
}

/// A planned remote request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Fetch with the given conditions.
    Get(RequestOptions),
    /// Upload a body.
    Put {
        /// Body to upload.
        body: Body,
        /// Content type to send.
        content_type: Option<String>,
        /// Conditions.
        options: RequestOptions,
    },
    /// Delete with the given conditions.
    Delete(RequestOptions),
}

impl Request {
    /// Returns the kind of request.
    pub fn action(&self) -> Action {
        match self {
            Request::Get(_) => Action::Get,
            Request::Put { .. } => Action::Put,
            Request::Delete(_) => Action::Delete,
        }
    }
}

/// Decides which request brings `node` closer to the remote.
///
/// Pushes return the node with its `push` snapshot recorded; it must be
/// stored before the request is sent.
pub fn plan_request(node: Option<&Node>, now: u64) -> (Request, Option<Node>) {
    let Some(node) = node else {
        return (Request::Get(RequestOptions::none()), None);
    };
    if is_corrupt(node) || node.remote.as_ref().is_some_and(|r| !r.has_content()) {
        return (Request::Get(RequestOptions::none()), None);
    }
    let common_revision = node.common.as_ref().and_then(|c| c.revision.clone());

    if let Some(local) = &node.local {
        match &local.body {
            Some(Body::Deleted) => {
                if let Some(revision) = common_revision {
                    let mut pushed = node.clone();
                    pushed.push = Some(Revision {
                        body: Some(Body::Deleted),
                        ..Revision::at(now)
                    });
                    return (Request::Delete(RequestOptions::if_match(revision)), Some(pushed));
                }
                return (Request::Get(RequestOptions::none()), None);
            }
            Some(body) => {
                let mut pushed = node.clone();
                pushed.push = Some(Revision {
                    body: Some(body.clone()),
                    content_type: local.content_type.clone(),
                    ..Revision::at(now)
                });
                let options = match common_revision {
                    Some(revision) => RequestOptions::if_match(revision),
                    None => RequestOptions::create_only(),
                };
                let request = Request::Put {
                    body: body.clone(),
                    content_type: local.content_type.clone(),
                    options,
                };
                return (request, Some(pushed));
            }
            None => {}
        }
    }

    match common_revision {
        Some(revision) => (Request::Get(RequestOptions::if_none_match(revision)), None),
        None => (Request::Get(RequestOptions::none()), None),
    }
}

/// Returns true if the node's common state is older than `interval_ms`.
///
/// Nodes without a common revision are never stale; they are handled as
/// corrupt instead.
pub fn is_stale(node: &Node, now: u64, interval_ms: u64) -> bool {
    match &node.common {
        Some(common) => common
            .timestamp
            .map_or(true, |ts| now.saturating_sub(ts) > interval_ms),
        None => false,
    }
}

/// Queued and running paths.
///
/// A path stays queued while it runs. Paths that finished or failed are
/// remembered as attempted until the next cycle starts, so discovery does
/// not pick them up again immediately.
#[derive(Default)]
pub(crate) struct TaskQueue {
    order: VecDeque<String>,
    waiters: HashMap<String, Vec<Waiter>>,
    running: HashSet<String>,
    requeued: HashSet<String>,
    attempted: HashSet<String>,
}

impl TaskQueue {
    pub(crate) fn add(&mut self, path: &str, waiter: Option<Waiter>) {
        self.insert(path, waiter, false);
    }

    pub(crate) fn add_front(&mut self, path: &str) {
        self.insert(path, None, true);
    }

    fn insert(&mut self, path: &str, waiter: Option<Waiter>, front: bool) {
        self.attempted.remove(path);
        if self.running.contains(path) {
            self.requeued.insert(path.to_string());
        }
        if !self.waiters.contains_key(path) {
            if front {
                self.order.push_front(path.to_string());
            } else {
                self.order.push_back(path.to_string());
            }
        }
        self.waiters
            .entry(path.to_string())
            .or_default()
            .extend(waiter);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }

    pub(crate) fn running_count(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn running(&self) -> Vec<String> {
        self.running.iter().cloned().collect()
    }

    /// Marks up to `count` idle queued paths as running.
    pub(crate) fn start(&mut self, count: usize) -> Vec<String> {
        let picked: Vec<String> = self
            .order
            .iter()
            .filter(|p| !self.running.contains(*p))
            .take(count)
            .cloned()
            .collect();
        self.running.extend(picked.iter().cloned());
        picked
    }

    /// Ends a run and hands back the waiters to notify.
    ///
    /// A path queued again while it ran stays queued for another run.
    pub(crate) fn finish(&mut self, path: &str) -> Vec<Waiter> {
        self.running.remove(path);
        let waiters = self.waiters.get_mut(path).map(std::mem::take).unwrap_or_default();
        if !self.requeued.remove(path) {
            self.remove(path);
            self.attempted.insert(path.to_string());
        }
        waiters
    }

    /// Ends a failed run. The path is dropped even if it was queued again.
    pub(crate) fn fail(&mut self, path: &str) -> Vec<Waiter> {
        self.running.remove(path);
        self.requeued.remove(path);
        let waiters = self.remove(path);
        self.attempted.insert(path.to_string());
        waiters
    }

    fn remove(&mut self, path: &str) -> Vec<Waiter> {
        self.order.retain(|p| p != path);
        self.waiters.remove(path).unwrap_or_default()
    }

    pub(crate) fn attempted(&self) -> HashSet<String> {
        self.attempted.clone()
    }

    /// Forgets which paths were attempted.
    pub(crate) fn begin_cycle(&mut self) {
        self.attempted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remstore_testkit::{text, NodeBuilder};

    #[test]
    fn uploads_need_write_access() {
        assert_eq!(Action::Get.required_access(), AccessMode::Read);
        assert_eq!(Action::Put.required_access(), AccessMode::ReadWrite);
        assert_eq!(Action::Delete.required_access(), AccessMode::ReadWrite);
    }

    #[test]
    fn unknown_node_is_fetched() {
        let (request, pushed) = plan_request(None, 1);
        assert_eq!(request, Request::Get(RequestOptions::none()));
        assert!(pushed.is_none());
    }

    #[test]
    fn local_body_is_pushed_conditionally() {
        let node = NodeBuilder::new("/a/b")
            .common_body(text("old"), "text/plain", "r1")
            .local_body(text("new"), "text/plain")
            .build();
        let (request, pushed) = plan_request(Some(&node), 42);
        assert_eq!(
            request,
            Request::Put {
                body: text("new"),
                content_type: Some("text/plain".into()),
                options: RequestOptions::if_match("r1"),
            }
        );
        let push = pushed.unwrap().push.unwrap();
        assert_eq!(push.body, Some(text("new")));
        assert_eq!(push.timestamp, Some(42));
    }

    #[test]
    fn new_document_is_created_only() {
        let node = NodeBuilder::new("/a/b")
            .local_body(text("new"), "text/plain")
            .build();
        let (request, _) = plan_request(Some(&node), 1);
        assert!(matches!(
            request,
            Request::Put { options, .. } if options == RequestOptions::create_only()
        ));
    }

    #[test]
    fn tombstone_deletes_only_with_revision() {
        let known = NodeBuilder::new("/a/b")
            .common_body(text("old"), "text/plain", "r1")
            .local_deleted()
            .build();
        let (request, pushed) = plan_request(Some(&known), 1);
        assert_eq!(request, Request::Delete(RequestOptions::if_match("r1")));
        assert!(pushed.unwrap().push.unwrap().is_deletion());

        let unknown = NodeBuilder::new("/a/c").local_deleted().build();
        let (request, pushed) = plan_request(Some(&unknown), 1);
        assert_eq!(request.action(), Action::Get);
        assert!(pushed.is_none());
    }

    #[test]
    fn bare_remote_is_fetched_unconditionally() {
        let node = NodeBuilder::new("/a/b")
            .common_body(text("old"), "text/plain", "r1")
            .local_body(text("new"), "text/plain")
            .remote_revision("r2")
            .build();
        let (request, _) = plan_request(Some(&node), 1);
        assert_eq!(request, Request::Get(RequestOptions::none()));
    }

    #[test]
    fn known_revision_is_revalidated() {
        let node = NodeBuilder::new("/a/")
            .common_items(["x"], "f1")
            .build();
        let (request, _) = plan_request(Some(&node), 1);
        assert_eq!(request, Request::Get(RequestOptions::if_none_match("f1")));
    }

    #[test]
    fn staleness() {
        let node = NodeBuilder::new("/a/b")
            .common_body(text("x"), "text/plain", "r1")
            .timestamp(1_000)
            .build();
        assert!(!is_stale(&node, 5_000, 10_000));
        assert!(is_stale(&node, 20_000, 10_000));
        let unstamped = NodeBuilder::new("/a/c")
            .common_body(text("x"), "text/plain", "r")
            .build();
        assert!(is_stale(&unstamped, 1, 10));
        assert!(!is_stale(&remstore_node::Node::unreadable("/x"), 1, 10));
    }

    #[test]
    fn queue_runs_each_path_once() {
        let mut queue = TaskQueue::default();
        queue.add("/a", None);
        queue.add("/b", None);
        queue.add("/a", None);
        queue.add_front("/c");
        assert_eq!(queue.paths(), vec!["/c", "/a", "/b"]);

        let started = queue.start(2);
        assert_eq!(started, vec!["/c", "/a"]);
        assert_eq!(queue.start(5), vec!["/b"]);
        assert!(queue.start(5).is_empty());

        queue.finish("/c");
        assert_eq!(queue.len(), 2);
        assert!(queue.attempted().contains("/c"));
        queue.begin_cycle();
        assert!(queue.attempted().is_empty());
    }

    #[test]
    fn requeued_path_runs_again() {
        let mut queue = TaskQueue::default();
        queue.add("/a", None);
        queue.start(1);
        queue.add("/a", None);
        queue.finish("/a");
        assert_eq!(queue.paths(), vec!["/a"]);
        assert_eq!(queue.start(1), vec!["/a"]);
        queue.finish("/a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn waiters_are_handed_back() {
        let mut queue = TaskQueue::default();
        let (tx, rx) = oneshot::channel();
        queue.add("/a", Some(tx));
        queue.start(1);
        for waiter in queue.fail("/a") {
            waiter.send(Err("boom".into())).unwrap();
        }
        assert_eq!(rx.await.unwrap(), Err("boom".to_string()));
        assert!(queue.is_empty());
        assert_eq!(queue.running_count(), 0);
    }
}
