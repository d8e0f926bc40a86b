//! In-memory storage server.
//!
//! [`MemoryRemote`] behaves like a remoteStorage server: it assigns ETags,
//! honors conditional requests and derives folder listings from the
//! documents it holds. It also exposes controls for exercising failure
//! paths: connectivity toggles, forced statuses, injected transport
//! failures, latency, a request log and an in-flight high-water mark.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use remstore_node::{is_folder, nodes_from_root, Body, ProtocolVersion};
use tracing::trace;

use crate::error::{RemoteError, RemoteResult};
use crate::http::Method;
use crate::listing::{FolderListing, ItemMeta};
use crate::remote::{Remote, RemoteResponse, RequestOptions};

#[derive(Debug, Clone)]
struct StoredDocument {
    body: Body,
    content_type: Option<String>,
    etag: String,
}

#[derive(Debug, Default)]
struct ServerState {
    documents: BTreeMap<String, StoredDocument>,
    folder_etags: BTreeMap<String, String>,
    counter: u64,
    forced: HashMap<String, u16>,
    failures: usize,
    latency: Duration,
}

impl ServerState {
    fn next_etag(&mut self) -> String {
        self.counter += 1;
        format!("e{}", self.counter)
    }

    /// Gives every ancestor folder of `path` a fresh ETag.
    fn touch_ancestors(&mut self, path: &str) {
        for folder in nodes_from_root(path).into_iter().skip(1) {
            let etag = self.next_etag();
            self.folder_etags.insert(folder, etag);
        }
    }

    fn write(&mut self, path: &str, body: Body, content_type: Option<String>) -> String {
        let etag = self.next_etag();
        self.documents.insert(
            path.to_string(),
            StoredDocument {
                body,
                content_type,
                etag: etag.clone(),
            },
        );
        self.touch_ancestors(path);
        etag
    }

    fn remove(&mut self, path: &str) -> bool {
        let removed = self.documents.remove(path).is_some();
        if removed {
            self.touch_ancestors(path);
        }
        removed
    }

    fn listing(&self, folder: &str, full_metadata: bool) -> FolderListing {
        let mut listing = FolderListing::new();
        for (path, doc) in self.documents.range(folder.to_string()..) {
            let Some(rest) = path.strip_prefix(folder) else {
                break;
            };
            let meta = match rest.split_once('/') {
                Some((sub, _)) => {
                    let name = format!("{sub}/");
                    if listing.contains_key(&name) {
                        continue;
                    }
                    let etag = self
                        .folder_etags
                        .get(&format!("{folder}{name}"))
                        .cloned()
                        .unwrap_or_default();
                    listing.insert(name, ItemMeta::with_etag(etag));
                    continue;
                }
                None if full_metadata => ItemMeta::document(
                    doc.etag.clone(),
                    doc.content_type.clone().unwrap_or_default(),
                    doc.body.len() as u64,
                ),
                None => ItemMeta::with_etag(doc.etag.clone()),
            };
            listing.insert(rest.to_string(), meta);
        }
        listing
    }
}

/// One request received by a [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Method.
    pub method: Method,
    /// Requested path.
    pub path: String,
    /// Conditions sent with the request.
    pub options: RequestOptions,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory remoteStorage server.
pub struct MemoryRemote {
    state: Mutex<ServerState>,
    protocol: ProtocolVersion,
    connected: AtomicBool,
    online: AtomicBool,
    requests: Mutex<Vec<RequestRecord>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryRemote {
    /// Creates an empty, connected and online server speaking draft 02.
    #[must_use]
    pub fn new() -> Self {
        Self::with_protocol(ProtocolVersion::default())
    }

    /// Creates an empty server speaking `protocol`.
    #[must_use]
    pub fn with_protocol(protocol: ProtocolVersion) -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            protocol,
            connected: AtomicBool::new(true),
            online: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Stores a document directly on the server and returns its ETag.
    pub fn put_document(&self, path: &str, body: Body, content_type: Option<&str>) -> String {
        self.state
            .lock()
            .write(path, body, content_type.map(str::to_string))
    }

    /// Removes a document directly on the server.
    pub fn remove_document(&self, path: &str) -> bool {
        self.state.lock().remove(path)
    }

    /// Returns a stored document's body and content type.
    pub fn document(&self, path: &str) -> Option<(Body, Option<String>)> {
        self.state
            .lock()
            .documents
            .get(path)
            .map(|d| (d.body.clone(), d.content_type.clone()))
    }

    /// Returns the current ETag of a document or folder.
    pub fn etag(&self, path: &str) -> Option<String> {
        let state = self.state.lock();
        if is_folder(path) {
            state.folder_etags.get(path).cloned()
        } else {
            state.documents.get(path).map(|d| d.etag.clone())
        }
    }

    /// Returns the number of stored documents.
    pub fn document_count(&self) -> usize {
        self.state.lock().documents.len()
    }

    /// Sets the connected flag.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Answers every request for `path` with `status`.
    pub fn force_status(&self, path: &str, status: u16) {
        self.state.lock().forced.insert(path.to_string(), status);
    }

    /// Stops forcing a status for `path`.
    pub fn clear_forced_status(&self, path: &str) {
        self.state.lock().forced.remove(path);
    }

    /// Fails the next `count` requests with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().failures = count;
    }

    /// Delays every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests received with `method`.
    pub fn request_count(&self, method: Method) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    /// Forgets the request log.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// Returns the highest number of requests that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Records the request, applies latency and injected failures.
    ///
    /// Returns the forced status for the path, if any.
    async fn enter(
        &self,
        method: Method,
        path: &str,
        options: &RequestOptions,
    ) -> RemoteResult<Option<u16>> {
        if !self.connected() {
            return Err(RemoteError::NotConnected);
        }
        trace!(%method, path, "memory remote request");
        self.requests.lock().push(RequestRecord {
            method,
            path: path.to_string(),
            options: options.clone(),
        });
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        if state.failures > 0 {
            state.failures -= 1;
            self.set_online(false);
            return Err(RemoteError::transport("injected failure"));
        }
        self.set_online(true);
        Ok(state.forced.get(path).copied())
    }

    fn track(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    fn revision(&self, etag: Option<String>) -> Option<String> {
        etag.filter(|_| self.protocol.supports_revisions())
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote")
            .field("protocol", &self.protocol)
            .field("documents", &self.document_count())
            .field("connected", &self.connected())
            .field("online", &self.online())
            .finish()
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    async fn get(&self, path: &str, options: RequestOptions) -> RemoteResult<RemoteResponse> {
        let _in_flight = self.track();
        if let Some(status) = self.enter(Method::Get, path, &options).await? {
            return Ok(RemoteResponse::status(status));
        }
        let state = self.state.lock();
        let revs = self.protocol.supports_revisions();

        if is_folder(path) {
            let listing = state.listing(path, self.protocol.uses_folder_descriptions());
            if listing.is_empty() {
                return Ok(RemoteResponse::status(404));
            }
            let etag = state.folder_etags.get(path).cloned();
            if revs && etag.is_some() && options.if_none_match == etag {
                return Ok(RemoteResponse::status(304).with_revision(etag));
            }
            return Ok(RemoteResponse::status(200)
                .with_listing(listing)
                .with_revision(self.revision(etag)));
        }

        let Some(doc) = state.documents.get(path) else {
            return Ok(RemoteResponse::status(404));
        };
        if revs && options.if_none_match.as_deref() == Some(doc.etag.as_str()) {
            return Ok(RemoteResponse::status(304).with_revision(Some(doc.etag.clone())));
        }
        Ok(RemoteResponse::status(200)
            .with_document(doc.body.clone(), doc.content_type.clone())
            .with_revision(self.revision(Some(doc.etag.clone()))))
    }

    async fn put(
        &self,
        path: &str,
        body: Body,
        content_type: Option<String>,
        options: RequestOptions,
    ) -> RemoteResult<RemoteResponse> {
        if is_folder(path) {
            return Err(RemoteError::InvalidRequest(format!("cannot PUT a folder: {path}")));
        }
        if body.is_deleted() {
            return Err(RemoteError::InvalidRequest(format!(
                "cannot upload a tombstone: {path}"
            )));
        }
        let _in_flight = self.track();
        if let Some(status) = self.enter(Method::Put, path, &options).await? {
            return Ok(RemoteResponse::status(status));
        }
        let mut state = self.state.lock();
        let current = state.documents.get(path).map(|d| d.etag.clone());
        if self.protocol.supports_revisions() {
            let mismatch = options
                .if_match
                .as_ref()
                .is_some_and(|rev| current.as_ref() != Some(rev));
            let exists = options.if_none_match.as_deref() == Some("*") && current.is_some();
            if mismatch || exists {
                return Ok(RemoteResponse::status(412).with_revision(current));
            }
        }
        let etag = state.write(path, body, content_type);
        let status = if current.is_some() { 200 } else { 201 };
        Ok(RemoteResponse::status(status).with_revision(self.revision(Some(etag))))
    }

    async fn delete(&self, path: &str, options: RequestOptions) -> RemoteResult<RemoteResponse> {
        if is_folder(path) {
            return Err(RemoteError::InvalidRequest(format!(
                "cannot DELETE a folder: {path}"
            )));
        }
        let _in_flight = self.track();
        if let Some(status) = self.enter(Method::Delete, path, &options).await? {
            return Ok(RemoteResponse::status(status));
        }
        let mut state = self.state.lock();
        let Some(current) = state.documents.get(path).map(|d| d.etag.clone()) else {
            return Ok(RemoteResponse::status(404));
        };
        if self.protocol.supports_revisions()
            && options.if_match.as_ref().is_some_and(|rev| *rev != current)
        {
            return Ok(RemoteResponse::status(412).with_revision(Some(current)));
        }
        state.remove(path);
        Ok(RemoteResponse::status(200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn create_read_update() {
        let remote = MemoryRemote::new();
        let created = remote
            .put("/a/b", Body::from("1"), Some("text/plain".into()), RequestOptions::create_only())
            .await
            .unwrap();
        assert_eq!(created.status, 201);
        let etag = created.revision.clone().unwrap();

        let read = remote.get("/a/b", RequestOptions::none()).await.unwrap();
        assert_eq!(read.status, 200);
        assert_eq!(read.body(), Some(&Body::from("1")));
        assert_eq!(read.revision.as_deref(), Some(etag.as_str()));

        let again = remote
            .put("/a/b", Body::from("x"), None, RequestOptions::create_only())
            .await
            .unwrap();
        assert_eq!(again.status, 412);

        let updated = remote
            .put("/a/b", Body::from("2"), None, RequestOptions::if_match(etag.clone()))
            .await
            .unwrap();
        assert_eq!(updated.status, 200);
        assert_ne!(updated.revision, Some(etag.clone()));

        let stale = remote
            .put("/a/b", Body::from("3"), None, RequestOptions::if_match(etag))
            .await
            .unwrap();
        assert_eq!(stale.status, 412);
        assert_eq!(stale.revision, updated.revision);
    }

    #[tokio::test]
    async fn not_modified() {
        let remote = MemoryRemote::new();
        let etag = remote.put_document("/doc", Body::from("x"), Some("text/plain"));
        let response = remote
            .get("/doc", RequestOptions::if_none_match(etag))
            .await
            .unwrap();
        assert_eq!(response.status, 304);
        assert!(response.content.is_none());
    }

    #[tokio::test]
    async fn derived_listings() {
        let remote = MemoryRemote::new();
        remote.put_document("/foo/bar", Body::from("abc"), Some("text/plain"));
        remote.put_document("/foo/sub/x", Body::from("1"), Some("text/plain"));
        let before = remote.etag("/foo/").unwrap();

        let response = remote.get("/foo/", RequestOptions::none()).await.unwrap();
        let listing = response.listing().unwrap();
        assert_eq!(
            listing["bar"],
            ItemMeta::document(remote.etag("/foo/bar").unwrap(), "text/plain", 3)
        );
        assert_eq!(listing["sub/"], ItemMeta::with_etag(remote.etag("/foo/sub/").unwrap()));
        assert_eq!(response.revision, Some(before.clone()));

        remote.put_document("/foo/sub/y", Body::from("2"), None);
        assert_ne!(remote.etag("/foo/").unwrap(), before);
        assert_eq!(
            remote.get("/empty/", RequestOptions::none()).await.unwrap().status,
            404
        );
    }

    #[tokio::test]
    async fn pre_02_listings_carry_only_etags() {
        let remote = MemoryRemote::with_protocol(ProtocolVersion::Draft01);
        remote.put_document("/f/a", Body::from("abc"), Some("text/plain"));
        let response = remote.get("/f/", RequestOptions::none()).await.unwrap();
        assert_eq!(
            response.listing().unwrap()["a"],
            ItemMeta::with_etag(remote.etag("/f/a").unwrap())
        );
    }

    #[tokio::test]
    async fn delete_conditions() {
        let remote = MemoryRemote::new();
        let etag = remote.put_document("/d", Body::from("x"), None);
        let response = remote
            .delete("/d", RequestOptions::if_match("nope"))
            .await
            .unwrap();
        assert_eq!(response.status, 412);
        let response = remote
            .delete("/d", RequestOptions::if_match(etag))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(remote.document_count(), 0);
        assert_eq!(
            remote.delete("/d", RequestOptions::none()).await.unwrap().status,
            404
        );
    }

    #[tokio::test]
    async fn failure_controls() {
        let remote = MemoryRemote::new();
        remote.fail_next(1);
        let err = remote.get("/a", RequestOptions::none()).await.unwrap_err();
        assert!(err.is_network());
        assert!(!remote.online());
        assert_eq!(remote.get("/a", RequestOptions::none()).await.unwrap().status, 404);
        assert!(remote.online());

        remote.force_status("/a", 401);
        assert_eq!(remote.get("/a", RequestOptions::none()).await.unwrap().status, 401);
        remote.clear_forced_status("/a");

        remote.set_connected(false);
        assert!(matches!(
            remote.get("/a", RequestOptions::none()).await,
            Err(RemoteError::NotConnected)
        ));
        assert_eq!(remote.request_count(Method::Get), 3);
    }

    #[tokio::test]
    async fn tracks_peak_in_flight() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Duration::from_millis(20));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let remote = Arc::clone(&remote);
                tokio::spawn(async move {
                    remote.get(&format!("/p{i}"), RequestOptions::none()).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(remote.peak_in_flight(), 4);
        assert_eq!(remote.in_flight.load(Ordering::SeqCst), 0);
    }
}
