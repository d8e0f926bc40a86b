//! The sync engine.
//!
//! Work is organized as one task per path. Discovery walks the cache for
//! nodes that need a fetch or a push, or whose data is stale, and queues
//! their paths. Up to `num_threads` tasks run at once while the remote is
//! online, one while it is offline, none while it is disconnected. Each
//! task plans one request, sends it, and merges the response back into
//! the cache in a single store batch.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use remstore_core::{
    Access, AccessMode, Cache, Caching, ChangeEvent, CoreError, CoreResult, FetchQueue, Origin,
    Strategy,
};
use remstore_node::{
    corruption, is_corrupt, is_folder, join, nodes_from_root, now_millis, parent_path, Body, Node,
    NodeMap, ProtocolVersion, Revision,
};
use remstore_remote::{
    listing_defect, FolderListing, Remote, RemoteContent, RemoteResponse,
};
use remstore_storage::NodeStore;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::config::SyncConfig;
use crate::conflict::{auto_merge, is_pending_deletion, settle_folder_markers, ConflictPolicy};
use crate::error::{SyncError, SyncResult};
use crate::events::{SyncEvent, SyncEvents, SyncStats};
use crate::status::{interpret_status, StatusMeaning};
use crate::tasks::{is_stale, plan_request, Action, Request, TaskQueue};

/// Nodes and change events produced by one merge, stored together.
#[derive(Default)]
struct Batch {
    nodes: NodeMap,
    events: Vec<ChangeEvent>,
}

impl Batch {
    /// Returns the batch's version of `path`, falling back to `stored`.
    fn current(&self, path: &str, stored: Option<Node>) -> Option<Node> {
        match self.nodes.get(path) {
            Some(node) => node.clone(),
            None => stored,
        }
    }
}

/// Keeps the cache converged with a remote.
pub struct SyncEngine<R: Remote + 'static, S: NodeStore + 'static> {
    cache: Arc<Cache<S>>,
    remote: Arc<R>,
    access: Arc<Access>,
    caching: Arc<Caching>,
    config: RwLock<SyncConfig>,
    tasks: Mutex<TaskQueue>,
    stopped: AtomicBool,
    events: SyncEvents,
    stats: RwLock<SyncStats>,
    this: Weak<Self>,
}

impl<R: Remote + 'static, S: NodeStore + 'static> SyncEngine<R, S> {
    /// Creates an engine and attaches it to the cache and caching
    /// configuration.
    ///
    /// Local writes and newly activated caching roots queue tasks, and
    /// `max_age` reads are served through the engine.
    pub fn new(
        cache: Arc<Cache<S>>,
        remote: Arc<R>,
        access: Arc<Access>,
        caching: Arc<Caching>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let engine = Arc::new_cyclic(|this| Self {
            cache,
            remote,
            access,
            caching,
            config: RwLock::new(config),
            tasks: Mutex::new(TaskQueue::default()),
            stopped: AtomicBool::new(false),
            events: SyncEvents::new(),
            stats: RwLock::new(SyncStats::default()),
            this: this.clone(),
        });
        engine.attach();
        engine
    }

    fn attach(self: &Arc<Self>) {
        let on_diff = Arc::downgrade(self);
        self.cache.on_diff(Arc::new(move |path: &str| {
            if let Some(engine) = on_diff.upgrade() {
                engine.add_task(path);
                engine.do_tasks();
            }
        }));
        let on_activate = Arc::downgrade(self);
        self.caching.on_activate(Arc::new(move |path: &str| {
            if let Some(engine) = on_activate.upgrade() {
                if !engine.access.check_path(path, AccessMode::Read) {
                    debug!(path, "caching root not readable, not seeding");
                    return;
                }
                engine.add_task(path);
                engine.do_tasks();
            }
        }));
        let queue: Weak<dyn FetchQueue> = Arc::downgrade(self) as Weak<dyn FetchQueue>;
        self.cache.set_fetch_queue(queue);
    }

    /// Returns the cache.
    pub fn cache(&self) -> &Arc<Cache<S>> {
        &self.cache
    }

    /// Returns the remote.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Returns the access configuration.
    pub fn access(&self) -> &Arc<Access> {
        &self.access
    }

    /// Returns the caching configuration.
    pub fn caching(&self) -> &Arc<Caching> {
        &self.caching
    }

    /// Returns a copy of the configuration.
    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    /// Returns the sync interval.
    pub fn sync_interval(&self) -> Duration {
        self.config.read().sync_interval
    }

    /// Changes the sync interval.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero interval.
    pub fn set_sync_interval(&self, interval: Duration) -> SyncResult<()> {
        if interval.is_zero() {
            return Err(SyncError::invalid_config("sync interval must be positive"));
        }
        self.config.write().sync_interval = interval;
        debug!(interval_ms = interval.as_millis() as u64, "sync interval changed");
        Ok(())
    }

    /// Changes the conflict policy.
    pub fn set_conflict_policy(&self, policy: ConflictPolicy) {
        self.config.write().conflict_policy = policy;
    }

    /// Returns the protocol whose listing rules apply.
    pub fn protocol(&self) -> ProtocolVersion {
        self.config
            .read()
            .protocol
            .unwrap_or_else(|| self.remote.protocol())
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> UnboundedReceiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Stops scheduling new cycles. Running requests still complete.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        info!("sync stopped");
    }

    /// Allows cycles to run again.
    pub fn start(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    /// Returns true if sync was stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns the queued paths, running ones included.
    pub fn pending_tasks(&self) -> Vec<String> {
        self.tasks.lock().paths()
    }

    /// Returns the paths with a request in flight.
    pub fn running_tasks(&self) -> Vec<String> {
        self.tasks.lock().running()
    }

    /// Queues a task for `path`. It starts with the next [`do_tasks`].
    ///
    /// [`do_tasks`]: Self::do_tasks
    pub fn add_task(&self, path: &str) {
        trace!(path, "task queued");
        self.tasks.lock().add(path, None);
    }

    fn target_threads(&self) -> usize {
        if !self.remote.connected() {
            0
        } else if self.remote.online() {
            self.config.read().num_threads
        } else {
            1
        }
    }

    /// Tops up the running tasks to the concurrency target.
    ///
    /// Returns false if there was spare capacity left after starting
    /// every idle queued task.
    pub fn do_tasks(&self) -> bool {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("no runtime, tasks stay queued");
            return false;
        }
        let target = self.target_threads();
        let (started, wanted) = {
            let mut tasks = self.tasks.lock();
            let wanted = target.saturating_sub(tasks.running_count());
            if wanted == 0 {
                return true;
            }
            (tasks.start(wanted), wanted)
        };
        for path in &started {
            self.spawn_task(path.clone());
        }
        started.len() >= wanted
    }

    fn spawn_task(&self, path: String) {
        let Some(engine) = self.this.upgrade() else {
            return;
        };
        debug!(path = %path, "task started");
        tokio::spawn(async move {
            let outcome = engine.execute(&path).await;
            engine.finish_task(&path, outcome).await;
        });
    }

    async fn execute(&self, path: &str) -> SyncResult<()> {
        let request = self.do_task(path).await?;
        let action = request.action();
        let timeout = self.config.read().request_timeout;
        let response = tokio::time::timeout(timeout, self.send(path, request))
            .await
            .map_err(|_| SyncError::Timeout {
                millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })??;
        self.handle_response(path, action, response).await
    }

    async fn send(&self, path: &str, request: Request) -> SyncResult<RemoteResponse> {
        let response = match request {
            Request::Get(options) => self.remote.get(path, options).await?,
            Request::Put {
                body,
                content_type,
                options,
            } => self.remote.put(path, body, content_type, options).await?,
            Request::Delete(options) => self.remote.delete(path, options).await?,
        };
        trace!(path, status = response.status, "response");
        Ok(response)
    }

    /// Plans the request for `path`, recording a push snapshot first when
    /// the request uploads or deletes.
    ///
    /// Fetches need read access and pushes read-write access. Without it
    /// nothing is stored and a local change stays pending.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` if the claimed access does not cover the
    /// request, or an error if the cache is unavailable.
    pub async fn do_task(&self, path: &str) -> SyncResult<Request> {
        let _writes = self.cache.lock_writes().await;
        let node = self.read_node(path).await?;
        let (request, pushed) = plan_request(node.as_ref(), now_millis());
        let mode = request.action().required_access();
        if !self.access.check_path(path, mode) {
            return Err(SyncError::AccessDenied {
                path: path.to_string(),
                mode: mode.as_str(),
            });
        }
        if let Some(pushed) = pushed {
            let batch = Batch {
                nodes: NodeMap::from([(path.to_string(), Some(pushed))]),
                events: Vec::new(),
            };
            self.store(batch).await?;
        }
        debug!(path, action = request.action().as_str(), "request planned");
        Ok(request)
    }

    /// Merges a response into the cache.
    ///
    /// # Errors
    ///
    /// Returns `Status` for unsuccessful statuses, `InvalidResponse` for
    /// content that cannot be merged, or a cache error.
    pub async fn handle_response(
        &self,
        path: &str,
        action: Action,
        response: RemoteResponse,
    ) -> SyncResult<()> {
        let status = interpret_status(response.status);
        if !status.successful {
            if status.unauthorized {
                warn!(path, status = response.status, "remote refused credentials");
                self.events.emit(SyncEvent::Unauthorized {
                    path: path.to_string(),
                });
            }
            return Err(SyncError::Status {
                path: path.to_string(),
                status: response.status,
            });
        }
        match action {
            Action::Get => self.complete_get(path, response, status).await,
            Action::Put | Action::Delete => {
                self.complete_push(path, action, status.conflict, response.revision)
                    .await
            }
        }
    }

    async fn complete_get(
        &self,
        path: &str,
        response: RemoteResponse,
        status: StatusMeaning,
    ) -> SyncResult<()> {
        if !status.changed {
            trace!(path, "not modified");
            return Ok(());
        }
        let folder = is_folder(path);
        let content = if status.not_found {
            if folder {
                RemoteContent::Listing(FolderListing::new())
            } else {
                RemoteContent::Document(Body::Deleted)
            }
        } else {
            response.content.ok_or_else(|| SyncError::InvalidResponse {
                path: path.to_string(),
                reason: "response has no content".into(),
            })?
        };

        match content {
            RemoteContent::Listing(listing) if folder => {
                if let Some(defect) = listing_defect(&listing, self.protocol().listing_rules()) {
                    warn!(path, %defect, "discarding corrupt folder listing");
                    return Err(SyncError::InvalidResponse {
                        path: path.to_string(),
                        reason: defect.to_string(),
                    });
                }
                self.complete_folder_fetch(path, listing, response.revision)
                    .await?;
            }
            RemoteContent::Document(body) if !folder => {
                self.complete_document_fetch(path, body, response.content_type, response.revision)
                    .await?;
            }
            _ => {
                return Err(SyncError::InvalidResponse {
                    path: path.to_string(),
                    reason: "content does not match the kind of path".into(),
                });
            }
        }
        self.stats.write().fetches += 1;
        Ok(())
    }

    /// Returns the node to merge a fetch into.
    ///
    /// Missing and corrupt nodes are replaced by an empty one.
    async fn fetch_target(&self, path: &str) -> SyncResult<Node> {
        match self.read_node(path).await? {
            Some(node) if node.path == path && !is_corrupt(&node) => Ok(node),
            _ => Ok(Node::bare(path)),
        }
    }

    async fn complete_document_fetch(
        &self,
        path: &str,
        body: Body,
        content_type: Option<String>,
        revision: Option<String>,
    ) -> SyncResult<()> {
        let _writes = self.cache.lock_writes().await;
        let now = now_millis();
        let mut node = self.fetch_target(path).await?;
        node.remote = Some(Revision {
            revision,
            body: Some(body),
            content_type,
            ..Revision::at(now)
        });
        let mut batch = Batch::default();
        let merged = auto_merge(node, self.conflict_policy(), &mut batch.events);
        batch.nodes.insert(path.to_string(), merged);
        self.store(batch).await
    }

    async fn complete_folder_fetch(
        &self,
        path: &str,
        listing: FolderListing,
        revision: Option<String>,
    ) -> SyncResult<()> {
        let _writes = self.cache.lock_writes().await;
        let now = now_millis();
        let mut node = self.fetch_target(path).await?;

        let mut missing = BTreeSet::new();
        for rev in [&node.common, &node.local, &node.remote].into_iter().flatten() {
            for name in rev.items_map.iter().flatten().map(|(name, _)| name) {
                if !listing.contains_key(name) {
                    missing.insert(name.clone());
                }
            }
        }
        node.remote = Some(Revision {
            revision,
            items_map: Some(listing.keys().map(|name| (name.clone(), true)).collect()),
            ..Revision::at(now)
        });

        let mut batch = Batch::default();
        let merged = auto_merge(node, self.conflict_policy(), &mut batch.events);
        batch.nodes.insert(path.to_string(), merged);
        self.mark_children(path, &listing, missing, now, &mut batch)
            .await?;
        self.store(batch).await
    }

    /// Reconciles the children of a freshly fetched folder.
    ///
    /// Listed children whose tag moved get a bare remote revision; unseen
    /// ones are created when the caching strategy mirrors them. Children
    /// that vanished from the listing are deleted with their subtrees.
    async fn mark_children(
        &self,
        path: &str,
        listing: &FolderListing,
        missing: BTreeSet<String>,
        now: u64,
        batch: &mut Batch,
    ) -> SyncResult<()> {
        let policy = self.conflict_policy();
        let listed: Vec<String> = listing.keys().map(|name| join(path, name)).collect();
        let mut children = self.cache.get_nodes(&listed).await?;

        for (name, meta) in listing {
            let child_path = join(path, name);
            let stored = children.remove(&child_path).flatten();
            match stored.filter(|c| c.common.is_some()) {
                Some(mut child) => {
                    let common_rev = child.common.as_ref().and_then(|c| c.revision.clone());
                    let remote_rev = child.remote.as_ref().and_then(|r| r.revision.clone());
                    if common_rev != meta.etag && remote_rev != meta.etag {
                        trace!(path = %child_path, "child changed remotely");
                        child.remote = Some(Revision {
                            revision: meta.etag.clone(),
                            content_type: meta.content_type.clone(),
                            content_length: meta.content_length,
                            ..Revision::at(now)
                        });
                        let merged = auto_merge(child, policy, &mut batch.events);
                        batch.nodes.insert(child_path, merged);
                    } else {
                        children.insert(child_path, Some(child));
                    }
                }
                None => {
                    if self.caching.check_path(&child_path).creates(&child_path) {
                        let created = Node {
                            common: Some(Revision::at(now)),
                            remote: Some(Revision {
                                revision: meta.etag.clone(),
                                content_type: meta.content_type.clone(),
                                content_length: meta.content_length,
                                ..Revision::at(now)
                            }),
                            ..Node::bare(child_path.clone())
                        };
                        batch.nodes.insert(child_path, Some(created));
                    }
                }
            }
        }

        let doomed: Vec<String> = missing.iter().map(|name| join(path, name)).collect();
        if !doomed.is_empty() {
            debug!(path, count = doomed.len(), "children removed remotely");
            self.delete_remote_trees(doomed, now, batch).await?;
        }

        let marked: Vec<String> = batch
            .nodes
            .get(path)
            .and_then(Option::as_ref)
            .and_then(|folder| folder.local.as_ref())
            .and_then(|local| local.items_map.as_ref())
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, present)| !**present)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();
        if !marked.is_empty() {
            let pending: BTreeSet<String> = marked
                .into_iter()
                .filter(|name| {
                    let child_path = join(path, name);
                    let stored = children.get(&child_path).cloned().flatten();
                    batch
                        .current(&child_path, stored)
                        .is_some_and(|child| is_pending_deletion(&child))
                })
                .collect();
            if let Some(Some(folder)) = batch.nodes.get_mut(path) {
                settle_folder_markers(folder, &pending);
            }
        }
        Ok(())
    }

    /// Applies confirmed remote deletions to whole subtrees.
    ///
    /// Works level by level: folders contribute their children to the
    /// next level and are removed unless they still list local creations;
    /// documents merge a remote tombstone. Local creations survive.
    async fn delete_remote_trees(
        &self,
        paths: Vec<String>,
        now: u64,
        batch: &mut Batch,
    ) -> SyncResult<()> {
        let policy = self.conflict_policy();
        let mut level = paths;
        while !level.is_empty() {
            let stored = self.cache.get_nodes(&level).await?;
            let mut next = Vec::new();
            for (path, node) in stored {
                let Some(node) = batch.current(&path, node) else {
                    continue;
                };
                if node.is_folder() {
                    let names: BTreeSet<&String> = [&node.common, &node.local]
                        .into_iter()
                        .flatten()
                        .flat_map(|rev| rev.items_map.iter().flatten().map(|(name, _)| name))
                        .collect();
                    next.extend(names.into_iter().map(|name| join(&path, name)));
                    let keeps_creations = node
                        .local
                        .as_ref()
                        .is_some_and(|local| !local.live_items().is_empty());
                    if !keeps_creations {
                        batch.nodes.insert(path, None);
                    }
                } else if node.common.is_some() {
                    if node.is_pending_creation() {
                        debug!(path = %path, "keeping local creation");
                        continue;
                    }
                    let mut node = node;
                    node.remote = Some(Revision {
                        body: Some(Body::Deleted),
                        ..Revision::at(now)
                    });
                    let merged = auto_merge(node, policy, &mut batch.events);
                    batch.nodes.insert(path, merged);
                }
            }
            level = next;
        }
        Ok(())
    }

    /// Settles a finished upload or deletion.
    ///
    /// On success the pushed value becomes `common`, and `local` is
    /// dropped if it did not change meanwhile. A rejected conditional
    /// request records the remote's revision so the next cycle fetches it.
    async fn complete_push(
        &self,
        path: &str,
        action: Action,
        conflict: bool,
        revision: Option<String>,
    ) -> SyncResult<()> {
        let _writes = self.cache.lock_writes().await;
        let now = now_millis();
        let Some(mut node) = self.read_node(path).await? else {
            debug!(path, "pushed node is no longer cached");
            return Ok(());
        };
        let mut batch = Batch::default();

        let result = if conflict {
            info!(path, "push rejected, remote changed concurrently");
            let known = node.remote.as_ref().map(|r| r.revision.clone());
            if known != Some(revision.clone()) {
                node.remote = Some(Revision {
                    revision,
                    ..Revision::at(now)
                });
            }
            auto_merge(node, self.conflict_policy(), &mut batch.events)
        } else {
            let push = node.push.take();
            let mut common = Revision {
                revision,
                ..Revision::at(now)
            };
            match action {
                Action::Delete => {
                    self.stats.write().deletes += 1;
                    if node.local.as_ref().is_some_and(Revision::is_deletion) {
                        None
                    } else {
                        node.common = Some(common);
                        Some(node)
                    }
                }
                _ => {
                    self.stats.write().pushes += 1;
                    if let Some(push) = push {
                        common.body = push.body;
                        common.content_type = push.content_type;
                        let unchanged = node.local.as_ref().is_some_and(|local| {
                            local.body == common.body && local.content_type == common.content_type
                        });
                        if unchanged {
                            node.local = None;
                        }
                    }
                    node.common = Some(common);
                    Some(node)
                }
            }
        };
        batch.nodes.insert(path.to_string(), result);
        self.store(batch).await
    }

    /// Drops the push snapshot of `path` so the change is pushed again
    /// later.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unavailable.
    pub async fn deal_with_failure(&self, path: &str) -> SyncResult<()> {
        let _writes = self.cache.lock_writes().await;
        let Some(mut node) = self.read_node(path).await? else {
            return Ok(());
        };
        if node.push.take().is_none() {
            return Ok(());
        }
        let batch = Batch {
            nodes: NodeMap::from([(path.to_string(), Some(node))]),
            events: Vec::new(),
        };
        self.store(batch).await
    }

    async fn finish_task(&self, path: &str, outcome: SyncResult<()>) {
        match outcome {
            Ok(()) => {
                let waiters = self.tasks.lock().finish(path);
                self.stats.write().requests_completed += 1;
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
                debug!(path, "task finished");
            }
            Err(SyncError::AccessDenied { mode, .. }) => {
                debug!(path, mode, "task skipped, access not claimed");
                let waiters = self.tasks.lock().fail(path);
                for waiter in waiters {
                    let _ = waiter.send(Err(format!("no {mode} access")));
                }
            }
            Err(error) => {
                if error.is_network() {
                    warn!(path, %error, "remote unreachable, going offline");
                    self.remote.set_online(false);
                } else {
                    warn!(path, %error, "task failed");
                }
                if let Err(e) = self.deal_with_failure(path).await {
                    warn!(path, error = %e, "could not clear push marker");
                }
                let message = error.to_string();
                {
                    let mut stats = self.stats.write();
                    stats.failures += 1;
                    stats.last_error = Some(message.clone());
                }
                let waiters = self.tasks.lock().fail(path);
                for waiter in waiters {
                    let _ = waiter.send(Err(message.clone()));
                }
                self.events.emit(SyncEvent::Failed {
                    path: path.to_string(),
                    message,
                });
            }
        }
        self.events.emit(SyncEvent::ReqDone {
            path: path.to_string(),
        });
        self.continue_or_finish().await;
    }

    async fn continue_or_finish(&self) {
        if let Err(error) = self.find_tasks(false).await {
            warn!(%error, "task discovery failed");
        }
        let (empty, running) = {
            let tasks = self.tasks.lock();
            (tasks.is_empty(), tasks.running_count())
        };
        if empty || (self.is_stopped() && running == 0) {
            self.finish_cycle();
            return;
        }
        if self.is_stopped() {
            return;
        }
        let pause = self.config.read().task_yield;
        tokio::time::sleep(pause).await;
        self.do_tasks();
        if self.tasks.lock().running_count() == 0 {
            self.finish_cycle();
        }
    }

    fn finish_cycle(&self) {
        self.stats.write().cycles_completed += 1;
        debug!("sync done");
        self.events.emit(SyncEvent::Done);
    }

    /// Queues discovered work unless tasks are already queued.
    ///
    /// Diffs come first; stale data is only refreshed when there are no
    /// diffs and `also_check_refresh` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unavailable.
    pub async fn find_tasks(&self, also_check_refresh: bool) -> SyncResult<()> {
        if !self.tasks.lock().is_empty() || self.is_stopped() {
            return Ok(());
        }
        let found = self.check_diffs().await?;
        if found == 0 && also_check_refresh {
            self.check_refresh().await?;
        }
        Ok(())
    }

    /// Queues corrupt nodes and nodes that need a fetch or a push.
    ///
    /// Fetches require read access, pushes read-write access. Corrupt
    /// nodes go to the front of the queue. At most `max_diffs_per_cycle`
    /// paths are queued; paths attempted this cycle are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unavailable.
    pub async fn check_diffs(&self) -> SyncResult<usize> {
        let limit = self.config.read().max_diffs_per_cycle;
        let attempted: HashSet<String> = self.tasks.lock().attempted();
        let access = &self.access;
        let mut corrupt = Vec::new();
        let mut pending = Vec::new();

        self.cache
            .for_all_nodes(&mut |node: Node| {
                if corrupt.len() + pending.len() >= limit || attempted.contains(&node.path) {
                    return;
                }
                if let Some(reason) = corruption(&node) {
                    if access.check_path(&node.path, AccessMode::Read) {
                        corrupt.push((node.path, reason));
                    }
                } else if node.needs_fetch() && access.check_path(&node.path, AccessMode::Read) {
                    pending.push(node.path);
                } else if node.needs_push() && access.check_path(&node.path, AccessMode::ReadWrite)
                {
                    pending.push(node.path);
                }
            })
            .await?;

        let count = corrupt.len() + pending.len();
        let mut tasks = self.tasks.lock();
        for (path, reason) in corrupt {
            warn!(path = %path, %reason, "corrupt node, fetching again");
            tasks.add_front(&path);
        }
        for path in pending {
            tasks.add(&path, None);
        }
        if count > 0 {
            debug!(count, "diffs found");
        }
        Ok(count)
    }

    /// Queues refreshes for data older than the sync interval.
    ///
    /// A stale node is refreshed through its parent folder when that is
    /// readable, otherwise directly. Refreshes below another queued
    /// refresh are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unavailable.
    pub async fn check_refresh(&self) -> SyncResult<usize> {
        let now = now_millis();
        let interval = self.config.read().sync_interval_millis();
        let access = &self.access;
        let mut candidates = BTreeSet::new();

        self.cache
            .for_all_nodes(&mut |node: Node| {
                if !is_stale(&node, now, interval) {
                    return;
                }
                match parent_path(&node.path).filter(|p| access.check_path(p, AccessMode::Read)) {
                    Some(parent) => {
                        candidates.insert(parent);
                    }
                    None if access.check_path(&node.path, AccessMode::Read) => {
                        candidates.insert(node.path);
                    }
                    None => {}
                }
            })
            .await?;

        let refresh: Vec<&String> = candidates
            .iter()
            .filter(|path| {
                !nodes_from_root(path)
                    .iter()
                    .skip(1)
                    .any(|ancestor| candidates.contains(ancestor))
            })
            .collect();
        let mut tasks = self.tasks.lock();
        for path in &refresh {
            tasks.add(path, None);
        }
        if !refresh.is_empty() {
            debug!(count = refresh.len(), "refreshing stale data");
        }
        Ok(refresh.len())
    }

    /// Starts queued tasks, discovering work first if there is spare
    /// capacity.
    ///
    /// Emits `done` right away when nothing ends up running.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unavailable.
    pub async fn sync(&self) -> SyncResult<()> {
        self.tasks.lock().begin_cycle();
        if !self.do_tasks() {
            if let Err(error) = self.find_tasks(true).await {
                warn!(%error, "sync aborted");
                return Err(error);
            }
            self.do_tasks();
        }
        if self.tasks.lock().running_count() == 0 {
            self.finish_cycle();
        }
        Ok(())
    }

    /// Runs [`sync`] and waits for the resulting `done`.
    ///
    /// Returns immediately when sync is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unavailable.
    ///
    /// [`sync`]: Self::sync
    pub async fn sync_cycle(&self) -> SyncResult<()> {
        if self.is_stopped() {
            return Ok(());
        }
        let mut done = self.events.done_receiver();
        let seen = *done.borrow_and_update();
        self.sync().await?;
        let _ = done.wait_for(|count| *count > seen).await;
        Ok(())
    }

    fn conflict_policy(&self) -> ConflictPolicy {
        self.config.read().conflict_policy
    }

    async fn read_node(&self, path: &str) -> SyncResult<Option<Node>> {
        let mut nodes = self.cache.get_nodes(&[path.to_string()]).await?;
        Ok(nodes.remove(path).flatten())
    }

    /// Stores a batch, then announces its events.
    ///
    /// Nodes under a `Flush` strategy without local changes are removed
    /// instead of stored.
    async fn store(&self, mut batch: Batch) -> SyncResult<()> {
        for (path, node) in batch.nodes.iter_mut() {
            let settled = node.as_ref().is_some_and(|n| n.local.is_none());
            if settled && self.caching.check_path(path) == Strategy::Flush {
                trace!(path = %path, "flushing synced node");
                *node = None;
            }
        }
        self.cache.set_nodes(batch.nodes).await?;

        let conflicts = batch
            .events
            .iter()
            .filter(|e| e.origin == Origin::Conflict)
            .count() as u64;
        if conflicts > 0 {
            self.stats.write().conflicts += conflicts;
        }
        for event in batch.events {
            self.cache.emit_change(event);
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Remote + 'static, S: NodeStore + 'static> FetchQueue for SyncEngine<R, S> {
    async fn queue_get(&self, path: &str) -> CoreResult<()> {
        if !self.remote.connected() {
            return Err(CoreError::fetch_unavailable("remote is not connected"));
        }
        if !self.remote.online() {
            return Err(CoreError::fetch_unavailable("remote is not online"));
        }
        let (tx, rx) = oneshot::channel();
        self.tasks.lock().add(path, Some(tx));
        self.do_tasks();
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(CoreError::FetchFailed {
                path: path.to_string(),
                reason,
            }),
            Err(_) => Err(CoreError::FetchFailed {
                path: path.to_string(),
                reason: "task was dropped".into(),
            }),
        }
    }
}

impl<R: Remote + 'static, S: NodeStore + 'static> std::fmt::Debug for SyncEngine<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &*self.config.read())
            .field("stopped", &self.is_stopped())
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}
