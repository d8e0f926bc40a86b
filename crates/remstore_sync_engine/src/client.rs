//! The application-facing context object.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use remstore_core::{Access, AccessMode, Cache, Caching, CoreResult, ROOT_SCOPE};
use remstore_remote::Remote;
use remstore_storage::NodeStore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::SyncResult;

/// Wires a node store and a remote into a synchronized cache.
///
/// Owns the [`Cache`], [`Access`], [`Caching`] and [`SyncEngine`], and
/// runs the maintenance loop that syncs once per interval.
pub struct Client<R: Remote + 'static, S: NodeStore + 'static> {
    engine: Arc<SyncEngine<R, S>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Remote + 'static, S: NodeStore + 'static> Client<R, S> {
    /// Creates a client. Sync does not run until [`start_sync`] or
    /// [`sync_cycle`] is called.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is unusable.
    ///
    /// [`start_sync`]: Self::start_sync
    /// [`sync_cycle`]: Self::sync_cycle
    pub fn new(store: S, remote: R, config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let engine = SyncEngine::new(
            Arc::new(Cache::new(store)),
            Arc::new(remote),
            Arc::new(Access::new()),
            Arc::new(Caching::new()),
            config,
        );
        Ok(Self {
            engine,
            maintenance: Mutex::new(None),
        })
    }

    /// Returns the cache.
    pub fn cache(&self) -> &Arc<Cache<S>> {
        self.engine.cache()
    }

    /// Returns the access configuration.
    pub fn access(&self) -> &Arc<Access> {
        self.engine.access()
    }

    /// Returns the caching configuration.
    pub fn caching(&self) -> &Arc<Caching> {
        self.engine.caching()
    }

    /// Returns the remote.
    pub fn remote(&self) -> &Arc<R> {
        self.engine.remote()
    }

    /// Returns the sync engine.
    pub fn engine(&self) -> &Arc<SyncEngine<R, S>> {
        &self.engine
    }

    /// Claims access to a scope and mirrors it completely.
    ///
    /// The scope's private and public folders are cached with
    /// [`Strategy::All`](remstore_core::Strategy::All); the root scope
    /// mirrors `/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope is malformed.
    pub fn claim_access(&self, scope: &str, mode: AccessMode) -> CoreResult<()> {
        self.access().claim(scope, mode)?;
        if scope == ROOT_SCOPE {
            self.caching().enable("/")?;
        } else {
            self.caching().enable(&format!("/{scope}/"))?;
            self.caching().enable(&format!("/public/{scope}/"))?;
        }
        info!(scope, mode = mode.as_str(), "access claimed");
        Ok(())
    }

    /// Starts the maintenance loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start_sync(&self) {
        self.engine.start();
        let mut slot = self.maintenance.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *slot = Some(self.spawn_loop());
        info!("sync started");
    }

    /// Stops the maintenance loop. Requests already in flight complete
    /// and are merged.
    pub fn stop_sync(&self) {
        self.engine.stop();
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
    }

    /// Returns true while the maintenance loop runs.
    pub fn is_syncing(&self) -> bool {
        self.maintenance
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Runs one sync cycle and waits until it is done.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unavailable.
    pub async fn sync_cycle(&self) -> SyncResult<()> {
        self.engine.sync_cycle().await
    }

    /// Returns the sync interval.
    pub fn sync_interval(&self) -> Duration {
        self.engine.sync_interval()
    }

    /// Changes the sync interval, restarting a running maintenance loop.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero interval.
    pub fn set_sync_interval(&self, interval: Duration) -> SyncResult<()> {
        self.engine.set_sync_interval(interval)?;
        let mut slot = self.maintenance.lock();
        if let Some(handle) = slot.take() {
            if !handle.is_finished() {
                handle.abort();
                *slot = Some(self.spawn_loop());
                debug!("maintenance loop restarted");
            }
        }
        Ok(())
    }

    fn spawn_loop(&self) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            loop {
                if engine.is_stopped() {
                    break;
                }
                if let Err(error) = engine.sync_cycle().await {
                    warn!(%error, "sync cycle failed");
                }
                if engine.is_stopped() {
                    break;
                }
                tokio::time::sleep(engine.sync_interval()).await;
            }
            debug!("maintenance loop ended");
        })
    }
}

impl<R: Remote + 'static, S: NodeStore + 'static> Drop for Client<R, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
    }
}

impl<R: Remote + 'static, S: NodeStore + 'static> std::fmt::Debug for Client<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("engine", &self.engine)
            .field("syncing", &self.is_syncing())
            .finish()
    }
}
