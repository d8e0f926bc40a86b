//! Caching strategy configuration.
//!
//! Strategies are attached to exact paths. A lookup walks from the path
//! up through its containing folders until it finds a configured entry;
//! the root defaults to [`Strategy::Seen`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use remstore_node::{containing_folder, validate_path};
use tracing::debug;

use crate::error::CoreResult;

/// How a subtree is mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Nothing is kept once local changes are pushed.
    Flush,
    /// Only paths the application touched are kept in sync.
    Seen,
    /// Folders are mirrored eagerly, documents only when touched.
    SeenAndFolders,
    /// Folders and documents are mirrored eagerly.
    All,
}

impl Strategy {
    /// Returns true if the strategy asks for eager mirroring.
    #[must_use]
    pub fn activates(self) -> bool {
        matches!(self, Strategy::SeenAndFolders | Strategy::All)
    }

    /// Returns true if unseen children at `path` should be created when
    /// they show up in a listing.
    #[must_use]
    pub fn creates(self, path: &str) -> bool {
        if remstore_node::is_folder(path) {
            self.activates()
        } else {
            self == Strategy::All
        }
    }
}

/// Callback invoked with the path of a newly activated subtree.
pub type ActivateHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct CachingState {
    root_paths: BTreeMap<String, Strategy>,
    pending_activations: Vec<String>,
    handler: Option<ActivateHandler>,
}

/// Per-path caching strategies.
///
/// Internally synchronized so one instance can be shared between the
/// application and the sync engine.
#[derive(Default)]
pub struct Caching {
    state: Mutex<CachingState>,
}

impl Caching {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the strategy for an exact path.
    ///
    /// Activating strategies are reported to the activation handler, or
    /// queued until one is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute.
    pub fn set(&self, path: &str, strategy: Strategy) -> CoreResult<()> {
        validate_path(path)?;
        let handler = {
            let mut state = self.state.lock();
            state.root_paths.insert(path.to_string(), strategy);
            if !strategy.activates() {
                return Ok(());
            }
            if state.handler.is_none() {
                state.pending_activations.push(path.to_string());
            }
            state.handler.clone()
        };
        debug!(path, ?strategy, queued = handler.is_none(), "caching activated");
        if let Some(handler) = handler {
            handler(path);
        }
        Ok(())
    }

    /// Mirrors everything under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute.
    pub fn enable(&self, path: &str) -> CoreResult<()> {
        self.set(path, Strategy::All)
    }

    /// Stops mirroring `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute.
    pub fn disable(&self, path: &str) -> CoreResult<()> {
        self.set(path, Strategy::Flush)
    }

    /// Returns the strategy configured for exactly `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute.
    pub fn get(&self, path: &str) -> CoreResult<Option<Strategy>> {
        validate_path(path)?;
        Ok(self.state.lock().root_paths.get(path).copied())
    }

    /// Removes the strategy configured for exactly `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute.
    pub fn remove(&self, path: &str) -> CoreResult<()> {
        validate_path(path)?;
        self.state.lock().root_paths.remove(path);
        Ok(())
    }

    /// Registers the activation handler and replays queued activations.
    pub fn on_activate(&self, handler: ActivateHandler) {
        let pending = {
            let mut state = self.state.lock();
            state.handler = Some(Arc::clone(&handler));
            std::mem::take(&mut state.pending_activations)
        };
        for path in pending {
            handler(&path);
        }
    }

    /// Returns the strategy of the nearest configured ancestor of `path`.
    #[must_use]
    pub fn check_path(&self, path: &str) -> Strategy {
        let state = self.state.lock();
        let mut current = path.to_string();
        loop {
            if let Some(strategy) = state.root_paths.get(&current) {
                return *strategy;
            }
            if current == "/" || current.is_empty() {
                return Strategy::Seen;
            }
            current = containing_folder(&current);
        }
    }

    /// Returns every configured path with its strategy.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Strategy)> {
        self.state
            .lock()
            .root_paths
            .iter()
            .map(|(p, s)| (p.clone(), *s))
            .collect()
    }

    /// Drops all configured strategies.
    pub fn reset(&self) {
        self.state.lock().root_paths.clear();
    }
}

impl fmt::Debug for Caching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caching")
            .field("entries", &self.entries())
            .finish()
    }
}
