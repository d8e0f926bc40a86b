//! Configuration for the sync engine.

use std::time::Duration;

use remstore_node::ProtocolVersion;

use crate::conflict::ConflictPolicy;
use crate::error::{SyncError, SyncResult};

/// Default pause between sync cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(10_000);

/// Default number of concurrent requests while the remote is online.
pub const DEFAULT_NUM_THREADS: usize = 10;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Pause between cycles, and the age after which cached data is
    /// refreshed.
    pub sync_interval: Duration,
    /// Maximum concurrent requests while the remote is online.
    pub num_threads: usize,
    /// Time a single remote request may take.
    pub request_timeout: Duration,
    /// Maximum number of paths one diff scan schedules.
    pub max_diffs_per_cycle: usize,
    /// Pause before topping up the task pool after a request finishes.
    pub task_yield: Duration,
    /// Protocol whose listing rules apply. `None` follows the remote.
    pub protocol: Option<ProtocolVersion>,
    /// How concurrent local and remote document changes are settled.
    pub conflict_policy: ConflictPolicy,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            num_threads: DEFAULT_NUM_THREADS,
            request_timeout: Duration::from_secs(30),
            max_diffs_per_cycle: 100,
            task_yield: Duration::from_millis(10),
            protocol: None,
            conflict_policy: ConflictPolicy::RemoteWins,
        }
    }

    /// Sets the sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the number of concurrent requests.
    pub fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the diff scan cap.
    pub fn with_max_diffs_per_cycle(mut self, max: usize) -> Self {
        self.max_diffs_per_cycle = max;
        self
    }

    /// Sets the pause between finished and newly started requests.
    pub fn with_task_yield(mut self, pause: Duration) -> Self {
        self.task_yield = pause;
        self
    }

    /// Pins the protocol used for listing checks.
    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero interval, timeout, thread count
    /// or diff cap.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync_interval.is_zero() {
            return Err(SyncError::invalid_config("sync interval must be positive"));
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::invalid_config("request timeout must be positive"));
        }
        if self.num_threads == 0 {
            return Err(SyncError::invalid_config("num_threads must be at least 1"));
        }
        if self.max_diffs_per_cycle == 0 {
            return Err(SyncError::invalid_config(
                "max_diffs_per_cycle must be at least 1",
            ));
        }
        Ok(())
    }

    /// Returns the sync interval in milliseconds.
    pub fn sync_interval_millis(&self) -> u64 {
        u64::try_from(self.sync_interval.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
