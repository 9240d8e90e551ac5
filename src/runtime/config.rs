//! Runtime configuration
//!
//! Defaults suit a desktop SDR pipeline; every value can be overridden with
//! the `with_*` builder methods before the [`Runtime`](super::Runtime) is
//! created.

use std::time::Duration;

use super::buffer::RemainderWait;
use super::frame::{DEFAULT_SOFT_LIMIT, MAX_POOL_SIZE};

/// Capacity of buffers created when no peer dictates one.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// How long an idle block sleeps before checking its width again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Endpoint operations blocked longer than this are reported.
pub const DEFAULT_WATCHDOG_THRESHOLD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub default_buffer_capacity: usize,
    pub remainder_wait: RemainderWait,
    pub poll_interval: Duration,
    /// Notification workers started with the runtime.
    pub notifier_workers: usize,
    /// Upper bound the notification pool may grow to.
    pub notifier_max_workers: usize,
    /// Pending notification jobs before the pool grows or pushes back.
    pub notifier_queue_depth: usize,
    /// `None` disables the watchdog thread.
    pub watchdog_threshold: Option<Duration>,
    pub pool_max_depth: usize,
    pub pool_soft_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            remainder_wait: RemainderWait::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            notifier_workers: 1,
            notifier_max_workers: 8,
            notifier_queue_depth: 64,
            watchdog_threshold: Some(DEFAULT_WATCHDOG_THRESHOLD),
            pool_max_depth: MAX_POOL_SIZE,
            pool_soft_limit: DEFAULT_SOFT_LIMIT,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity of buffers created without a peer to copy from
    pub fn with_default_buffer_capacity(mut self, capacity: usize) -> Self {
        self.default_buffer_capacity = capacity.max(1);
        self
    }

    pub fn with_remainder_wait(mut self, remainder_wait: RemainderWait) -> Self {
        self.remainder_wait = remainder_wait;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Size the notification pool: `initial` workers, growing to `max`.
    pub fn with_notifier_workers(mut self, initial: usize, max: usize) -> Self {
        self.notifier_workers = initial.max(1);
        self.notifier_max_workers = max.max(self.notifier_workers);
        self
    }

    pub fn with_notifier_queue_depth(mut self, depth: usize) -> Self {
        self.notifier_queue_depth = depth.max(1);
        self
    }

    pub fn with_watchdog_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.watchdog_threshold = threshold;
        self
    }

    pub fn with_pool_limits(mut self, max_depth: usize, soft_limit: usize) -> Self {
        self.pool_max_depth = max_depth;
        self.pool_soft_limit = soft_limit;
        self
    }
}
