//! Shared runtime context
//!
//! A [`Runtime`] bundles what blocks, endpoints and attributes share: the
//! configuration, the frame pools, the notification pool and the watchdog.
//! It is a cheap, cloneable handle; everything it owns is torn down when the
//! last clone goes away.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::config::RuntimeConfig;
use super::errors::FrameError;
use super::frame::Frame;
use super::notifier::Notifier;
use super::registry::PoolRegistry;
use super::types::Numeric;
use super::watchdog::{Watchdog, WatchdogHandle};

/// How often the watchdog scans for blocked endpoints.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

struct RuntimeInner {
    config: RuntimeConfig,
    pools: PoolRegistry,
    notifier: Arc<Notifier>,
    watchdog: Watchdog,
}

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Start the notification pool (and watchdog thread, if enabled).
    pub fn new(config: RuntimeConfig) -> std::io::Result<Self> {
        let notifier = Arc::new(Notifier::new(
            config.notifier_workers,
            config.notifier_max_workers,
            config.notifier_queue_depth,
        )?);
        let watchdog = match config.watchdog_threshold {
            Some(threshold) => {
                let interval = WATCHDOG_INTERVAL.min(threshold.max(Duration::from_millis(10)));
                Watchdog::spawn(threshold, interval)?
            }
            None => Watchdog::new(Duration::MAX),
        };
        let pools = PoolRegistry::new(config.pool_max_depth, config.pool_soft_limit);

        info!(
            "Runtime started: buffer capacity {}, {} notification workers",
            config.default_buffer_capacity, config.notifier_workers
        );

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                pools,
                notifier,
                watchdog,
            }),
        })
    }

    /// A runtime with default configuration.
    pub fn with_defaults() -> std::io::Result<Self> {
        Self::new(RuntimeConfig::default())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.inner.pools
    }

    /// A frame of `size` elements from the pool for `T`.
    pub fn retrieve_frame<T: Numeric>(&self, size: usize) -> Result<Frame<T>, FrameError> {
        self.inner.pools.retrieve(size)
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.inner.notifier
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.inner.watchdog
    }

    pub(crate) fn watch(
        &self,
        block: &str,
        endpoint: &str,
        operation: &'static str,
    ) -> WatchdogHandle {
        self.inner.watchdog.register_endpoint(block, endpoint, operation)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("pools", &self.inner.pools)
            .field("notifier", &self.inner.notifier)
            .finish()
    }
}
