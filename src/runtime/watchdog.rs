//! Blocked endpoint detection
//!
//! Every endpoint registers with the runtime's watchdog and stamps the start
//! of each blocking read or write into an atomic. A monitor thread scans the
//! stamps once per interval and warns (once per operation) about any endpoint
//! that has been blocked longer than the configured threshold. Stamping is a
//! pair of relaxed atomic stores, so the hot path takes no lock.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Idle marker for `EndpointState::started`.
const IDLE: u64 = 0;

struct EndpointState {
    /// Milliseconds since the watchdog's origin (plus one), or `IDLE`.
    started: AtomicU64,
    warned: AtomicBool,
    block: String,
    endpoint: String,
    operation: &'static str,
}

struct Shared {
    origin: Instant,
    threshold: Duration,
    endpoints: Mutex<Vec<Weak<EndpointState>>>,
}

impl Shared {
    fn now(&self) -> u64 {
        // Offset by one so that an operation starting at the origin is not idle
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX - 1) + 1
    }
}

/// An endpoint operation that has been blocked past the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedOperation {
    pub block: String,
    pub endpoint: String,
    pub operation: &'static str,
    pub blocked_for: Duration,
}

/// Per-endpoint stamp, held by the endpoint that registered it.
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<EndpointState>,
    shared: Arc<Shared>,
}

impl WatchdogHandle {
    /// Track one blocking operation for as long as the guard lives.
    #[inline]
    pub fn guard(&self) -> OperationGuard<'_> {
        self.state.started.store(self.shared.now(), Ordering::Relaxed);
        OperationGuard { handle: self }
    }

    fn finish(&self) {
        if self.state.warned.swap(false, Ordering::Relaxed) {
            info!(
                "UNBLOCKED: [{}] {} on '{}'",
                self.state.block, self.state.operation, self.state.endpoint
            );
        }
        self.state.started.store(IDLE, Ordering::Relaxed);
    }
}

/// Marks a blocking operation as finished when dropped.
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl Drop for OperationGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.handle.finish();
    }
}

pub struct Watchdog {
    shared: Arc<Shared>,
    stop: Option<Sender<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// A watchdog that only reports on demand through [`Watchdog::blocked`].
    pub fn new(threshold: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                origin: Instant::now(),
                threshold,
                endpoints: Mutex::new(Vec::new()),
            }),
            stop: None,
            monitor: None,
        }
    }

    /// A watchdog with a monitor thread scanning every `interval`.
    pub fn spawn(threshold: Duration, interval: Duration) -> std::io::Result<Self> {
        let mut watchdog = Self::new(threshold);
        let (stop_tx, stop_rx) = bounded(1);
        let shared = Arc::clone(&watchdog.shared);
        let monitor = thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || monitor_loop(&shared, &stop_rx, interval))?;
        watchdog.stop = Some(stop_tx);
        watchdog.monitor = Some(monitor);
        Ok(watchdog)
    }

    pub fn threshold(&self) -> Duration {
        self.shared.threshold
    }

    pub fn register_endpoint(
        &self,
        block: &str,
        endpoint: &str,
        operation: &'static str,
    ) -> WatchdogHandle {
        let state = Arc::new(EndpointState {
            started: AtomicU64::new(IDLE),
            warned: AtomicBool::new(false),
            block: block.to_string(),
            endpoint: endpoint.to_string(),
            operation,
        });
        self.shared.endpoints.lock().push(Arc::downgrade(&state));
        WatchdogHandle {
            state,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Operations currently blocked past the threshold.
    pub fn blocked(&self) -> Vec<BlockedOperation> {
        scan(&self.shared, |_| {})
    }

    /// Endpoints still registered and alive.
    pub fn registered(&self) -> usize {
        self.shared
            .endpoints
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(monitor) = self.monitor.take() {
            if monitor.join().is_err() {
                warn!("Watchdog thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("threshold", &self.shared.threshold)
            .field("monitoring", &self.monitor.is_some())
            .finish()
    }
}

fn monitor_loop(shared: &Shared, stop: &Receiver<()>, interval: Duration) {
    debug!("Watchdog started, threshold {:?}", shared.threshold);
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
        scan(shared, |op| {
            warn!(
                "BLOCKED: [{}] {} on '{}' for {:.1}s",
                op.block,
                op.operation,
                op.endpoint,
                op.blocked_for.as_secs_f64()
            );
        });
    }
    debug!("Watchdog stopped");
}

/// Collect blocked operations, calling `on_new` for each one not yet reported.
fn scan(shared: &Shared, mut on_new: impl FnMut(&BlockedOperation)) -> Vec<BlockedOperation> {
    let now = shared.now();
    let threshold = u64::try_from(shared.threshold.as_millis()).unwrap_or(u64::MAX);
    let mut blocked = Vec::new();

    shared.endpoints.lock().retain(|weak| {
        let Some(state) = weak.upgrade() else {
            return false;
        };
        let started = state.started.load(Ordering::Relaxed);
        let elapsed = now.saturating_sub(started);
        if started != IDLE && elapsed > threshold {
            let op = BlockedOperation {
                block: state.block.clone(),
                endpoint: state.endpoint.clone(),
                operation: state.operation,
                blocked_for: Duration::from_millis(elapsed),
            };
            if !state.warned.swap(true, Ordering::Relaxed) {
                on_new(&op);
            }
            blocked.push(op);
        }
        true
    });
    blocked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_endpoint_is_not_blocked() {
        let watchdog = Watchdog::new(Duration::ZERO);
        let _handle = watchdog.register_endpoint("src", "out", "write");
        assert!(watchdog.blocked().is_empty());
    }

    #[test]
    fn test_long_operation_is_reported_until_finished() {
        let watchdog = Watchdog::new(Duration::from_millis(20));
        let handle = watchdog.register_endpoint("sink", "in", "read");

        let guard = handle.guard();
        thread::sleep(Duration::from_millis(60));
        let blocked = watchdog.blocked();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].block, "sink");
        assert_eq!(blocked[0].operation, "read");
        assert!(blocked[0].blocked_for >= Duration::from_millis(20));

        drop(guard);
        assert!(watchdog.blocked().is_empty());
    }

    #[test]
    fn test_dropped_endpoints_are_forgotten() {
        let watchdog = Watchdog::new(Duration::from_secs(1));
        let handle = watchdog.register_endpoint("a", "out", "write");
        assert_eq!(watchdog.registered(), 1);
        drop(handle);
        assert_eq!(watchdog.registered(), 0);
        watchdog.blocked();
        assert!(watchdog.shared.endpoints.lock().is_empty());
    }

    #[test]
    fn test_monitor_thread_stops_on_drop() {
        let watchdog = Watchdog::spawn(Duration::from_secs(1), Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(30));
        drop(watchdog);
    }
}
