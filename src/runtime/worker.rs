//! Per-block worker thread
//!
//! Every active block drives itself: its [`WorkerThread`] calls the block's
//! work function in a loop until stopped. There is no central scheduler.
//!
//! The work function returns `Ok(n)` with the number of items it produced,
//! `Err(WorkError::Shutdown)` when the block has nothing more to do, or any
//! other error to end the loop with an error report.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

use super::errors::{BlockError, WorkError, WorkResult};

/// Handed to the work function on every iteration.
pub struct WorkerContext {
    name: String,
    running: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
    poll_interval: Duration,
}

impl WorkerContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn should_stop(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }

    /// Sleep for the poll interval, waking early if the worker is stopped.
    ///
    /// For blocks that have nothing to do yet, such as an unset block size.
    pub fn idle(&self) {
        match self.stop_rx.recv_timeout(self.poll_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => debug!("[{}] Woken from idle by stop", self.name),
        }
    }
}

pub struct WorkerThread {
    name: String,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerThread {
    pub fn new(name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            name: name.into(),
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the worker loop around `body`. Does nothing if already running.
    pub fn start<F>(&self, mut body: F) -> Result<(), BlockError>
    where
        F: FnMut(&WorkerContext) -> WorkResult<usize> + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        // A previous run that ended on its own still needs joining
        if let Some(finished) = handle.take() {
            if finished.join().is_err() {
                error!("[{}] Previous worker panicked", self.name);
            }
        }

        let (stop_tx, stop_rx) = bounded(0);
        let context = WorkerContext {
            name: self.name.clone(),
            running: Arc::clone(&self.running),
            stop_rx,
            poll_interval: self.poll_interval,
        };

        self.running.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(&mut body, &context));
        match spawned {
            Ok(thread) => {
                *handle = Some(thread);
                *self.stop_tx.lock() = Some(stop_tx);
                debug!("[{}] Worker started", self.name);
                Ok(())
            }
            Err(source) => {
                self.running.store(false, Ordering::Release);
                Err(BlockError::Spawn {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Ask the loop to finish after the current iteration.
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::Release);
        // Dropping the sender wakes an idling worker
        drop(self.stop_tx.lock().take());
    }

    /// Wait for the worker thread to exit.
    pub fn join(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Stopped from within its own work function; the loop ends by itself
            return;
        }
        if handle.join().is_err() {
            error!("[{}] Worker thread panicked", self.name);
        }
    }

    /// Signal and join. Does nothing if not running.
    pub fn stop(&self) {
        self.signal_stop();
        self.join();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

fn run<F>(body: &mut F, context: &WorkerContext)
where
    F: FnMut(&WorkerContext) -> WorkResult<usize>,
{
    let mut produced = 0usize;
    while !context.should_stop() {
        match body(context) {
            Ok(n) => produced += n,
            Err(WorkError::Shutdown) => {
                debug!("[{}] Work complete", context.name);
                break;
            }
            Err(e) => {
                error!("[{}] Work error: {}", context.name, e);
                break;
            }
        }
    }
    context.running.store(false, Ordering::Release);
    info!("[{}] Shutdown. Produced {} items.", context.name, produced);
}
