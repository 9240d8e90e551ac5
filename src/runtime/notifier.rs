//! Off-thread dispatch of attribute notifications
//!
//! Observer callbacks never run on the thread that changed an attribute: they
//! are queued as jobs on a small worker pool fed by a bounded crossbeam
//! channel. When the queue is full the pool grows by one worker (up to its
//! maximum) before the submitter is made to wait. Dispatch threads are never
//! made to wait: a job submitted from inside another job goes to an unbounded
//! overflow queue that the same threads drain.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, unbounded};
use parking_lot::Mutex;
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static ON_DISPATCH_THREAD: Cell<bool> = const { Cell::new(false) };
}

pub struct Notifier {
    tx: Option<Sender<Job>>,
    rx: Receiver<Job>,
    overflow_tx: Option<Sender<Job>>,
    overflow_rx: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    max_workers: usize,
}

impl Notifier {
    /// Start `workers` dispatch threads; the pool may grow to `max_workers`.
    pub fn new(workers: usize, max_workers: usize, queue_depth: usize) -> std::io::Result<Self> {
        let (tx, rx) = bounded(queue_depth.max(1));
        let (overflow_tx, overflow_rx) = unbounded();
        let notifier = Self {
            tx: Some(tx),
            rx,
            overflow_tx: Some(overflow_tx),
            overflow_rx,
            workers: Mutex::new(Vec::new()),
            max_workers: max_workers.max(workers).max(1),
        };
        {
            let mut pool = notifier.workers.lock();
            for _ in 0..workers.max(1) {
                notifier.spawn_worker(&mut pool)?;
            }
        }
        Ok(notifier)
    }

    /// Queue a job for a dispatch thread.
    pub fn submit(&self, job: Job) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.grow();
                if ON_DISPATCH_THREAD.with(Cell::get) {
                    self.overflow(job);
                } else if tx.send(job).is_err() {
                    debug!("Notifier shut down, dropping notification");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Notifier shut down, dropping notification");
            }
        }
    }

    fn overflow(&self, job: Job) {
        let sent = self
            .overflow_tx
            .as_ref()
            .is_some_and(|overflow| overflow.send(job).is_ok());
        if sent {
            trace!("Notification queue full, job sent to overflow");
        } else {
            debug!("Notifier shut down, dropping notification");
        }
    }

    pub fn workers(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn pending(&self) -> usize {
        self.rx.len() + self.overflow_rx.len()
    }

    fn grow(&self) {
        let mut pool = self.workers.lock();
        if pool.len() >= self.max_workers {
            return;
        }
        match self.spawn_worker(&mut pool) {
            Ok(()) => debug!("Notification queue full, grew pool to {} workers", pool.len()),
            Err(e) => warn!("Failed to grow notification pool: {}", e),
        }
    }

    fn spawn_worker(&self, pool: &mut Vec<JoinHandle<()>>) -> std::io::Result<()> {
        let rx = self.rx.clone();
        let overflow = self.overflow_rx.clone();
        let handle = thread::Builder::new()
            .name(format!("notify-{}", pool.len()))
            .spawn(move || {
                ON_DISPATCH_THREAD.with(|flag| flag.set(true));
                while let Some(job) = next_job(&rx, &overflow) {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Attribute observer panicked");
                    }
                }
            })?;
        pool.push(handle);
        Ok(())
    }
}

/// Overflow first, then whichever queue has work. `None` once both are closed
/// and empty.
fn next_job(rx: &Receiver<Job>, overflow: &Receiver<Job>) -> Option<Job> {
    if let Ok(job) = overflow.try_recv() {
        return Some(job);
    }
    select! {
        recv(rx) -> job => job.ok().or_else(|| overflow.recv().ok()),
        recv(overflow) -> job => job.ok().or_else(|| rx.recv().ok()),
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Closing the channels lets workers drain what is queued and exit
        drop(self.tx.take());
        drop(self.overflow_tx.take());
        let current = thread::current().id();
        for handle in self.workers.lock().drain(..) {
            // The last reference may be dropped from inside a job
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Notification worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("workers", &self.workers())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_off_thread() {
        let notifier = Notifier::new(1, 1, 4).unwrap();
        let (tx, rx) = unbounded();
        let caller = thread::current().id();
        notifier.submit(Box::new(move || {
            tx.send(thread::current().id()).unwrap();
        }));
        let worker = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn test_pool_grows_when_queue_full() {
        let notifier = Notifier::new(1, 3, 1).unwrap();
        let (release_tx, release_rx) = unbounded::<()>();
        let (done_tx, done_rx) = unbounded();

        for _ in 0..6 {
            let release_rx = release_rx.clone();
            let done_tx = done_tx.clone();
            notifier.submit(Box::new(move || {
                let _ = release_rx.recv_timeout(Duration::from_millis(200));
                done_tx.send(()).unwrap();
            }));
        }
        assert!(notifier.workers() > 1);
        assert!(notifier.workers() <= 3);

        drop(release_tx);
        for _ in 0..6 {
            done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let notifier = Notifier::new(1, 1, 4).unwrap();
        notifier.submit(Box::new(|| panic!("observer bug")));
        let (tx, rx) = unbounded();
        notifier.submit(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
    }

    #[test]
    fn test_submit_from_job_does_not_wait_on_full_queue() {
        let notifier = Arc::new(Notifier::new(1, 1, 1).unwrap());
        let (done_tx, done_rx) = unbounded();

        let inner = Arc::clone(&notifier);
        notifier.submit(Box::new(move || {
            // The only worker fills the queue and keeps submitting
            for i in 0..8 {
                let done_tx = done_tx.clone();
                inner.submit(Box::new(move || done_tx.send(i).unwrap()));
            }
        }));

        let mut got: Vec<i32> = (0..8)
            .map(|_| done_rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        got.sort_unstable();
        assert_eq!(got, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_drains_queue() {
        let (tx, rx) = unbounded();
        {
            let notifier = Notifier::new(1, 1, 8).unwrap();
            for i in 0..5 {
                let tx = tx.clone();
                notifier.submit(Box::new(move || tx.send(i).unwrap()));
            }
        }
        let got: Vec<i32> = rx.try_iter().collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }
}
