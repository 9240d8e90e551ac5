//! Timeouts and deadlines for blocking operations

use parking_lot::{Condvar, MutexGuard};
use std::time::{Duration, Instant};

/// How long a blocking call may wait before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until the operation can complete (or is interrupted).
    Infinite,
    /// Wait at most this long. `Duration::ZERO` means "try once".
    After(Duration),
}

impl Timeout {
    /// Never block.
    pub const ZERO: Timeout = Timeout::After(Duration::ZERO);

    pub fn from_millis(ms: u64) -> Self {
        Timeout::After(Duration::from_millis(ms))
    }

    pub(crate) fn deadline(self) -> Deadline {
        match self {
            Timeout::Infinite => Deadline::Never,
            // An overflowing deadline is as good as no deadline
            Timeout::After(d) => Instant::now()
                .checked_add(d)
                .map_or(Deadline::Never, Deadline::At),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

/// Absolute point in time a blocking call must return by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    Never,
    At(Instant),
}

impl Deadline {
    /// Time left until the deadline, as a `Timeout` for a nested call.
    pub(crate) fn remaining(self) -> Timeout {
        match self {
            Deadline::Never => Timeout::Infinite,
            Deadline::At(at) => Timeout::After(at.saturating_duration_since(Instant::now())),
        }
    }

    /// Block on `cond` until notified or the deadline passes.
    ///
    /// Returns false if the deadline passed without a notification.
    pub(crate) fn wait<S>(self, cond: &Condvar, guard: &mut MutexGuard<'_, S>) -> bool {
        match self {
            Deadline::Never => {
                cond.wait(guard);
                true
            }
            Deadline::At(at) => !cond.wait_until(guard, at).timed_out(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeout_has_no_time_left() {
        let deadline = Timeout::ZERO.deadline();
        assert_eq!(deadline.remaining(), Timeout::ZERO);
    }

    #[test]
    fn test_infinite_timeout_never_expires() {
        assert_eq!(Timeout::Infinite.deadline(), Deadline::Never);
        assert_eq!(Deadline::Never.remaining(), Timeout::Infinite);
    }

    #[test]
    fn test_remaining_shrinks() {
        let deadline = Timeout::from_millis(50).deadline();
        match deadline.remaining() {
            Timeout::After(left) => assert!(left <= Duration::from_millis(50)),
            Timeout::Infinite => panic!("finite timeout became infinite"),
        }
    }
}
