//! Pooled, shared vector frames
//!
//! A [`Frame`] is a shared handle to a fixed-length array of one numeric
//! element type, used for variable-length sample blocks (FFT output, assembled
//! sample frames). Cloning a frame takes another reference; when the last
//! reference is dropped the storage goes back to the [`FramePool`] it came
//! from instead of being freed.
//!
//! Pools are segregated by exact length: [`FramePool::retrieve`] scans the
//! free list for a frame of the requested size and allocates a new one only
//! if none is found. The free list holds at most `max_depth` frames
//! ([`MAX_POOL_SIZE`] by default); releasing one more evicts and frees the
//! oldest.
//!
//! The pool also tracks how many frames it has handed out and not yet freed.
//! Crossing the soft limit almost always means a frame is being leaked by its
//! holder; it is reported with `warn!` and trips a debug assertion.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

use super::errors::FrameError;
use super::types::Numeric;

/// Free-list depth per element type.
pub const MAX_POOL_SIZE: usize = 15;

/// Live frames per element type above which a leak is assumed.
pub const DEFAULT_SOFT_LIMIT: usize = 1024;

struct PoolShared<T: Numeric> {
    free: Mutex<VecDeque<Vec<T>>>,
    /// Frames allocated by this pool and not yet freed (pooled + in flight).
    live: AtomicUsize,
    max_depth: usize,
    soft_limit: usize,
}

impl<T: Numeric> PoolShared<T> {
    fn recycle(&self, data: Vec<T>) {
        let mut free = self.free.lock();
        free.push_back(data);
        if free.len() > self.max_depth {
            if let Some(evicted) = free.pop_front() {
                self.live.fetch_sub(1, Ordering::Relaxed);
                trace!(
                    "{} pool full, freeing frame of {} elements",
                    T::VECTOR_TYPE,
                    evicted.len()
                );
            }
        }
    }
}

struct FrameInner<T: Numeric> {
    data: Vec<T>,
    pool: Weak<PoolShared<T>>,
}

impl<T: Numeric> Drop for FrameInner<T> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(std::mem::take(&mut self.data));
        }
    }
}

/// Shared, fixed-length sample array.
pub struct Frame<T: Numeric> {
    inner: Arc<FrameInner<T>>,
}

impl<T: Numeric> Frame<T> {
    /// Wrap a vector in a frame that belongs to no pool.
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                data,
                pool: Weak::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.inner.data
    }

    /// Mutable access, available only while this is the sole reference.
    pub fn get_mut(&mut self) -> Option<&mut [T]> {
        Arc::get_mut(&mut self.inner).map(|inner| inner.data.as_mut_slice())
    }

    /// Number of live references to this frame.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles refer to the same frame.
    pub fn ptr_eq(&self, other: &Frame<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the sample storage; stable across pool round trips.
    pub fn as_ptr(&self) -> *const T {
        self.inner.data.as_ptr()
    }

    /// Whether this frame returns to a pool when released.
    pub fn is_pooled(&self) -> bool {
        self.inner.pool.strong_count() > 0
    }
}

impl<T: Numeric> Clone for Frame<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Numeric> Deref for Frame<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.inner.data
    }
}

impl<T: Numeric> PartialEq for Frame<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.as_slice() == other.as_slice()
    }
}

impl<T: Numeric> fmt::Debug for Frame<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Frame<{}>[len={}, refs={}]",
            T::TYPE,
            self.len(),
            self.ref_count()
        )
    }
}

/// Per-element-type recycling pool of frames.
pub struct FramePool<T: Numeric> {
    shared: Arc<PoolShared<T>>,
}

impl<T: Numeric> FramePool<T> {
    pub fn new() -> Self {
        Self::with_limits(MAX_POOL_SIZE, DEFAULT_SOFT_LIMIT)
    }

    pub fn with_limits(max_depth: usize, soft_limit: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(VecDeque::with_capacity(max_depth + 1)),
                live: AtomicUsize::new(0),
                max_depth,
                soft_limit,
            }),
        }
    }

    /// Hand out a frame of exactly `size` elements, reusing a released one
    /// when possible. The caller holds the only reference.
    ///
    /// Reused frames keep whatever samples they held before.
    pub fn retrieve(&self, size: usize) -> Result<Frame<T>, FrameError> {
        if let Some(data) = self.take_pooled(size) {
            return Ok(self.wrap(data));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| FrameError::Allocation {
                element_type: T::VECTOR_TYPE,
                size,
            })?;
        data.resize(size, T::default());

        let live = self.shared.live.fetch_add(1, Ordering::Relaxed) + 1;
        if live > self.shared.soft_limit {
            warn!(
                "{} pool has {} live frames (soft limit {}); frames are probably being leaked",
                T::VECTOR_TYPE,
                live,
                self.shared.soft_limit
            );
        }
        debug_assert!(
            live <= self.shared.soft_limit,
            "{} live frames exceed the soft limit of {}",
            live,
            self.shared.soft_limit
        );

        Ok(self.wrap(data))
    }

    /// Frames waiting in the free list.
    pub fn pooled(&self) -> usize {
        self.shared.free.lock().len()
    }

    /// Sizes of the pooled frames, oldest first.
    pub fn pooled_sizes(&self) -> Vec<usize> {
        self.shared.free.lock().iter().map(Vec::len).collect()
    }

    /// Frames allocated by this pool and not yet freed.
    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::Relaxed)
    }

    pub fn max_depth(&self) -> usize {
        self.shared.max_depth
    }

    fn take_pooled(&self, size: usize) -> Option<Vec<T>> {
        let mut free = self.shared.free.lock();
        let index = free.iter().position(|data| data.len() == size)?;
        free.remove(index)
    }

    fn wrap(&self, data: Vec<T>) -> Frame<T> {
        Frame {
            inner: Arc::new(FrameInner {
                data,
                pool: Arc::downgrade(&self.shared),
            }),
        }
    }
}

impl<T: Numeric> Clone for FramePool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Numeric> Default for FramePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Numeric> fmt::Debug for FramePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("element_type", &T::VECTOR_TYPE)
            .field("pooled", &self.pooled())
            .field("live", &self.live())
            .finish()
    }
}
