//! Frame pool registry
//!
//! One [`FramePool`] per numeric element type, created on first use and owned
//! by the [`Runtime`](super::Runtime). Pools are stored type-erased and keyed
//! by the vector [`ElementType`] they produce.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;

use super::errors::FrameError;
use super::frame::{Frame, FramePool};
use super::types::{ElementType, Numeric};

trait ErasedPool: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn pooled(&self) -> usize;
    fn live(&self) -> usize;
}

impl<T: Numeric> ErasedPool for FramePool<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn pooled(&self) -> usize {
        FramePool::pooled(self)
    }

    fn live(&self) -> usize {
        FramePool::live(self)
    }
}

/// Occupancy of one pool, as reported by [`PoolRegistry::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub element_type: ElementType,
    pub pooled: usize,
    pub live: usize,
}

pub struct PoolRegistry {
    pools: Mutex<HashMap<ElementType, Box<dyn ErasedPool>>>,
    max_depth: usize,
    soft_limit: usize,
}

impl PoolRegistry {
    pub fn new(max_depth: usize, soft_limit: usize) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            max_depth,
            soft_limit,
        }
    }

    /// The pool for `T`, created on first request.
    pub fn pool<T: Numeric>(&self) -> FramePool<T> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools
            .get(&T::VECTOR_TYPE)
            .and_then(|pool| pool.as_any().downcast_ref::<FramePool<T>>())
        {
            return pool.clone();
        }
        let pool = FramePool::<T>::with_limits(self.max_depth, self.soft_limit);
        pools.insert(T::VECTOR_TYPE, Box::new(pool.clone()));
        pool
    }

    /// Shorthand for `pool::<T>().retrieve(size)`.
    pub fn retrieve<T: Numeric>(&self, size: usize) -> Result<Frame<T>, FrameError> {
        self.pool::<T>().retrieve(size)
    }

    /// Occupancy of every pool created so far, ordered by type code.
    pub fn stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self
            .pools
            .lock()
            .iter()
            .map(|(element_type, pool)| PoolStats {
                element_type: *element_type,
                pooled: pool.pooled(),
                live: pool.live(),
            })
            .collect();
        stats.sort_by_key(|s| s.element_type.code());
        stats
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PoolRegistry").field("pools", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::frame::MAX_POOL_SIZE;
    use num_complex::Complex32;

    #[test]
    fn test_same_type_shares_pool() {
        let registry = PoolRegistry::new(MAX_POOL_SIZE, 64);
        let frame = registry.retrieve::<f32>(16).unwrap();
        let address = frame.as_ptr();
        drop(frame);

        let again = registry.pool::<f32>().retrieve(16).unwrap();
        assert_eq!(again.as_ptr(), address);
    }

    #[test]
    fn test_types_are_segregated() {
        let registry = PoolRegistry::new(MAX_POOL_SIZE, 64);
        drop(registry.retrieve::<f32>(8).unwrap());
        let _held = registry.retrieve::<Complex32>(8).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.len(), 2);
        let single = stats.iter().find(|s| s.element_type == ElementType::VecSingle).unwrap();
        assert_eq!((single.pooled, single.live), (1, 1));
        let complex = stats
            .iter()
            .find(|s| s.element_type == ElementType::VecComplexSingle)
            .unwrap();
        assert_eq!((complex.pooled, complex.live), (0, 1));
    }
}
