//! Block factories and drivers
//!
//! A [`Driver`] groups the [`BlockFactory`]s that create its blocks. Each
//! factory advertises the [`Fingerprint`] of the blocks it makes so saved
//! pipeline configurations can be checked against what is available.

use std::sync::Arc;
use tracing::debug;

use super::block::{Block, Fingerprint};
use super::context::Runtime;
use super::errors::BlockError;

pub trait BlockFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Type signature of the blocks this factory creates.
    fn fingerprint(&self) -> Fingerprint;

    /// Whether `create` is supported.
    fn can_create(&self) -> bool {
        true
    }

    /// Whether `discover` can find existing instances (e.g. hardware).
    fn can_discover(&self) -> bool {
        false
    }

    /// A new block. The returned `Arc` is the caller's first reference.
    fn create(&self, runtime: &Runtime) -> Result<Arc<dyn Block>, BlockError>;

    fn discover(&self, _runtime: &Runtime) -> Vec<Arc<dyn Block>> {
        Vec::new()
    }
}

pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn factories(&self) -> Vec<Arc<dyn BlockFactory>>;

    fn factory(&self, name: &str) -> Option<Arc<dyn BlockFactory>> {
        self.factories().into_iter().find(|f| f.name() == name)
    }

    /// Factories whose blocks match a saved fingerprint.
    fn compatible(&self, fingerprint: &Fingerprint) -> Vec<Arc<dyn BlockFactory>> {
        self.factories()
            .into_iter()
            .filter(|f| f.fingerprint().is_compatible(fingerprint))
            .collect()
    }

    /// Create a block with the named factory.
    fn create(&self, runtime: &Runtime, factory: &str) -> Result<Arc<dyn Block>, BlockError> {
        let factory = self
            .factory(factory)
            .ok_or_else(|| BlockError::UnknownFactory(factory.to_string()))?;
        if !factory.can_create() {
            return Err(BlockError::CannotCreate(factory.name().to_string()));
        }
        let block = factory.create(runtime)?;
        debug!("[{}] Created by {}/{}", block.name(), self.name(), factory.name());
        Ok(block)
    }

    /// Every block any discovering factory can find.
    fn discover(&self, runtime: &Runtime) -> Vec<Arc<dyn Block>> {
        self.factories()
            .iter()
            .filter(|f| f.can_discover())
            .flat_map(|f| f.discover(runtime))
            .collect()
    }
}
