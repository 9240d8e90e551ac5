//! Reference blocks
//!
//! Small blocks built only on the runtime's public contracts:
//! - **SequenceSource**: emits a range of integers
//! - **CollectorSink**: keeps everything it reads
//! - **Passthrough**: identity stage with cascaded attributes
//! - **FrameAssembler**: packs samples into pooled frames
//!
//! [`BuiltinDriver`] exposes them through the factory interface.

mod assembler;
mod passthrough;
mod sink;
mod source;

pub use assembler::{DEFAULT_FRAME_SIZE, FRAME_SIZE_ATTRIBUTE, FrameAssembler};
pub use passthrough::{Passthrough, UPSTREAM_CONNECTED_ATTRIBUTE};
pub use sink::{CollectorSink, DEFAULT_SINK_BLOCK_SIZE};
pub use source::{DEFAULT_SOURCE_BLOCK_SIZE, SequenceSource};

use std::sync::Arc;

use crate::runtime::{Block, BlockError, BlockFactory, Driver, ElementType, Fingerprint, Runtime};

pub const DRIVER_NAME: &str = "builtin";

type CreateFn = fn(&Runtime, &str) -> Arc<dyn Block>;

struct BuiltinFactory {
    name: &'static str,
    inputs: &'static [ElementType],
    outputs: &'static [ElementType],
    create: CreateFn,
}

impl BlockFactory for BuiltinFactory {
    fn name(&self) -> &str {
        self.name
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.inputs, self.outputs)
    }

    fn create(&self, runtime: &Runtime) -> Result<Arc<dyn Block>, BlockError> {
        Ok((self.create)(runtime, self.name))
    }
}

/// Driver for the reference blocks.
#[derive(Debug, Default)]
pub struct BuiltinDriver;

impl BuiltinDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for BuiltinDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn factories(&self) -> Vec<Arc<dyn BlockFactory>> {
        vec![
            Arc::new(BuiltinFactory {
                name: "sequence",
                inputs: &[],
                outputs: &[ElementType::Long],
                create: |rt, name| SequenceSource::new(rt, name, 0..i32::MAX) as Arc<dyn Block>,
            }),
            Arc::new(BuiltinFactory {
                name: "collector",
                inputs: &[ElementType::Long],
                outputs: &[],
                create: |rt, name| CollectorSink::<i32>::new(rt, name) as Arc<dyn Block>,
            }),
            Arc::new(BuiltinFactory {
                name: "passthrough",
                inputs: &[ElementType::ComplexSingle],
                outputs: &[ElementType::ComplexSingle],
                create: |rt, name| {
                    Passthrough::<num_complex::Complex32>::new(rt, name) as Arc<dyn Block>
                },
            }),
            Arc::new(BuiltinFactory {
                name: "assembler",
                inputs: &[ElementType::Single],
                outputs: &[ElementType::VecSingle],
                create: |rt, name| FrameAssembler::<f32>::new(rt, name) as Arc<dyn Block>,
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;

    #[test]
    fn test_factory_fingerprints_match_blocks() {
        let rt = Runtime::new(RuntimeConfig::new().with_watchdog_threshold(None)).unwrap();
        let driver = BuiltinDriver::new();
        for factory in driver.factories() {
            assert!(factory.can_create());
            assert!(!factory.can_discover());
            let block = factory.create(&rt).unwrap();
            assert_eq!(block.fingerprint(), factory.fingerprint(), "{}", factory.name());
            assert_eq!(block.driver(), DRIVER_NAME);
            assert_eq!(block.name(), factory.name());
        }
    }

    #[test]
    fn test_driver_lookup() {
        let rt = Runtime::new(RuntimeConfig::new().with_watchdog_threshold(None)).unwrap();
        let driver = BuiltinDriver::new();
        let block = driver.create(&rt, "assembler").unwrap();
        assert_eq!(block.incoming().len(), 1);
        assert_eq!(block.outgoing().len(), 1);

        assert!(matches!(
            driver.create(&rt, "fft"),
            Err(BlockError::UnknownFactory(_))
        ));
        let wanted = Fingerprint::new(&[ElementType::Long], &[]);
        let compatible = driver.compatible(&wanted);
        assert_eq!(compatible.len(), 1);
        assert_eq!(compatible[0].name(), "collector");
        assert!(driver.discover(&rt).is_empty());
    }
}
