//! Integer sequence source
//!
//! Emits a half-open range of `i32` values in chunks of `blockSize`. A short
//! write leaves the unsent values queued for the next iteration, so nothing is
//! skipped; the shortfall is reported through the `syncFault` event.

use parking_lot::Mutex;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::runtime::{
    Attribute, BLOCK_SIZE_ATTRIBUTE, Block, BlockCore, BlockError, ElementType, OutputEndpoint,
    Runtime, SYNC_FAULT_ATTRIBUTE, Timeout, WorkError, WorkResult, WorkerContext, emit,
};

/// Values per write unless configured otherwise.
pub const DEFAULT_SOURCE_BLOCK_SIZE: i32 = 64;

/// How long a write may wait for room downstream.
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

struct SourceState {
    output: OutputEndpoint<i32>,
    remaining: Mutex<Range<i32>>,
    block_size: Attribute,
    sync_fault: Attribute,
}

impl SourceState {
    fn work(&self, ctx: &WorkerContext) -> WorkResult<usize> {
        let width = self.block_size.get::<i32>().unwrap_or(0);
        let capacity = self.output.buffer().map_or(0, |buffer| buffer.capacity());
        if width <= 0 || capacity == 0 {
            ctx.idle();
            return Ok(0);
        }
        // More than the buffer holds could never go out in one write
        let width = width.min(i32::try_from(capacity).unwrap_or(i32::MAX));

        let chunk: Vec<i32> = {
            let remaining = self.remaining.lock();
            let end = remaining.start.saturating_add(width).min(remaining.end);
            (remaining.start..end).collect()
        };
        if chunk.is_empty() {
            return Err(WorkError::Shutdown);
        }

        let written = emit(&self.output, &chunk, Timeout::After(WRITE_TIMEOUT), &self.sync_fault);
        self.remaining.lock().start += written as i32;
        Ok(written)
    }
}

pub struct SequenceSource {
    core: BlockCore,
    state: Arc<SourceState>,
}

impl SequenceSource {
    pub fn new(runtime: &Runtime, name: &str, range: Range<i32>) -> Arc<Self> {
        let core = BlockCore::new(runtime, name, super::DRIVER_NAME);
        let output = OutputEndpoint::new(runtime, name, "out");
        core.add_endpoint(Arc::new(output.clone()));

        let block_size = Attribute::builder(BLOCK_SIZE_ATTRIBUTE, ElementType::Long)
            .description("Values written per iteration")
            .initial(DEFAULT_SOURCE_BLOCK_SIZE)
            .build(runtime);
        let sync_fault = Attribute::builder(SYNC_FAULT_ATTRIBUTE, ElementType::Event)
            .description("Downstream did not accept a whole block")
            .read_only()
            .build(runtime);
        core.attributes().insert(block_size.clone());
        core.attributes().insert(sync_fault.clone());
        output.export_attributes(core.attributes());

        Arc::new(Self {
            core,
            state: Arc::new(SourceState {
                output,
                remaining: Mutex::new(range),
                block_size,
                sync_fault,
            }),
        })
    }

    pub fn output(&self) -> &OutputEndpoint<i32> {
        &self.state.output
    }

    /// Values not yet written.
    pub fn remaining(&self) -> Range<i32> {
        self.state.remaining.lock().clone()
    }
}

impl Block for SequenceSource {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn start(&self) -> Result<(), BlockError> {
        info!("[{}] Starting sequence {:?}", self.name(), self.remaining());
        let state = Arc::clone(&self.state);
        self.core.spawn(move |ctx| state.work(ctx))
    }
}
