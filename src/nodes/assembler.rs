//! Frame assembler
//!
//! Gathers `frameSize` scalar samples into one pooled [`Frame`] and writes the
//! frame downstream as a single vector element. Frames come from the
//! runtime's pool for the sample type and return to it once every consumer
//! has dropped them.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::runtime::{
    Attribute, BLOCK_SIZE_ATTRIBUTE, Block, BlockCore, BlockError, ElementType, Frame,
    InputEndpoint, OutputEndpoint, Runtime, SYNC_FAULT_ATTRIBUTE, Timeout, Value, WorkError,
    WorkResult, WorkerContext, emit,
};
use crate::runtime::types::Numeric;

pub const FRAME_SIZE_ATTRIBUTE: &str = "frameSize";

pub const DEFAULT_FRAME_SIZE: i32 = 1024;

const IO_TIMEOUT: Duration = Duration::from_millis(100);

struct AssemblerState<T: Numeric> {
    runtime: Runtime,
    input: InputEndpoint<T>,
    output: OutputEndpoint<Frame<T>>,
    frame_size: Attribute,
    sync_fault: Attribute,
    pending: Mutex<Vec<T>>,
    /// Assembled but not yet accepted downstream.
    ready: Mutex<Option<Frame<T>>>,
}

impl<T: Numeric> AssemblerState<T> {
    fn work(&self, ctx: &WorkerContext) -> WorkResult<usize> {
        let mut ready = self.ready.lock();
        if ready.is_none() {
            let size = self.frame_size.get::<i32>().unwrap_or(0);
            if size <= 0 {
                drop(ready);
                ctx.idle();
                return Ok(0);
            }
            *ready = self.assemble(size as usize)?;
        }

        let Some(frame) = ready.take() else {
            return Ok(0);
        };
        let written = emit(
            &self.output,
            std::slice::from_ref(&frame),
            Timeout::After(IO_TIMEOUT),
            &self.sync_fault,
        );
        if written == 0 {
            *ready = Some(frame);
        }
        Ok(written)
    }

    /// Read towards a full frame; the frame once `size` samples are in.
    fn assemble(&self, size: usize) -> WorkResult<Option<Frame<T>>> {
        let mut pending = self.pending.lock();
        if pending.len() < size {
            let missing = size - pending.len();
            self.input.read_many(&mut pending, missing, Timeout::After(IO_TIMEOUT));
        }
        if pending.len() < size {
            return Ok(None);
        }

        let mut frame = self.runtime.retrieve_frame::<T>(size)?;
        let Some(samples) = frame.get_mut() else {
            return Err(WorkError::BlockError("fresh frame is shared".to_string()));
        };
        samples.copy_from_slice(&pending[..size]);
        pending.drain(..size);
        Ok(Some(frame))
    }
}

pub struct FrameAssembler<T: Numeric> {
    core: BlockCore,
    state: Arc<AssemblerState<T>>,
}

impl<T: Numeric> FrameAssembler<T> {
    pub fn new(runtime: &Runtime, name: &str) -> Arc<Self> {
        let core = BlockCore::new(runtime, name, super::DRIVER_NAME);
        let input = InputEndpoint::<T>::new(runtime, name, "in");
        let output = OutputEndpoint::<Frame<T>>::new(runtime, name, "out");
        core.add_endpoint(Arc::new(input.clone()));
        core.add_endpoint(Arc::new(output.clone()));

        let frame_size = Attribute::builder(FRAME_SIZE_ATTRIBUTE, ElementType::Long)
            .description("Samples per output frame")
            .initial(DEFAULT_FRAME_SIZE)
            .build(runtime);
        // Lets generic tooling size this block through the usual width knob
        let block_size = Attribute::builder(BLOCK_SIZE_ATTRIBUTE, ElementType::Long)
            .description("Alias of frameSize")
            .proxy_of(vec![frame_size.clone()], |v| Some(v.clone()))
            .write_back(|v| Some(v.clone()))
            .build(runtime);
        let frame_count = Attribute::builder("frameCount", ElementType::LongLong)
            .description("Frames handed out by the pool and not yet freed")
            .read_only()
            .build(runtime);
        let sync_fault = Attribute::builder(SYNC_FAULT_ATTRIBUTE, ElementType::Event)
            .read_only()
            .build(runtime);

        let attributes = core.attributes();
        attributes.insert(frame_size.clone());
        attributes.insert(block_size);
        attributes.insert(frame_count);
        attributes.insert(sync_fault.clone());
        output.export_attributes(attributes);

        Arc::new(Self {
            core,
            state: Arc::new(AssemblerState {
                runtime: runtime.clone(),
                input,
                output,
                frame_size,
                sync_fault,
                pending: Mutex::new(Vec::new()),
                ready: Mutex::new(None),
            }),
        })
    }

    pub fn input(&self) -> &InputEndpoint<T> {
        &self.state.input
    }

    pub fn output(&self) -> &OutputEndpoint<Frame<T>> {
        &self.state.output
    }

    /// Refresh the `frameCount` attribute from the pool and return it.
    pub fn frame_count(&self) -> i64 {
        let live = self.state.runtime.pools().pool::<T>().live() as i64;
        if let Some(attr) = self.core.attributes().get_by_name("frameCount") {
            if let Err(e) = attr.publish(Value::LongLong(live)) {
                warn!("[{}] Failed to publish frame count: {}", self.core.name(), e);
            }
        }
        live
    }
}

impl<T: Numeric> Block for FrameAssembler<T> {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn start(&self) -> Result<(), BlockError> {
        let state = Arc::clone(&self.state);
        self.core.spawn(move |ctx| state.work(ctx))
    }
}
