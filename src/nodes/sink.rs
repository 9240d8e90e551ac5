//! Collecting sink
//!
//! Reads up to `blockSize` elements per iteration and keeps everything it
//! received, for inspection by tests and tools.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::runtime::{
    Attribute, AttributeSet, BLOCK_SIZE_ATTRIBUTE, Block, BlockCore, BlockError, Element,
    ElementType, InputEndpoint, Runtime, Timeout, WorkResult, WorkerContext,
};

pub const DEFAULT_SINK_BLOCK_SIZE: i32 = 64;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

struct SinkState<T: Element> {
    input: InputEndpoint<T>,
    block_size: Attribute,
    received: Mutex<Vec<T>>,
    arrived: Condvar,
}

impl<T: Element> SinkState<T> {
    fn work(&self, ctx: &WorkerContext) -> WorkResult<usize> {
        let width = self.block_size.get::<i32>().unwrap_or(0);
        if width <= 0 {
            ctx.idle();
            return Ok(0);
        }

        // `read_many` grows the chunk by what actually arrived
        let mut chunk = Vec::new();
        let n = self
            .input
            .read_many(&mut chunk, width as usize, Timeout::After(READ_TIMEOUT));
        if n > 0 {
            self.received.lock().extend(chunk);
            self.arrived.notify_all();
        }
        Ok(n)
    }
}

pub struct CollectorSink<T: Element> {
    core: BlockCore,
    state: Arc<SinkState<T>>,
}

impl<T: Element> CollectorSink<T> {
    pub fn new(runtime: &Runtime, name: &str) -> Arc<Self> {
        let core = BlockCore::new(runtime, name, super::DRIVER_NAME);
        let input = InputEndpoint::new(runtime, name, "in");
        core.add_endpoint(Arc::new(input.clone()));

        let block_size = Attribute::builder(BLOCK_SIZE_ATTRIBUTE, ElementType::Long)
            .description("Maximum elements read per iteration")
            .initial(DEFAULT_SINK_BLOCK_SIZE)
            .build(runtime);
        core.attributes().insert(block_size.clone());

        Arc::new(Self {
            core,
            state: Arc::new(SinkState {
                input,
                block_size,
                received: Mutex::new(Vec::new()),
                arrived: Condvar::new(),
            }),
        })
    }

    pub fn input(&self) -> &InputEndpoint<T> {
        &self.state.input
    }

    /// Attributes of whatever feeds this sink.
    pub fn upstream_attributes(&self) -> Option<AttributeSet> {
        self.state.input.upstream_attributes()
    }

    pub fn received(&self) -> Vec<T> {
        self.state.received.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.state.received.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` elements arrived; returns whether they did.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut received = self.state.received.lock();
        while received.len() < count {
            if self.state.arrived.wait_until(&mut received, deadline).timed_out() {
                return received.len() >= count;
            }
        }
        true
    }
}

impl<T: Element> Block for CollectorSink<T> {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn start(&self) -> Result<(), BlockError> {
        let state = Arc::clone(&self.state);
        self.core.spawn(move |ctx| state.work(ctx))
    }
}
