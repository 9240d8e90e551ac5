//! Identity stage
//!
//! Forwards its input unchanged. Its attribute set cascades to the block
//! feeding it, so settings such as `blockSize` are read from upstream, and
//! its output creates buffers the way its input's buffer was made.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::runtime::endpoint::CONNECTED_ATTRIBUTE;
use crate::runtime::{
    Attribute, AttributeSet, BLOCK_SIZE_ATTRIBUTE, Block, BlockCore, BlockError, Element,
    ElementType, Endpoint, InputEndpoint, OutputEndpoint, Runtime, SYNC_FAULT_ATTRIBUTE, Timeout,
    WorkResult, WorkerContext, emit,
};

/// Name of the proxy mirroring the input's connection state.
pub const UPSTREAM_CONNECTED_ATTRIBUTE: &str = "upstreamConnected";

const IO_TIMEOUT: Duration = Duration::from_millis(100);

struct PassState<T: Element> {
    name: String,
    input: InputEndpoint<T>,
    output: OutputEndpoint<T>,
    attributes: AttributeSet,
    sync_fault: Attribute,
    /// Read but not yet forwarded.
    held: Mutex<Vec<T>>,
}

impl<T: Element> PassState<T> {
    fn width(&self) -> usize {
        self.attributes
            .get_by_name(BLOCK_SIZE_ATTRIBUTE)
            .and_then(|a| a.get_value().as_i64())
            .filter(|&w| w > 0)
            .map_or(0, |w| w as usize)
    }

    fn work(&self, ctx: &WorkerContext) -> WorkResult<usize> {
        let mut held = self.held.lock();
        if held.is_empty() {
            let width = self.width();
            if width == 0 {
                drop(held);
                ctx.idle();
                return Ok(0);
            }
            self.input.read_many(&mut held, width, Timeout::After(IO_TIMEOUT));
            if held.is_empty() {
                return Ok(0);
            }
        }

        let written = emit(&self.output, &held, Timeout::After(IO_TIMEOUT), &self.sync_fault);
        held.drain(..written);
        if !held.is_empty() {
            debug!("[{}] Holding {} elements for retry", self.name, held.len());
        }
        Ok(written)
    }
}

pub struct Passthrough<T: Element> {
    core: BlockCore,
    state: Arc<PassState<T>>,
    upstream_connected: Attribute,
}

impl<T: Element> Passthrough<T> {
    pub fn new(runtime: &Runtime, name: &str) -> Arc<Self> {
        let core = BlockCore::new(runtime, name, super::DRIVER_NAME);
        let input = InputEndpoint::<T>::new(runtime, name, "in");
        let output = OutputEndpoint::<T>::new(runtime, name, "out");
        output.defer_buffers_to(&input);
        core.add_endpoint(Arc::new(input.clone()));
        core.add_endpoint(Arc::new(output.clone()));

        let attributes = core.attributes().clone();
        let sync_fault = Attribute::builder(SYNC_FAULT_ATTRIBUTE, ElementType::Event)
            .read_only()
            .build(runtime);
        attributes.insert(sync_fault.clone());

        let connected = input
            .attributes()
            .get_by_name(CONNECTED_ATTRIBUTE)
            .into_iter()
            .collect();
        let upstream_connected = Attribute::builder(UPSTREAM_CONNECTED_ATTRIBUTE, ElementType::Bool)
            .description("Whether something feeds this stage")
            .proxy_of(connected, |v| Some(v.clone()))
            .build(runtime);
        attributes.insert(upstream_connected.clone());

        attributes.cascade_to(Arc::new(input.clone()));
        output.export_attributes(&attributes);

        Arc::new(Self {
            core,
            state: Arc::new(PassState {
                name: name.to_string(),
                input,
                output,
                attributes,
                sync_fault,
                held: Mutex::new(Vec::new()),
            }),
            upstream_connected,
        })
    }

    pub fn input(&self) -> &InputEndpoint<T> {
        &self.state.input
    }

    pub fn output(&self) -> &OutputEndpoint<T> {
        &self.state.output
    }

    pub fn upstream_connected(&self) -> bool {
        self.upstream_connected.get::<bool>().unwrap_or(false)
    }
}

impl<T: Element> Block for Passthrough<T> {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn start(&self) -> Result<(), BlockError> {
        let state = Arc::clone(&self.state);
        self.core.spawn(move |ctx| state.work(ctx))
    }
}
