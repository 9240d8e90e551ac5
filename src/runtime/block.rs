//! Block contract and shared block state
//!
//! A block is a unit of processing shared as `Arc<dyn Block>`: the `Arc`
//! returned by its factory is the caller's first reference and the block is
//! dropped with the last one. Concrete blocks embed a [`BlockCore`] holding
//! what every block has (name, driver, parent and children, endpoints,
//! attributes, worker thread) and implement [`Block::start`] to launch their
//! work loop.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::attribute::{Attribute, AttributeSet};
use super::context::Runtime;
use super::endpoint::{Direction, Endpoint, OutputEndpoint};
use super::errors::{BlockError, ConnectionError, WorkResult};
use super::timeout::Timeout;
use super::types::{Element, ElementType};
use super::worker::{WorkerContext, WorkerThread};

/// Attribute fired when an output accepts fewer elements than were produced.
pub const SYNC_FAULT_ATTRIBUTE: &str = "syncFault";

/// Attribute holding a block's processing width.
pub const BLOCK_SIZE_ATTRIBUTE: &str = "blockSize";

pub trait Block: Send + Sync {
    fn core(&self) -> &BlockCore;

    /// Launch the block's worker. Calling it on a running block does nothing.
    fn start(&self) -> Result<(), BlockError>;

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Name of the driver whose factory created this block.
    fn driver(&self) -> &str {
        self.core().driver()
    }

    fn parent(&self) -> Option<Arc<dyn Block>> {
        self.core().parent()
    }

    fn children(&self) -> Vec<Arc<dyn Block>> {
        self.core().children()
    }

    fn incoming(&self) -> Vec<Arc<dyn Endpoint>> {
        self.core().incoming()
    }

    fn outgoing(&self) -> Vec<Arc<dyn Endpoint>> {
        self.core().outgoing()
    }

    fn attributes(&self) -> &AttributeSet {
        self.core().attributes()
    }

    fn stop(&self) {
        self.core().stop()
    }

    fn is_running(&self) -> bool {
        self.core().is_running()
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.core())
    }
}

/// State shared by every block.
pub struct BlockCore {
    name: String,
    driver: String,
    parent: Mutex<Option<Weak<dyn Block>>>,
    children: Mutex<Vec<Arc<dyn Block>>>,
    incoming: Mutex<Vec<Arc<dyn Endpoint>>>,
    outgoing: Mutex<Vec<Arc<dyn Endpoint>>>,
    attributes: AttributeSet,
    worker: WorkerThread,
}

impl BlockCore {
    pub fn new(runtime: &Runtime, name: impl Into<String>, driver: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            worker: WorkerThread::new(name.clone(), runtime.config().poll_interval),
            name,
            driver: driver.into(),
            parent: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            incoming: Mutex::new(Vec::new()),
            outgoing: Mutex::new(Vec::new()),
            attributes: AttributeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// Register an endpoint under its direction.
    pub fn add_endpoint(&self, endpoint: Arc<dyn Endpoint>) {
        match endpoint.direction() {
            Direction::Input => self.incoming.lock().push(endpoint),
            Direction::Output => self.outgoing.lock().push(endpoint),
        }
    }

    pub fn incoming(&self) -> Vec<Arc<dyn Endpoint>> {
        self.incoming.lock().clone()
    }

    pub fn outgoing(&self) -> Vec<Arc<dyn Endpoint>> {
        self.outgoing.lock().clone()
    }

    pub fn parent(&self) -> Option<Arc<dyn Block>> {
        self.parent.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> Vec<Arc<dyn Block>> {
        self.children.lock().clone()
    }

    /// Start the worker loop with `body`.
    pub fn spawn<F>(&self, body: F) -> Result<(), BlockError>
    where
        F: FnMut(&WorkerContext) -> WorkResult<usize> + Send + 'static,
    {
        self.worker.start(body)
    }

    /// Stop the worker: signal it, wake anything it is blocked on, then join.
    pub fn stop(&self) {
        self.worker.signal_stop();
        for endpoint in self.incoming().iter().chain(self.outgoing().iter()) {
            endpoint.interrupt();
        }
        self.worker.join();
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    fn endpoints_of(&self, direction: Direction) -> Vec<ElementType> {
        let endpoints = match direction {
            Direction::Input => self.incoming.lock(),
            Direction::Output => self.outgoing.lock(),
        };
        endpoints.iter().map(|e| e.element_type()).collect()
    }
}

impl Drop for BlockCore {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for BlockCore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BlockCore")
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Nest `child` under `parent`. The parent keeps the child alive; the child
/// refers back weakly.
pub fn adopt(parent: &Arc<dyn Block>, child: Arc<dyn Block>) {
    *child.core().parent.lock() = Some(Arc::downgrade(parent));
    debug!("[{}] Adopted '{}'", parent.name(), child.name());
    parent.core().children.lock().push(child);
}

/// Endpoint `name` of `block`, searching inputs before outputs.
pub fn find_endpoint(block: &dyn Block, name: &str) -> Result<Arc<dyn Endpoint>, ConnectionError> {
    block
        .incoming()
        .into_iter()
        .chain(block.outgoing())
        .find(|e| e.name() == name)
        .ok_or_else(|| ConnectionError::EndpointNotFound {
            block: block.name().to_string(),
            endpoint: name.to_string(),
        })
}

/// Link output `from_endpoint` of `from` to input `to_endpoint` of `to`.
pub fn link_blocks(
    from: &dyn Block,
    from_endpoint: &str,
    to: &dyn Block,
    to_endpoint: &str,
) -> Result<(), ConnectionError> {
    let output = find_endpoint(from, from_endpoint)?;
    if output.direction() != Direction::Output {
        return Err(ConnectionError::NotAnOutput {
            block: from.name().to_string(),
            endpoint: from_endpoint.to_string(),
        });
    }
    let input = find_endpoint(to, to_endpoint)?;
    output.link(input.as_ref())
}

/// Write `items`, firing `sync_fault` if the output is connected but took
/// fewer than all of them.
pub fn emit<T: Element>(
    output: &OutputEndpoint<T>,
    items: &[T],
    timeout: Timeout,
    sync_fault: &Attribute,
) -> usize {
    let written = output.write_many(items, timeout);
    if written < items.len() && output.is_connected() {
        warn!(
            "[{}] Sync fault on '{}': {} of {} written",
            output.block_name(),
            output.name(),
            written,
            items.len()
        );
        sync_fault.fire();
    }
    written
}

/// Separates the input codes from the output codes in a fingerprint.
const SIGNATURE_SEPARATOR: u8 = 0xff;

/// Opaque byte sequence identifying a block's type signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn new(inputs: &[ElementType], outputs: &[ElementType]) -> Self {
        let mut bytes = Vec::with_capacity(inputs.len() + outputs.len() + 1);
        bytes.extend(inputs.iter().map(|t| t.code()));
        bytes.push(SIGNATURE_SEPARATOR);
        bytes.extend(outputs.iter().map(|t| t.code()));
        Self(bytes)
    }

    pub fn of(core: &BlockCore) -> Self {
        Self::new(
            &core.endpoints_of(Direction::Input),
            &core.endpoints_of(Direction::Output),
        )
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether a block with `other` can stand in for one with this signature.
    pub fn is_compatible(&self, other: &Fingerprint) -> bool {
        self == other
    }

    /// Decode back into the input and output types.
    pub fn signature(&self) -> Option<(Vec<ElementType>, Vec<ElementType>)> {
        let split = self.0.iter().position(|&b| b == SIGNATURE_SEPARATOR)?;
        let decode = |codes: &[u8]| {
            codes
                .iter()
                .map(|&c| ElementType::from_code(c))
                .collect::<Option<Vec<_>>>()
        };
        Some((decode(&self.0[..split])?, decode(&self.0[split + 1..])?))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
