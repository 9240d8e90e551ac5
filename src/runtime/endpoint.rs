//! Typed connection points
//!
//! Blocks exchange data through endpoints: an [`OutputEndpoint`] writes into
//! a [`RingBuffer`], an [`InputEndpoint`] reads from it. Each endpoint holds
//! at most one buffer at a time. Connecting attaches the new buffer, detaches
//! the old one (waking anything blocked on it from this side), then publishes
//! the change so threads waiting for a connection can proceed.
//!
//! Data calls never fail loudly: timeouts and torn-down connections come back
//! as `None`, `0` or the handed-back value. An unconnected endpoint waits for
//! a connection until the call's deadline.
//!
//! The [`Endpoint`] trait is the type-erased view a block exposes for wiring
//! and introspection.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::attribute::{Attribute, AttributeSet, RemoteAttributes, WeakAttributeSet};
use super::buffer::{RemainderWait, RingBuffer, Side};
use super::context::Runtime;
use super::errors::ConnectionError;
use super::timeout::Timeout;
use super::types::{Element, ElementType, Value};
use super::watchdog::WatchdogHandle;

/// Name of the hidden attribute every endpoint publishes its state in.
pub const CONNECTED_ATTRIBUTE: &str = "connected";

/// Longest chain of deferred endpoints followed by `create_buffer`.
const MAX_DEFERRAL_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Type-erased endpoint, as listed by a block.
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str;

    /// Name of the owning block.
    fn block_name(&self) -> &str;

    fn element_type(&self) -> ElementType;

    fn direction(&self) -> Direction;

    fn is_connected(&self) -> bool;

    fn attributes(&self) -> &AttributeSet;

    /// Drop the current connection, if any.
    fn disconnect(&self);

    /// Make in-flight calls on this endpoint give up.
    fn interrupt(&self);

    /// Connect this endpoint to `peer` through a freshly negotiated buffer.
    fn link(&self, peer: &dyn Endpoint) -> Result<(), ConnectionError>;

    fn as_any(&self) -> &dyn Any;
}

struct Link<T> {
    buffer: Option<Arc<RingBuffer<T>>>,
    /// Bumped on every connection change and interrupt.
    epoch: u64,
}

struct EndpointCore<T: Element> {
    name: String,
    block: String,
    side: Side,
    link: Mutex<Link<T>>,
    changed: Condvar,
    attributes: AttributeSet,
    connected: Attribute,
    /// Handed to the buffer when attaching as a producer.
    exported: Mutex<Option<WeakAttributeSet>>,
    deferral: Mutex<Option<Weak<EndpointCore<T>>>>,
    default_capacity: usize,
    remainder: RemainderWait,
    watchdog: WatchdogHandle,
}

impl<T: Element> EndpointCore<T> {
    fn new(runtime: &Runtime, block: &str, name: &str, side: Side) -> Self {
        let connected = Attribute::builder(CONNECTED_ATTRIBUTE, ElementType::Bool)
            .description("Whether the endpoint has a buffer")
            .read_only()
            .hidden()
            .initial(false)
            .build(runtime);
        let attributes = AttributeSet::new();
        attributes.insert(connected.clone());

        let operation = match side {
            Side::Producer => "write",
            Side::Consumer => "read",
        };
        let config = runtime.config();
        Self {
            name: name.to_string(),
            block: block.to_string(),
            side,
            link: Mutex::new(Link {
                buffer: None,
                epoch: 0,
            }),
            changed: Condvar::new(),
            attributes,
            connected,
            exported: Mutex::new(None),
            deferral: Mutex::new(None),
            default_capacity: config.default_buffer_capacity,
            remainder: config.remainder_wait,
            watchdog: runtime.watch(block, name, operation),
        }
    }

    fn buffer(&self) -> Option<Arc<RingBuffer<T>>> {
        self.link.lock().buffer.clone()
    }

    fn connect(&self, buffer: Option<Arc<RingBuffer<T>>>) {
        let mut link = self.link.lock();
        let unchanged = match (&link.buffer, &buffer) {
            (Some(current), Some(new)) => Arc::ptr_eq(current, new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        if let Some(new) = &buffer {
            let exported = self.exported.lock().as_ref().and_then(WeakAttributeSet::upgrade);
            new.attach(self.side, exported.as_ref());
        }
        let old = std::mem::replace(&mut link.buffer, buffer);
        if let Some(old) = &old {
            old.detach(self.side);
        }
        link.epoch += 1;
        let connected = link.buffer.is_some();
        drop(link);
        self.changed.notify_all();

        if let Err(e) = self.connected.publish(Value::Bool(connected)) {
            warn!("[{}] Failed to publish connection state of '{}': {}", self.block, self.name, e);
        }
        debug!(
            "[{}] '{}' {}",
            self.block,
            self.name,
            if connected { "connected" } else { "disconnected" }
        );
    }

    fn interrupt(&self) {
        let buffer = {
            let mut link = self.link.lock();
            link.epoch += 1;
            link.buffer.clone()
        };
        self.changed.notify_all();
        if let Some(buffer) = buffer {
            buffer.interrupt(self.side);
        }
    }

    /// Wait until connected, then run `op` with the buffer's epoch for this
    /// side and the time left.
    ///
    /// The epoch is read under the link lock, so a disconnect racing with
    /// `op` still interrupts it.
    fn with_buffer<R>(
        &self,
        timeout: Timeout,
        op: impl FnOnce(&RingBuffer<T>, u64, Timeout) -> R,
    ) -> Option<R> {
        let _guard = self.watchdog.guard();
        let deadline = timeout.deadline();
        let (buffer, buffer_epoch) = {
            let mut link = self.link.lock();
            let epoch = link.epoch;
            loop {
                if let Some(buffer) = &link.buffer {
                    break (Arc::clone(buffer), buffer.epoch(self.side));
                }
                if link.epoch != epoch || !deadline.wait(&self.changed, &mut link) {
                    return None;
                }
            }
        };
        Some(op(&buffer, buffer_epoch, deadline.remaining()))
    }

    fn create_buffer(&self, depth: usize) -> Arc<RingBuffer<T>> {
        if let Some(buffer) = self.buffer() {
            return buffer.sibling();
        }
        let deferred = self.deferral.lock().as_ref().and_then(Weak::upgrade);
        if let Some(deferred) = deferred {
            if depth < MAX_DEFERRAL_DEPTH {
                return deferred.create_buffer(depth + 1);
            }
            warn!("[{}] Buffer deferral chain of '{}' is too deep", self.block, self.name);
        }
        Arc::new(RingBuffer::with_remainder_wait(self.default_capacity, self.remainder))
    }
}

impl<T: Element> Drop for EndpointCore<T> {
    fn drop(&mut self) {
        if let Some(buffer) = self.link.get_mut().buffer.take() {
            buffer.detach(self.side);
        }
    }
}

/// Reading side of a connection.
pub struct InputEndpoint<T: Element> {
    core: Arc<EndpointCore<T>>,
}

/// Writing side of a connection.
pub struct OutputEndpoint<T: Element> {
    core: Arc<EndpointCore<T>>,
}

impl<T: Element> Clone for InputEndpoint<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Element> Clone for OutputEndpoint<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Element> InputEndpoint<T> {
    pub fn new(runtime: &Runtime, block: &str, name: &str) -> Self {
        Self {
            core: Arc::new(EndpointCore::new(runtime, block, name, Side::Consumer)),
        }
    }

    /// Switch to `buffer`; a no-op if it is already the current one.
    pub fn connect(&self, buffer: Arc<RingBuffer<T>>) {
        self.core.connect(Some(buffer));
    }

    pub fn buffer(&self) -> Option<Arc<RingBuffer<T>>> {
        self.core.buffer()
    }

    /// Next element, or `None` on timeout or interruption.
    pub fn read(&self, timeout: Timeout) -> Option<T> {
        self.core
            .with_buffer(timeout, |buffer, epoch, left| buffer.pop_from(epoch, left))
            .flatten()
    }

    /// Up to `max` elements appended to `out`; returns how many.
    pub fn read_many(&self, out: &mut Vec<T>, max: usize, timeout: Timeout) -> usize {
        self.core
            .with_buffer(timeout, |buffer, epoch, left| {
                buffer.pop_many_from(epoch, out, max, left)
            })
            .unwrap_or(0)
    }

    /// A buffer matching the current connection's, or a default one.
    pub fn create_buffer(&self) -> Arc<RingBuffer<T>> {
        self.core.create_buffer(0)
    }

    /// Attributes of the block feeding this input, if connected.
    pub fn upstream_attributes(&self) -> Option<AttributeSet> {
        self.core.buffer()?.producer_attributes()
    }
}

impl<T: Element> OutputEndpoint<T> {
    pub fn new(runtime: &Runtime, block: &str, name: &str) -> Self {
        Self {
            core: Arc::new(EndpointCore::new(runtime, block, name, Side::Producer)),
        }
    }

    /// Offer `attributes` to whatever reads from this output.
    pub fn export_attributes(&self, attributes: &AttributeSet) {
        *self.core.exported.lock() = Some(attributes.downgrade());
    }

    /// Create buffers the way `input` would.
    ///
    /// Used by stages that pass data through unchanged, so that their
    /// downstream buffer matches the upstream one.
    pub fn defer_buffers_to(&self, input: &InputEndpoint<T>) {
        *self.core.deferral.lock() = Some(Arc::downgrade(&input.core));
    }

    pub fn connect(&self, buffer: Arc<RingBuffer<T>>) {
        self.core.connect(Some(buffer));
    }

    pub fn buffer(&self) -> Option<Arc<RingBuffer<T>>> {
        self.core.buffer()
    }

    /// Append one element; hands it back on timeout or interruption.
    pub fn write(&self, value: T, timeout: Timeout) -> Result<(), T> {
        let mut value = Some(value);
        let result = self.core.with_buffer(timeout, |buffer, epoch, left| {
            match value.take() {
                Some(v) => buffer.push_from(epoch, v, left),
                None => Ok(()),
            }
        });
        match (result, value) {
            (Some(result), _) => result,
            (None, Some(v)) => Err(v),
            (None, None) => Ok(()),
        }
    }

    /// Append as many of `items` as possible; returns how many.
    pub fn write_many(&self, items: &[T], timeout: Timeout) -> usize {
        self.core
            .with_buffer(timeout, |buffer, epoch, left| {
                buffer.push_many_from(epoch, items, left)
            })
            .unwrap_or(0)
    }

    /// A buffer matching the current connection, the deferred endpoint's, or
    /// a default one.
    pub fn create_buffer(&self) -> Arc<RingBuffer<T>> {
        self.core.create_buffer(0)
    }
}

/// Connect `output` to `input` through a buffer negotiated by the output.
pub fn connect_endpoints<T: Element>(
    output: &OutputEndpoint<T>,
    input: &InputEndpoint<T>,
) -> Arc<RingBuffer<T>> {
    let buffer = output.create_buffer();
    output.connect(Arc::clone(&buffer));
    input.connect(Arc::clone(&buffer));
    buffer
}

macro_rules! impl_endpoint {
    ($endpoint:ident, $direction:expr) => {
        impl<T: Element> Endpoint for $endpoint<T> {
            fn name(&self) -> &str {
                &self.core.name
            }

            fn block_name(&self) -> &str {
                &self.core.block
            }

            fn element_type(&self) -> ElementType {
                T::TYPE
            }

            fn direction(&self) -> Direction {
                $direction
            }

            fn is_connected(&self) -> bool {
                self.core.link.lock().buffer.is_some()
            }

            fn attributes(&self) -> &AttributeSet {
                &self.core.attributes
            }

            fn disconnect(&self) {
                self.core.connect(None);
            }

            fn interrupt(&self) {
                self.core.interrupt();
            }

            fn link(&self, peer: &dyn Endpoint) -> Result<(), ConnectionError> {
                link_endpoints::<T>(self, peer)
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        impl<T: Element> fmt::Debug for $endpoint<T> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_struct(stringify!($endpoint))
                    .field("block", &self.core.block)
                    .field("name", &self.core.name)
                    .field("type", &T::TYPE)
                    .field("connected", &self.is_connected())
                    .finish()
            }
        }
    };
}

impl_endpoint!(InputEndpoint, Direction::Input);
impl_endpoint!(OutputEndpoint, Direction::Output);

fn link_endpoints<T: Element>(
    this: &dyn Endpoint,
    peer: &dyn Endpoint,
) -> Result<(), ConnectionError> {
    let (output, input) = match (this.direction(), peer.direction()) {
        (Direction::Output, Direction::Input) => (this, peer),
        (Direction::Input, Direction::Output) => (peer, this),
        (Direction::Output, Direction::Output) => {
            return Err(ConnectionError::NotAnInput {
                block: peer.block_name().to_string(),
                endpoint: peer.name().to_string(),
            });
        }
        (Direction::Input, Direction::Input) => {
            return Err(ConnectionError::NotAnOutput {
                block: peer.block_name().to_string(),
                endpoint: peer.name().to_string(),
            });
        }
    };

    let mismatch = || ConnectionError::TypeMismatch {
        from_block: output.block_name().to_string(),
        from_endpoint: output.name().to_string(),
        from_type: output.element_type(),
        to_block: input.block_name().to_string(),
        to_endpoint: input.name().to_string(),
        to_type: input.element_type(),
    };
    let typed_output = output.as_any().downcast_ref::<OutputEndpoint<T>>().ok_or_else(mismatch)?;
    let typed_input = input.as_any().downcast_ref::<InputEndpoint<T>>().ok_or_else(mismatch)?;

    connect_endpoints(typed_output, typed_input);
    debug!(
        "Linked {}.{} -> {}.{} ({})",
        output.block_name(),
        output.name(),
        input.block_name(),
        input.name(),
        T::TYPE
    );
    Ok(())
}

impl<T: Element> RemoteAttributes for InputEndpoint<T> {
    fn remote_attributes(&self) -> Option<AttributeSet> {
        self.upstream_attributes()
    }
}
