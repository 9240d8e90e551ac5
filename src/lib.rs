//! Typed streaming dataflow runtime for signal-processing pipelines
//!
//! Blocks are connected through typed endpoints and exchange samples through
//! bounded, blocking ring buffers. Each active block drives its own worker
//! thread; there is no central scheduler.
//!
//! # Architecture
//!
//! - **RingBuffer**: bounded FIFO with timed blocking push/pop and bulk moves
//! - **Frame / FramePool**: shared vector samples recycled through per-type pools
//! - **Attribute / AttributeSet**: observable block properties, notified off-thread
//! - **InputEndpoint / OutputEndpoint**: connection points negotiating buffers
//! - **Block / WorkerThread**: block contract and thread-per-block execution
//! - **Runtime**: the shared context (config, pools, notifier, watchdog)
//!
//! # Example
//!
//! ```no_run
//! use sigflow::nodes::{CollectorSink, SequenceSource};
//! use sigflow::{Block, Runtime, RuntimeConfig, connect_endpoints};
//!
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! let source = SequenceSource::new(&runtime, "source", 0..1000);
//! let sink = CollectorSink::<i32>::new(&runtime, "sink");
//! connect_endpoints(source.output(), sink.input());
//! sink.start()?;
//! source.start()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

pub mod nodes;
pub mod runtime;

pub use runtime::{
    Attribute, AttributeError, AttributeFlags, AttributeSet, Block, BlockCore, BlockError,
    BlockFactory, ConnectionError, Direction, Driver, Element, ElementType, Endpoint, Fingerprint,
    Frame, FrameError, FramePool, InputEndpoint, ItemizeFlags, OutputEndpoint, RemainderWait,
    RingBuffer, Runtime, RuntimeConfig, Stereo, Timeout, Value, WorkError, WorkResult,
    connect_endpoints,
};

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Attribute error: {0}")]
    Attribute(#[from] AttributeError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Block error: {0}")]
    Block(#[from] BlockError),
}

pub type Result<T> = std::result::Result<T, FlowError>;
