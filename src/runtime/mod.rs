//! Runtime support for typed streaming pipelines

pub mod attribute;
pub mod block;
pub mod buffer;
pub mod config;
pub mod context;
pub mod driver;
pub mod endpoint;
pub mod errors;
pub mod frame;
pub mod notifier;
pub mod registry;
pub mod timeout;
pub mod types;
pub mod watchdog;
pub mod worker;

pub use attribute::{
    Attribute, AttributeBuilder, AttributeFlags, AttributeOption, AttributeSet, ItemizeFlags,
    Observer, ObserverId, RemoteAttributes,
};
pub use block::{
    BLOCK_SIZE_ATTRIBUTE, Block, BlockCore, Fingerprint, SYNC_FAULT_ATTRIBUTE, adopt, emit,
    find_endpoint, link_blocks,
};
pub use buffer::{RemainderWait, RingBuffer, Side};
pub use config::RuntimeConfig;
pub use context::Runtime;
pub use driver::{BlockFactory, Driver};
pub use endpoint::{
    CONNECTED_ATTRIBUTE, Direction, Endpoint, InputEndpoint, OutputEndpoint, connect_endpoints,
};
pub use errors::{
    AttributeError, BlockError, ConnectionError, FrameError, WorkError, WorkResult,
};
pub use frame::{Frame, FramePool};
pub use registry::{PoolRegistry, PoolStats};
pub use timeout::Timeout;
pub use types::{Element, ElementType, Event, Numeric, Stereo, Value};
pub use watchdog::{BlockedOperation, Watchdog};
pub use worker::{WorkerContext, WorkerThread};
