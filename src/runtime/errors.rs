//! Error types for the runtime system
//!
//! Timeouts and torn-down connections are not errors here: they surface as
//! `None`, `0` or a handed-back value so callers have one retry path for both.
//! What remains are wiring mistakes, attribute misuse and resource failures.

use super::types::ElementType;

/// Error type for wiring endpoints together
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Type mismatch: {from_block}.{from_endpoint} ({from_type}) -> {to_block}.{to_endpoint} ({to_type})")]
    TypeMismatch {
        from_block: String,
        from_endpoint: String,
        from_type: ElementType,
        to_block: String,
        to_endpoint: String,
        to_type: ElementType,
    },

    #[error("Endpoint '{endpoint}' not found on block '{block}'")]
    EndpointNotFound { block: String, endpoint: String },

    #[error("{block}.{endpoint} is an input; links start at an output")]
    NotAnOutput { block: String, endpoint: String },

    #[error("{block}.{endpoint} is an output; links end at an input")]
    NotAnInput { block: String, endpoint: String },
}

/// Error type for attribute access
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttributeError {
    #[error("Attribute '{0}' not found")]
    NotFound(String),

    #[error("Attribute '{0}' is read-only")]
    ReadOnly(String),

    #[error("Attribute '{name}' holds {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: ElementType,
        actual: ElementType,
    },

    #[error("Value {value} is not one of the options of attribute '{name}'")]
    InvalidOption { name: String, value: String },

    #[error("Attribute '{name}' cannot map value {value} onto its source")]
    Unmappable { name: String, value: String },
}

/// Error type for frame allocation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("Failed to allocate a {element_type} frame of {size} elements")]
    Allocation { element_type: ElementType, size: usize },
}

/// Error type for work function operations
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Attribute error: {0}")]
    Attribute(#[from] AttributeError),

    #[error("Block-specific error: {0}")]
    BlockError(String),

    #[error("Shutdown signal received")]
    Shutdown,
}

/// Result type for work functions
pub type WorkResult<T = ()> = Result<T, WorkError>;

/// Error type for block creation and lifecycle
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("Factory '{0}' cannot create blocks")]
    CannotCreate(String),

    #[error("No factory named '{0}'")]
    UnknownFactory(String),

    #[error("Failed to spawn thread for '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Attribute error: {0}")]
    Attribute(#[from] AttributeError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}
