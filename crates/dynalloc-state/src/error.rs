//! Error types for the resource manager and its state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Result type alias for resource manager calls.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Failures reported by the resource manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("allocation timed out")]
    Timeout,

    #[error("requested {requested} nodes but the cluster only has {available}")]
    InsufficientNodes { requested: u32, available: u32 },

    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("unknown job allocation: {0}")]
    UnknownJob(u32),

    #[error("job allocation {0} already completed")]
    AlreadyCompleted(u32),

    #[error("invalid node inventory: {0}")]
    Inventory(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
