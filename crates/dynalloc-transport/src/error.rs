//! Transport error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("wrote {written} of {total} bytes before giving up")]
    PartialWrite { written: usize, total: usize },

    #[error("peer closed the connection without sending anything")]
    EmptyRead,

    #[error(transparent)]
    Protocol(#[from] dynalloc_scheduler::ProtocolError),

    #[error("listener task failed: {0}")]
    Task(String),
}

pub type TransportResult<T> = Result<T, TransportError>;
