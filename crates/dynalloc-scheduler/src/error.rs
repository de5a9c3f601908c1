//! Protocol error types.

use thiserror::Error;

use dynalloc_core::HostlistError;
use dynalloc_placement::SelectionError;
use dynalloc_state::ManagerError;

/// Errors raised while serving one request.
///
/// Everything except [`ProtocolError::Respond`] is caught per app or per
/// release command and turned into a failure token in the response text.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("invalid node range: {0}")]
    Range(#[from] HostlistError),

    #[error("selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error("resource manager: {0}")]
    Manager(#[from] ManagerError),

    #[error("failed to send response: {0}")]
    Respond(String),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
