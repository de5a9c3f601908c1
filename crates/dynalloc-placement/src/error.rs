use thiserror::Error;

use dynalloc_state::ManagerError;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("requested {requested} nodes but only {idle} are idle")]
    InsufficientCapacity { requested: u32, idle: u32 },

    #[error("timed out waiting for {requested} nodes in range, {available} idle at last check")]
    TimeoutExhausted { requested: u32, available: u32 },

    #[error("selection cancelled by shutdown")]
    Cancelled,

    #[error("resource manager: {0}")]
    Manager(#[from] ManagerError),
}

pub type SelectionResult<T> = Result<T, SelectionError>;
