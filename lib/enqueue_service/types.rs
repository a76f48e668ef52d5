use thiserror::Error;

use crate::session_state::SessionStateError;

/// Error type for the session-store collaborator boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unreachable: {0}")]
    Connection(String),
    #[error(transparent)]
    State(#[from] SessionStateError),
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),
}

/// Error type for the backlog-sink collaborator boundary.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("backlog sink unreachable: {0}")]
    Connection(String),
    #[error(transparent)]
    State(#[from] SessionStateError),
}
