use thiserror::Error;

use super::types::{SinkError, StoreError};

/// Error type for enqueueing-session operations.
///
/// Collaborator failures abort the current operation without partial
/// session mutation and surface here verbatim; nothing is retried
/// internally.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backlog(#[from] SinkError),
}
