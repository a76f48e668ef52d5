use thiserror::Error;

/// Error type for durable session-state and backlog operations.
#[derive(Debug, Error)]
pub enum SessionStateError {
    #[error("database operation failed: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("invalid session status value in database: {0}")]
    InvalidStatus(String),
    #[error("invalid backlog operation value in database: {0}")]
    InvalidOperation(String),
    #[error("invalid session-state input: {0}")]
    InvalidInput(String),
}

/// Lifecycle states for a persisted enqueueing session.
///
/// A terminated or completed session has no row at all; only the two
/// in-flight states are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Suspended,
}

impl SessionStatus {
    pub(crate) fn as_db_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Suspended => "suspended",
        }
    }

    pub(crate) fn from_db_str(value: &str) -> Result<Self, SessionStateError> {
        match value {
            "active" => Ok(SessionStatus::Active),
            "suspended" => Ok(SessionStatus::Suspended),
            other => Err(SessionStateError::InvalidStatus(other.to_string())),
        }
    }
}

/// Operation kinds accepted by the indexing backlog.
///
/// This worker only ever appends `Index`; `Delete` is written by the
/// entity change-tracking producer that shares the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklogOperation {
    Index,
    Delete,
}

impl BacklogOperation {
    pub(crate) fn as_db_str(self) -> &'static str {
        match self {
            BacklogOperation::Index => "index",
            BacklogOperation::Delete => "delete",
        }
    }

    pub(crate) fn from_db_str(value: &str) -> Result<Self, SessionStateError> {
        match value {
            "index" => Ok(BacklogOperation::Index),
            "delete" => Ok(BacklogOperation::Delete),
            other => Err(SessionStateError::InvalidOperation(other.to_string())),
        }
    }
}

/// Materialized row from `enqueueing_sessions`.
///
/// `last_processed_value` is the rendered ordering-property value of the
/// last identifier handed to the backlog; `None` until the first batch
/// for this session instance completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueingSession {
    pub entity_type: String,
    pub ordering_property: String,
    pub status: SessionStatus,
    pub last_processed_value: Option<String>,
}

/// Materialized row from `indexing_backlog`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogEntry {
    pub backlog_id: i64,
    pub entity_type: String,
    pub identifier: String,
    pub operation: BacklogOperation,
}

/// One identifier returned by a keyset scan, paired with the rendered
/// ordering-property value the next scan resumes after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRecord {
    pub identifier: String,
    pub ordering_value: String,
}
