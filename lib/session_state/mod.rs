pub mod ops;
pub mod store;
pub mod types;

pub use ops::{
    append_backlog, count_backlog, delete_session, find_session, first_active_session,
    list_backlog, list_identifiers_after, list_sessions, upsert_session,
};
pub use store::SessionDb;
pub use types::{
    BacklogEntry, BacklogOperation, EnqueueingSession, IdentifierRecord, SessionStateError,
    SessionStatus,
};
