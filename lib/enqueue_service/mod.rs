mod backlog_sink;
mod error;
mod lock;
mod session_store;
pub mod types;

pub use backlog_sink::{BacklogSink, DieselBacklogSink};
pub use error::Error;
pub use lock::SessionLockTable;
pub use session_store::{DieselSessionStore, SessionStore};

#[cfg(test)]
mod test_support;

use tracing::{debug, info};

use crate::server::monitoring::ENQUEUE_METRICS;
use crate::session_state::{BacklogOperation, EnqueueingSession, SessionStatus};

/// Walks the full instance set of registered entity types and hands each
/// identifier to the indexing backlog, one bounded batch per call.
///
/// Every operation for a given entity type runs under that type's lock, so
/// admin calls issued while a batch is in flight queue behind it and apply
/// their effect to the state the batch left behind.
pub struct EnqueueingSessionManager<S, B> {
    store: S,
    sink: B,
    locks: SessionLockTable,
}

impl<S, B> EnqueueingSessionManager<S, B>
where
    S: SessionStore,
    B: BacklogSink,
{
    pub fn new(store: S, sink: B) -> Self {
        Self {
            store,
            sink,
            locks: SessionLockTable::new(),
        }
    }

    /// Starts (or restarts) a full enumeration of `entity_type`.
    ///
    /// Any existing session is replaced wholesale: the new session is
    /// active with no cursor, so a re-init during an in-flight run
    /// discards that run's progress once it acquires the lock.
    pub async fn init(&self, entity_type: &str) -> Result<(), Error> {
        self.locks
            .with_lock(entity_type, || async move {
                let ordering_property = self.store.identifying_property(entity_type).await?;
                let session = EnqueueingSession {
                    entity_type: entity_type.to_string(),
                    ordering_property,
                    status: SessionStatus::Active,
                    last_processed_value: None,
                };
                self.store.save_session(&session).await?;

                info!(
                    event = "enqueueing_session_initialized",
                    entity_type,
                    ordering_property = %session.ordering_property,
                    "initialized enqueueing session"
                );
                if let Some(metrics) = ENQUEUE_METRICS.get() {
                    metrics.sessions_initialized_total.inc();
                }
                Ok(())
            })
            .await
    }

    /// Stops tracking `entity_type` by deleting its session, if present.
    ///
    /// Backlog entries already appended stay in place.
    pub async fn terminate(&self, entity_type: &str) -> Result<(), Error> {
        self.locks
            .with_lock(entity_type, || async move {
                let existed = self.store.delete_session(entity_type).await?;
                if existed {
                    info!(
                        event = "enqueueing_session_terminated",
                        entity_type, "terminated enqueueing session"
                    );
                    if let Some(metrics) = ENQUEUE_METRICS.get() {
                        metrics.sessions_terminated_total.inc();
                    }
                } else {
                    debug!(
                        event = "enqueueing_session_terminate_noop",
                        entity_type, "no session to terminate"
                    );
                }
                Ok(())
            })
            .await
    }

    /// Pauses batch processing for `entity_type`; no-op when absent.
    pub async fn suspend(&self, entity_type: &str) -> Result<(), Error> {
        self.set_status(entity_type, SessionStatus::Suspended).await
    }

    /// Re-enables batch processing for `entity_type`; no-op when absent.
    pub async fn resume(&self, entity_type: &str) -> Result<(), Error> {
        self.set_status(entity_type, SessionStatus::Active).await
    }

    async fn set_status(&self, entity_type: &str, status: SessionStatus) -> Result<(), Error> {
        self.locks
            .with_lock(entity_type, || async move {
                match self.store.find_session(entity_type).await? {
                    None => {
                        debug!(
                            event = "enqueueing_session_status_noop",
                            entity_type,
                            status = status.as_db_str(),
                            "no session to update"
                        );
                    }
                    Some(mut session) => {
                        session.status = status;
                        self.store.save_session(&session).await?;
                        info!(
                            event = "enqueueing_session_status_changed",
                            entity_type,
                            status = status.as_db_str(),
                            "updated enqueueing session status"
                        );
                    }
                }
                Ok(())
            })
            .await
    }

    /// Runs one batch step for `entity_type` and returns how many
    /// identifiers were appended to the backlog.
    ///
    /// Steps, all under the per-type lock:
    /// 1. Load the session; absent or suspended returns 0 without writes.
    /// 2. Keyset-fetch up to `batch_size` identifiers strictly after the
    ///    cursor.
    /// 3. Zero fetched: enumeration was already exhausted; delete the
    ///    session and return 0.
    /// 4. Append every fetched identifier to the backlog as an `index`
    ///    operation, then advance the cursor to the last ordering value.
    /// 5. A short page completes the enumeration and deletes the session;
    ///    a full page persists the advanced cursor with status unchanged.
    pub async fn process(&self, entity_type: &str, batch_size: usize) -> Result<usize, Error> {
        self.locks
            .with_lock(entity_type, || async move {
                let session = match self.store.find_session(entity_type).await? {
                    None => {
                        debug!(
                            event = "enqueueing_batch_skipped",
                            entity_type, reason = "absent", "no session to process"
                        );
                        return Ok(0);
                    }
                    Some(session) if session.status == SessionStatus::Suspended => {
                        debug!(
                            event = "enqueueing_batch_skipped",
                            entity_type, reason = "suspended", "session is suspended"
                        );
                        return Ok(0);
                    }
                    Some(session) => session,
                };

                let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);
                let page = self
                    .store
                    .list_identifiers(
                        entity_type,
                        &session.ordering_property,
                        session.last_processed_value.as_deref(),
                        limit,
                    )
                    .await?;

                if page.is_empty() {
                    self.store.delete_session(entity_type).await?;
                    info!(
                        event = "enqueueing_session_completed",
                        entity_type, enqueued = 0usize, "enumeration exhausted; session removed"
                    );
                    if let Some(metrics) = ENQUEUE_METRICS.get() {
                        metrics.sessions_completed_total.inc();
                    }
                    return Ok(0);
                }

                // A failed append aborts here with the session untouched;
                // entries already written stay in the backlog and the same
                // page is re-fetched on the next call.
                let mut last_value = session.last_processed_value.clone();
                for record in &page {
                    self.sink
                        .enqueue(entity_type, &record.identifier, BacklogOperation::Index)
                        .await?;
                    last_value = Some(record.ordering_value.clone());
                }

                if page.len() < batch_size {
                    self.store.delete_session(entity_type).await?;
                    info!(
                        event = "enqueueing_session_completed",
                        entity_type,
                        enqueued = page.len(),
                        "last page enqueued; session removed"
                    );
                    if let Some(metrics) = ENQUEUE_METRICS.get() {
                        metrics.sessions_completed_total.inc();
                    }
                } else {
                    let advanced = EnqueueingSession {
                        last_processed_value: last_value,
                        ..session
                    };
                    self.store.save_session(&advanced).await?;
                    debug!(
                        event = "enqueueing_batch_processed",
                        entity_type,
                        enqueued = page.len(),
                        cursor = ?advanced.last_processed_value,
                        "advanced enqueueing cursor"
                    );
                }

                if let Some(metrics) = ENQUEUE_METRICS.get() {
                    metrics.batches_processed_total.inc();
                    metrics.identifiers_enqueued_total.inc_by(page.len() as u64);
                }
                Ok(page.len())
            })
            .await
    }

    /// Picks any entity type with an active session and runs one batch
    /// step for it; returns 0 when no active session exists.
    ///
    /// The selection read is unlocked; `process` re-validates the session
    /// under the per-type lock, so a selection raced by an admin call
    /// degrades to a zero-result step.
    pub async fn process_next_active(&self, batch_size: usize) -> Result<usize, Error> {
        let Some(session) = self.store.first_active_session().await? else {
            debug!(
                event = "enqueueing_batch_skipped",
                reason = "no_active_session",
                "no active enqueueing session"
            );
            return Ok(0);
        };

        self.process(&session.entity_type, batch_size).await
    }
}
