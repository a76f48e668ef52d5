use std::sync::Arc;

use diesel_async::pg::AsyncPgConnection;
use diesel_async::pooled_connection::deadpool::Pool;
use futures::future::BoxFuture;

use super::types::SinkError;
use crate::session_state::{self, BacklogOperation};

/// Appends operations to the indexing backlog consumed by the external
/// indexer.
///
/// This trait exists so manager logic can be unit-tested against a
/// recording in-memory sink without requiring a Postgres instance.
pub trait BacklogSink: Send + Sync {
    fn enqueue<'a>(
        &'a self,
        entity_type: &'a str,
        identifier: &'a str,
        operation: BacklogOperation,
    ) -> BoxFuture<'a, Result<(), SinkError>>;
}

impl<T> BacklogSink for Arc<T>
where
    T: BacklogSink + ?Sized,
{
    fn enqueue<'a>(
        &'a self,
        entity_type: &'a str,
        identifier: &'a str,
        operation: BacklogOperation,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        (**self).enqueue(entity_type, identifier, operation)
    }
}

/// Postgres-backed backlog sink used by the production runtime.
pub struct DieselBacklogSink {
    pool: Pool<AsyncPgConnection>,
}

impl DieselBacklogSink {
    pub fn new(pool: Pool<AsyncPgConnection>) -> Self {
        Self { pool }
    }
}

impl BacklogSink for DieselBacklogSink {
    fn enqueue<'a>(
        &'a self,
        entity_type: &'a str,
        identifier: &'a str,
        operation: BacklogOperation,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|err| SinkError::Connection(err.to_string()))?;
            Ok(session_state::append_backlog(&mut *conn, entity_type, identifier, operation)
                .await?)
        })
    }
}
