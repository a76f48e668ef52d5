use std::sync::Arc;

use diesel_async::pg::AsyncPgConnection;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use futures::future::BoxFuture;

use super::types::StoreError;
use crate::entity_registry::EntityRegistry;
use crate::session_state::{self, EnqueueingSession, IdentifierRecord, SessionStateError};

/// Durable store for enqueueing sessions and entity identifier scans.
///
/// This trait exists so manager logic can be unit-tested against scripted
/// in-memory state without requiring a Postgres instance.
pub trait SessionStore: Send + Sync {
    fn find_session<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<Option<EnqueueingSession>, StoreError>>;

    /// Creates or wholesale-replaces the session row for its entity type.
    fn save_session<'a>(
        &'a self,
        session: &'a EnqueueingSession,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Returns whether a row existed.
    fn delete_session<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<bool, StoreError>>;

    fn first_active_session<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Option<EnqueueingSession>, StoreError>>;

    /// Keyset-scans up to `limit` identifiers ordered ascending by
    /// `ordering_property`, strictly after `after` when given.
    fn list_identifiers<'a>(
        &'a self,
        entity_type: &'a str,
        ordering_property: &'a str,
        after: Option<&'a str>,
        limit: i64,
    ) -> BoxFuture<'a, Result<Vec<IdentifierRecord>, StoreError>>;

    /// Resolves the property a fresh session will order its scan by.
    fn identifying_property<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<String, StoreError>>;
}

impl<T> SessionStore for Arc<T>
where
    T: SessionStore + ?Sized,
{
    fn find_session<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<Option<EnqueueingSession>, StoreError>> {
        (**self).find_session(entity_type)
    }

    fn save_session<'a>(
        &'a self,
        session: &'a EnqueueingSession,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).save_session(session)
    }

    fn delete_session<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        (**self).delete_session(entity_type)
    }

    fn first_active_session<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Option<EnqueueingSession>, StoreError>> {
        (**self).first_active_session()
    }

    fn list_identifiers<'a>(
        &'a self,
        entity_type: &'a str,
        ordering_property: &'a str,
        after: Option<&'a str>,
        limit: i64,
    ) -> BoxFuture<'a, Result<Vec<IdentifierRecord>, StoreError>> {
        (**self).list_identifiers(entity_type, ordering_property, after, limit)
    }

    fn identifying_property<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        (**self).identifying_property(entity_type)
    }
}

/// Postgres-backed session store used by the production runtime.
pub struct DieselSessionStore {
    pool: Pool<AsyncPgConnection>,
    registry: EntityRegistry,
}

impl DieselSessionStore {
    pub fn new(pool: Pool<AsyncPgConnection>, registry: EntityRegistry) -> Self {
        Self { pool, registry }
    }

    async fn conn(&self) -> Result<Object<AsyncPgConnection>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))
    }

    /// Every tracked session, for the operator status surface.
    ///
    /// Not part of the manager boundary; listing does not take session
    /// locks and may observe in-flight batches mid-step.
    pub async fn list_sessions(&self) -> Result<Vec<EnqueueingSession>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(session_state::list_sessions(&mut *conn).await?)
    }

    /// Backlog depth, optionally restricted to one entity type.
    pub async fn backlog_depth(&self, entity_type: Option<&str>) -> Result<i64, StoreError> {
        let mut conn = self.conn().await?;
        Ok(session_state::count_backlog(&mut *conn, entity_type).await?)
    }
}

impl SessionStore for DieselSessionStore {
    fn find_session<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<Option<EnqueueingSession>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            Ok(session_state::find_session(&mut *conn, entity_type).await?)
        })
    }

    fn save_session<'a>(
        &'a self,
        session: &'a EnqueueingSession,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            Ok(session_state::upsert_session(&mut *conn, session).await?)
        })
    }

    fn delete_session<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            Ok(session_state::delete_session(&mut *conn, entity_type).await?)
        })
    }

    fn first_active_session<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Option<EnqueueingSession>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            Ok(session_state::first_active_session(&mut *conn).await?)
        })
    }

    fn list_identifiers<'a>(
        &'a self,
        entity_type: &'a str,
        ordering_property: &'a str,
        after: Option<&'a str>,
        limit: i64,
    ) -> BoxFuture<'a, Result<Vec<IdentifierRecord>, StoreError>> {
        Box::pin(async move {
            let descriptor = self
                .registry
                .get(entity_type)
                .ok_or_else(|| StoreError::UnknownEntityType(entity_type.to_string()))?;

            // A session can outlive a registry edit; refuse to scan by a
            // column the registry no longer names.
            if descriptor.id_column != ordering_property {
                return Err(StoreError::State(SessionStateError::InvalidInput(format!(
                    "session orders by `{ordering_property}` but the registry maps \
                     entity type `{entity_type}` to column `{}`",
                    descriptor.id_column
                ))));
            }

            let mut conn = self.conn().await?;
            Ok(session_state::list_identifiers_after(&mut *conn, descriptor, after, limit).await?)
        })
    }

    fn identifying_property<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            self.registry
                .get(entity_type)
                .map(|descriptor| descriptor.id_column.clone())
                .ok_or_else(|| StoreError::UnknownEntityType(entity_type.to_string()))
        })
    }
}
