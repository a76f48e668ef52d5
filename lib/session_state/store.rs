use diesel::result::Error as DieselError;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::sqlite::SqliteConnection;
use diesel::QueryableByName;
use diesel_async::pg::AsyncPgConnection;
use diesel_async::RunQueryDsl;
use futures::future::BoxFuture;

use super::types::{
    BacklogEntry, BacklogOperation, EnqueueingSession, IdentifierRecord, SessionStateError,
    SessionStatus,
};

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct SessionRow {
    #[diesel(sql_type = Text)]
    pub entity_type: String,
    #[diesel(sql_type = Text)]
    pub ordering_property: String,
    #[diesel(sql_type = Text)]
    pub status: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub last_processed_value: Option<String>,
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct IdentifierRow {
    #[diesel(sql_type = Text)]
    pub identifier: String,
    #[diesel(sql_type = Text)]
    pub ordering_value: String,
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct BacklogRow {
    #[diesel(sql_type = BigInt)]
    pub backlog_id: i64,
    #[diesel(sql_type = Text)]
    pub entity_type: String,
    #[diesel(sql_type = Text)]
    pub identifier: String,
    #[diesel(sql_type = Text)]
    pub operation: String,
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct CountRow {
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

/// Raw-SQL access used by the session-state ops.
///
/// Implemented for the async Postgres connection used in production and
/// for the sync SQLite connection used by fast DB-backed tests, so every
/// op runs the same SQL on both backends.
#[doc(hidden)]
pub trait SessionDb: Send {
    fn execute_sql<'a>(&'a mut self, sql: String) -> BoxFuture<'a, Result<usize, DieselError>>;
    fn load_sessions<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<SessionRow>, DieselError>>;
    fn load_identifiers<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<IdentifierRow>, DieselError>>;
    fn load_backlog<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<BacklogRow>, DieselError>>;
    fn load_counts<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<CountRow>, DieselError>>;
}

impl SessionDb for AsyncPgConnection {
    fn execute_sql<'a>(&'a mut self, sql: String) -> BoxFuture<'a, Result<usize, DieselError>> {
        Box::pin(async move { sql_query(sql).execute(self).await })
    }

    fn load_sessions<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<SessionRow>, DieselError>> {
        Box::pin(async move { sql_query(sql).load::<SessionRow>(self).await })
    }

    fn load_identifiers<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<IdentifierRow>, DieselError>> {
        Box::pin(async move { sql_query(sql).load::<IdentifierRow>(self).await })
    }

    fn load_backlog<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<BacklogRow>, DieselError>> {
        Box::pin(async move { sql_query(sql).load::<BacklogRow>(self).await })
    }

    fn load_counts<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<CountRow>, DieselError>> {
        Box::pin(async move { sql_query(sql).load::<CountRow>(self).await })
    }
}

impl SessionDb for SqliteConnection {
    fn execute_sql<'a>(&'a mut self, sql: String) -> BoxFuture<'a, Result<usize, DieselError>> {
        Box::pin(async move { diesel::RunQueryDsl::execute(sql_query(sql), self) })
    }

    fn load_sessions<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<SessionRow>, DieselError>> {
        Box::pin(async move { diesel::RunQueryDsl::load::<SessionRow>(sql_query(sql), self) })
    }

    fn load_identifiers<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<IdentifierRow>, DieselError>> {
        Box::pin(async move { diesel::RunQueryDsl::load::<IdentifierRow>(sql_query(sql), self) })
    }

    fn load_backlog<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<BacklogRow>, DieselError>> {
        Box::pin(async move { diesel::RunQueryDsl::load::<BacklogRow>(sql_query(sql), self) })
    }

    fn load_counts<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, Result<Vec<CountRow>, DieselError>> {
        Box::pin(async move { diesel::RunQueryDsl::load::<CountRow>(sql_query(sql), self) })
    }
}

pub(crate) fn map_session_row(row: SessionRow) -> Result<EnqueueingSession, SessionStateError> {
    Ok(EnqueueingSession {
        entity_type: row.entity_type,
        ordering_property: row.ordering_property,
        status: SessionStatus::from_db_str(&row.status)?,
        last_processed_value: row.last_processed_value,
    })
}

pub(crate) fn map_backlog_row(row: BacklogRow) -> Result<BacklogEntry, SessionStateError> {
    Ok(BacklogEntry {
        backlog_id: row.backlog_id,
        entity_type: row.entity_type,
        identifier: row.identifier,
        operation: BacklogOperation::from_db_str(&row.operation)?,
    })
}

pub(crate) fn map_identifier_row(row: IdentifierRow) -> IdentifierRecord {
    IdentifierRecord {
        identifier: row.identifier,
        ordering_value: row.ordering_value,
    }
}

pub(crate) fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn quote_opt(value: Option<&str>) -> String {
    value.map(quote).unwrap_or_else(|| "NULL".to_string())
}
