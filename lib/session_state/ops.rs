use super::store::{
    map_backlog_row, map_identifier_row, map_session_row, quote, quote_opt, SessionDb,
};
use super::types::{
    BacklogEntry, BacklogOperation, EnqueueingSession, IdentifierRecord, SessionStateError,
    SessionStatus,
};
use crate::entity_registry::{EntityDescriptor, IdentifierKind};

/// Creates or wholesale-replaces the session row for `session.entity_type`.
///
/// The conflict target is the primary key, so at most one row per entity
/// type can ever exist; replacing an existing row discards its cursor.
pub async fn upsert_session<C>(
    conn: &mut C,
    session: &EnqueueingSession,
) -> Result<(), SessionStateError>
where
    C: SessionDb,
{
    let sql = format!(
        "INSERT INTO enqueueing_sessions \
             (entity_type, ordering_property, status, last_processed_value) \
         VALUES ({}, {}, {}, {}) \
         ON CONFLICT (entity_type) DO UPDATE SET \
             ordering_property = EXCLUDED.ordering_property, \
             status = EXCLUDED.status, \
             last_processed_value = EXCLUDED.last_processed_value, \
             updated_at = CURRENT_TIMESTAMP",
        quote(&session.entity_type),
        quote(&session.ordering_property),
        quote(session.status.as_db_str()),
        quote_opt(session.last_processed_value.as_deref()),
    );
    conn.execute_sql(sql).await?;
    Ok(())
}

/// Reads the session for one entity type, if present.
pub async fn find_session<C>(
    conn: &mut C,
    entity_type: &str,
) -> Result<Option<EnqueueingSession>, SessionStateError>
where
    C: SessionDb,
{
    let sql = format!(
        "SELECT entity_type, ordering_property, status, last_processed_value \
         FROM enqueueing_sessions WHERE entity_type = {} LIMIT 1",
        quote(entity_type)
    );

    let mut rows = conn.load_sessions(sql).await?;
    match rows.pop() {
        Some(row) => Ok(Some(map_session_row(row)?)),
        None => Ok(None),
    }
}

/// Deletes the session row for one entity type.
///
/// Returns whether a row existed; deleting an absent session is a no-op.
pub async fn delete_session<C>(conn: &mut C, entity_type: &str) -> Result<bool, SessionStateError>
where
    C: SessionDb,
{
    let sql = format!(
        "DELETE FROM enqueueing_sessions WHERE entity_type = {}",
        quote(entity_type)
    );
    Ok(conn.execute_sql(sql).await? > 0)
}

/// Lists every tracked session, ordered by entity type.
pub async fn list_sessions<C>(conn: &mut C) -> Result<Vec<EnqueueingSession>, SessionStateError>
where
    C: SessionDb,
{
    let rows = conn
        .load_sessions(
            "SELECT entity_type, ordering_property, status, last_processed_value \
             FROM enqueueing_sessions ORDER BY entity_type ASC"
                .to_string(),
        )
        .await?;

    rows.into_iter().map(map_session_row).collect()
}

/// Picks one session with `active` status, if any exists.
///
/// The ordering makes the pick deterministic, but nothing depends on which
/// active session is chosen; callers re-validate under the per-type lock.
pub async fn first_active_session<C>(
    conn: &mut C,
) -> Result<Option<EnqueueingSession>, SessionStateError>
where
    C: SessionDb,
{
    let sql = format!(
        "SELECT entity_type, ordering_property, status, last_processed_value \
         FROM enqueueing_sessions WHERE status = {} \
         ORDER BY entity_type ASC LIMIT 1",
        quote(SessionStatus::Active.as_db_str())
    );

    let mut rows = conn.load_sessions(sql).await?;
    match rows.pop() {
        Some(row) => Ok(Some(map_session_row(row)?)),
        None => Ok(None),
    }
}

fn cursor_literal(
    descriptor: &EntityDescriptor,
    value: &str,
) -> Result<String, SessionStateError> {
    match descriptor.id_kind {
        IdentifierKind::BigInt => value.parse::<i64>().map(|v| v.to_string()).map_err(|_| {
            SessionStateError::InvalidInput(format!(
                "cursor value `{value}` is not a valid bigint for entity type `{}`",
                descriptor.name
            ))
        }),
        IdentifierKind::Text => Ok(quote(value)),
    }
}

/// Keyset-scans up to `limit` identifiers of one entity type, ordered
/// ascending by the identifying column, strictly after `after` when given.
///
/// Cursor literals are rendered per the descriptor's identifier kind so
/// the comparison always follows the column's natural order (id 10 sorts
/// after id 9 for `bigint` columns).
pub async fn list_identifiers_after<C>(
    conn: &mut C,
    descriptor: &EntityDescriptor,
    after: Option<&str>,
    limit: i64,
) -> Result<Vec<IdentifierRecord>, SessionStateError>
where
    C: SessionDb,
{
    if limit <= 0 {
        return Err(SessionStateError::InvalidInput(format!(
            "limit must be > 0, got {limit}"
        )));
    }

    let column = &descriptor.id_column;
    let restriction = match after {
        Some(value) => format!(" WHERE {column} > {}", cursor_literal(descriptor, value)?),
        None => String::new(),
    };
    let sql = format!(
        "SELECT CAST({column} AS TEXT) AS identifier, CAST({column} AS TEXT) AS ordering_value \
         FROM {}{restriction} \
         ORDER BY {column} ASC \
         LIMIT {limit}",
        descriptor.table,
    );

    let rows = conn.load_identifiers(sql).await?;
    Ok(rows.into_iter().map(map_identifier_row).collect())
}

/// Appends one operation to the indexing backlog.
pub async fn append_backlog<C>(
    conn: &mut C,
    entity_type: &str,
    identifier: &str,
    operation: BacklogOperation,
) -> Result<(), SessionStateError>
where
    C: SessionDb,
{
    let sql = format!(
        "INSERT INTO indexing_backlog (entity_type, identifier, operation) \
         VALUES ({}, {}, {})",
        quote(entity_type),
        quote(identifier),
        quote(operation.as_db_str()),
    );
    conn.execute_sql(sql).await?;
    Ok(())
}

/// Counts backlog entries, optionally restricted to one entity type.
pub async fn count_backlog<C>(
    conn: &mut C,
    entity_type: Option<&str>,
) -> Result<i64, SessionStateError>
where
    C: SessionDb,
{
    let restriction = match entity_type {
        Some(value) => format!(" WHERE entity_type = {}", quote(value)),
        None => String::new(),
    };
    let sql = format!("SELECT COUNT(*) AS count FROM indexing_backlog{restriction}");

    let mut rows = conn.load_counts(sql).await?;
    Ok(rows.pop().map_or(0, |row| row.count))
}

/// Lists backlog entries for one entity type in append order.
pub async fn list_backlog<C>(
    conn: &mut C,
    entity_type: &str,
    limit: i64,
) -> Result<Vec<BacklogEntry>, SessionStateError>
where
    C: SessionDb,
{
    if limit <= 0 {
        return Err(SessionStateError::InvalidInput(format!(
            "limit must be > 0, got {limit}"
        )));
    }

    let sql = format!(
        "SELECT backlog_id, entity_type, identifier, operation \
         FROM indexing_backlog WHERE entity_type = {} \
         ORDER BY backlog_id ASC LIMIT {limit}",
        quote(entity_type)
    );

    let rows = conn.load_backlog(sql).await?;
    rows.into_iter().map(map_backlog_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite_test::setup_in_memory_sqlite;
    use diesel::connection::SimpleConnection;
    use diesel::sqlite::SqliteConnection;

    fn bigint_descriptor(name: &str, table: &str, id_column: &str) -> EntityDescriptor {
        EntityDescriptor {
            name: name.to_string(),
            table: table.to_string(),
            id_column: id_column.to_string(),
            id_kind: IdentifierKind::BigInt,
        }
    }

    fn text_descriptor(name: &str, table: &str, id_column: &str) -> EntityDescriptor {
        EntityDescriptor {
            name: name.to_string(),
            table: table.to_string(),
            id_column: id_column.to_string(),
            id_kind: IdentifierKind::Text,
        }
    }

    fn seed_products(conn: &mut SqliteConnection, ids: &[i64]) {
        conn.batch_execute("CREATE TABLE products (product_id BIGINT PRIMARY KEY)")
            .expect("failed to create sample products table");
        for id in ids {
            conn.batch_execute(&format!("INSERT INTO products (product_id) VALUES ({id})"))
                .expect("failed to seed sample product row");
        }
    }

    fn active_session(entity_type: &str) -> EnqueueingSession {
        EnqueueingSession {
            entity_type: entity_type.to_string(),
            ordering_property: "product_id".to_string(),
            status: SessionStatus::Active,
            last_processed_value: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_find_round_trips() {
        let mut conn = setup_in_memory_sqlite();

        upsert_session(&mut conn, &active_session("products"))
            .await
            .expect("failed to upsert session");

        let found = find_session(&mut conn, "products")
            .await
            .expect("failed to load session")
            .expect("expected a session row");
        assert_eq!(found.entity_type, "products");
        assert_eq!(found.ordering_property, "product_id");
        assert_eq!(found.status, SessionStatus::Active);
        assert_eq!(found.last_processed_value, None);

        assert!(find_session(&mut conn, "customers")
            .await
            .expect("failed to query absent session")
            .is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row_wholesale() {
        let mut conn = setup_in_memory_sqlite();

        let mut session = active_session("products");
        session.status = SessionStatus::Suspended;
        session.last_processed_value = Some("40".to_string());
        upsert_session(&mut conn, &session)
            .await
            .expect("failed to upsert progressed session");

        upsert_session(&mut conn, &active_session("products"))
            .await
            .expect("failed to re-upsert fresh session");

        let found = find_session(&mut conn, "products")
            .await
            .expect("failed to load session")
            .expect("expected a session row");
        assert_eq!(found.status, SessionStatus::Active);
        assert_eq!(found.last_processed_value, None);

        let all = list_sessions(&mut conn).await.expect("failed to list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn delete_session_reports_row_presence() {
        let mut conn = setup_in_memory_sqlite();

        assert!(!delete_session(&mut conn, "products")
            .await
            .expect("failed to delete absent session"));

        upsert_session(&mut conn, &active_session("products"))
            .await
            .expect("failed to upsert session");
        assert!(delete_session(&mut conn, "products")
            .await
            .expect("failed to delete session"));
        assert!(find_session(&mut conn, "products")
            .await
            .expect("failed to query deleted session")
            .is_none());
    }

    #[tokio::test]
    async fn first_active_session_skips_suspended_rows() {
        let mut conn = setup_in_memory_sqlite();

        let mut suspended = active_session("aardvarks");
        suspended.status = SessionStatus::Suspended;
        upsert_session(&mut conn, &suspended)
            .await
            .expect("failed to upsert suspended session");

        assert!(first_active_session(&mut conn)
            .await
            .expect("failed to query active sessions")
            .is_none());

        upsert_session(&mut conn, &active_session("products"))
            .await
            .expect("failed to upsert active session");

        let picked = first_active_session(&mut conn)
            .await
            .expect("failed to query active sessions")
            .expect("expected an active session");
        assert_eq!(picked.entity_type, "products");
    }

    #[tokio::test]
    async fn keyset_scan_orders_bigint_columns_numerically() {
        let mut conn = setup_in_memory_sqlite();
        seed_products(&mut conn, &[2, 9, 10, 11]);
        let descriptor = bigint_descriptor("products", "products", "product_id");

        let page = list_identifiers_after(&mut conn, &descriptor, Some("9"), 10)
            .await
            .expect("failed to scan identifiers");
        let ids: Vec<&str> = page.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["10", "11"]);
    }

    #[tokio::test]
    async fn keyset_scan_is_strictly_greater_and_bounded() {
        let mut conn = setup_in_memory_sqlite();
        seed_products(&mut conn, &[1, 2, 3]);
        let descriptor = bigint_descriptor("products", "products", "product_id");

        let first = list_identifiers_after(&mut conn, &descriptor, None, 2)
            .await
            .expect("failed to scan first page");
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].ordering_value, "2");

        let second = list_identifiers_after(&mut conn, &descriptor, Some("2"), 2)
            .await
            .expect("failed to scan second page");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].identifier, "3");

        let exhausted = list_identifiers_after(&mut conn, &descriptor, Some("3"), 2)
            .await
            .expect("failed to scan past the end");
        assert!(exhausted.is_empty());
    }

    #[tokio::test]
    async fn keyset_scan_supports_text_identifiers() {
        let mut conn = setup_in_memory_sqlite();
        conn.batch_execute(
            "CREATE TABLE tags (code TEXT PRIMARY KEY);
             INSERT INTO tags (code) VALUES ('alpha'), ('beta'), ('gamma');",
        )
        .expect("failed to seed sample tags table");
        let descriptor = text_descriptor("tags", "tags", "code");

        let page = list_identifiers_after(&mut conn, &descriptor, Some("alpha"), 1)
            .await
            .expect("failed to scan text identifiers");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].identifier, "beta");
    }

    #[tokio::test]
    async fn keyset_scan_rejects_bad_inputs() {
        let mut conn = setup_in_memory_sqlite();
        seed_products(&mut conn, &[1]);
        let descriptor = bigint_descriptor("products", "products", "product_id");

        let err = list_identifiers_after(&mut conn, &descriptor, None, 0)
            .await
            .expect_err("expected limit rejection");
        assert!(matches!(err, SessionStateError::InvalidInput(_)));

        let err = list_identifiers_after(&mut conn, &descriptor, Some("not-a-number"), 5)
            .await
            .expect_err("expected cursor rejection");
        assert!(matches!(err, SessionStateError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn backlog_appends_count_and_list_in_order() {
        let mut conn = setup_in_memory_sqlite();

        append_backlog(&mut conn, "products", "1", BacklogOperation::Index)
            .await
            .expect("failed to append first entry");
        append_backlog(&mut conn, "products", "2", BacklogOperation::Index)
            .await
            .expect("failed to append second entry");
        append_backlog(&mut conn, "customers", "C-1", BacklogOperation::Index)
            .await
            .expect("failed to append other-type entry");

        assert_eq!(
            count_backlog(&mut conn, None)
                .await
                .expect("failed to count backlog"),
            3
        );
        assert_eq!(
            count_backlog(&mut conn, Some("products"))
                .await
                .expect("failed to count filtered backlog"),
            2
        );

        let entries = list_backlog(&mut conn, "products", 10)
            .await
            .expect("failed to list backlog");
        let identifiers: Vec<&str> = entries.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(identifiers, vec!["1", "2"]);
        assert!(entries
            .iter()
            .all(|entry| entry.operation == BacklogOperation::Index));
        assert!(entries.windows(2).all(|w| w[0].backlog_id < w[1].backlog_id));
    }

    #[tokio::test]
    async fn quoted_values_survive_embedded_quotes() {
        let mut conn = setup_in_memory_sqlite();

        append_backlog(&mut conn, "products", "o'brien", BacklogOperation::Index)
            .await
            .expect("failed to append quoted identifier");

        let entries = list_backlog(&mut conn, "products", 10)
            .await
            .expect("failed to list backlog");
        assert_eq!(entries[0].identifier, "o'brien");
    }
}
