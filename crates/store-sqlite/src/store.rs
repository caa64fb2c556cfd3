//! Trait implementations over raw SQL, one transaction per applied batch.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Integer, Nullable, Text};
use log::debug;

use tasksync_core::{
    Error, MutationOp, MutationQueue, PendingMutation, RecordRow, RecordStore, Result, StoreError,
    SyncStateStore, TableSyncState,
};

use crate::errors::StorageError;
use crate::{DbConn, DbPool};

type PooledConn = diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<DbConn>>;

/// All three local-store capabilities over one SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<PooledConn> {
        self.pool.get().map_err(|e| StorageError::Pool(e).into())
    }
}

/// RFC 3339 UTC at millisecond precision; lexicographic order matches
/// chronological order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Store(StoreError::Serialization(format!("bad timestamp '{s}': {e}"))))
}

#[derive(QueryableByName)]
struct RecordDbRow {
    #[diesel(sql_type = Text)]
    id: String,
    #[diesel(sql_type = Text)]
    updated_at: String,
    #[diesel(sql_type = Nullable<Text>)]
    version: Option<String>,
    #[diesel(sql_type = Integer)]
    deleted: i32,
    #[diesel(sql_type = Text)]
    payload: String,
}

impl RecordDbRow {
    fn into_row(self) -> Result<RecordRow> {
        Ok(RecordRow {
            updated_at: parse_ts(&self.updated_at)?,
            data: serde_json::from_str(&self.payload).map_err(StorageError::Serialization)?,
            id: self.id,
            version: self.version,
            deleted: self.deleted != 0,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn apply(&self, table: &str, rows: &[RecordRow]) -> Result<usize> {
        let mut conn = self.conn()?;
        let mut changed = 0usize;
        conn.immediate_transaction::<_, StorageError, _>(|c| {
            for row in rows {
                if row.deleted {
                    // A tombstone wins unless the local row is strictly newer.
                    changed += sql_query(
                        "DELETE FROM records WHERE table_name = ?1 AND id = ?2 AND updated_at <= ?3",
                    )
                    .bind::<Text, _>(table)
                    .bind::<Text, _>(&row.id)
                    .bind::<Text, _>(fmt_ts(row.updated_at))
                    .execute(c)?;
                    continue;
                }

                let payload = serde_json::to_string(&row.data)?;
                changed += sql_query(
                    r#"
                    INSERT INTO records (table_name, id, updated_at, version, deleted, payload)
                    VALUES (?1, ?2, ?3, ?4, 0, ?5)
                    ON CONFLICT(table_name, id) DO UPDATE SET
                        updated_at = excluded.updated_at,
                        version    = excluded.version,
                        deleted    = excluded.deleted,
                        payload    = excluded.payload
                    WHERE excluded.updated_at > records.updated_at
                    "#,
                )
                .bind::<Text, _>(table)
                .bind::<Text, _>(&row.id)
                .bind::<Text, _>(fmt_ts(row.updated_at))
                .bind::<Nullable<Text>, _>(&row.version)
                .bind::<Text, _>(payload)
                .execute(c)?;
            }
            Ok(())
        })?;
        debug!("applied {} of {} incoming rows to '{}'", changed, rows.len(), table);
        Ok(changed)
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<RecordRow>> {
        let mut conn = self.conn()?;
        let row = sql_query(
            "SELECT id, updated_at, version, deleted, payload
               FROM records
              WHERE table_name = ?1 AND id = ?2",
        )
        .bind::<Text, _>(table)
        .bind::<Text, _>(id)
        .get_result::<RecordDbRow>(&mut conn)
        .optional()
        .map_err(StorageError::QueryFailed)?;
        row.map(RecordDbRow::into_row).transpose()
    }

    async fn list(&self, table: &str) -> Result<Vec<RecordRow>> {
        let mut conn = self.conn()?;
        let rows = sql_query(
            "SELECT id, updated_at, version, deleted, payload
               FROM records
              WHERE table_name = ?1
              ORDER BY id ASC",
        )
        .bind::<Text, _>(table)
        .load::<RecordDbRow>(&mut conn)
        .map_err(StorageError::QueryFailed)?;
        rows.into_iter().map(RecordDbRow::into_row).collect()
    }
}

#[derive(QueryableByName)]
struct MutationDbRow {
    #[diesel(sql_type = Text)]
    id: String,
    #[diesel(sql_type = Text)]
    table_name: String,
    #[diesel(sql_type = Text)]
    op: String,
    #[diesel(sql_type = Nullable<Text>)]
    record_id: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    payload: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    base_version: Option<String>,
    #[diesel(sql_type = Text)]
    enqueued_at: String,
}

impl MutationDbRow {
    fn into_mutation(self) -> Result<PendingMutation> {
        let op: MutationOp = self
            .op
            .parse()
            .map_err(|e: String| Error::Store(StoreError::Serialization(e)))?;
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(StorageError::Serialization)?;
        Ok(PendingMutation {
            op,
            payload,
            enqueued_at: parse_ts(&self.enqueued_at)?,
            id: self.id,
            table: self.table_name,
            record_id: self.record_id,
            base_version: self.base_version,
        })
    }
}

#[async_trait]
impl MutationQueue for SqliteStore {
    async fn enqueue(&self, mutation: PendingMutation) -> Result<()> {
        let payload = mutation
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(StorageError::Serialization)?;
        let mut conn = self.conn()?;
        sql_query(
            r#"
            INSERT INTO mutation_queue (id, table_name, op, record_id, payload, base_version, enqueued_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind::<Text, _>(&mutation.id)
        .bind::<Text, _>(&mutation.table)
        .bind::<Text, _>(mutation.op.as_str())
        .bind::<Nullable<Text>, _>(&mutation.record_id)
        .bind::<Nullable<Text>, _>(&payload)
        .bind::<Nullable<Text>, _>(&mutation.base_version)
        .bind::<Text, _>(fmt_ts(mutation.enqueued_at))
        .execute(&mut conn)
        .map_err(StorageError::QueryFailed)?;
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<PendingMutation>> {
        let mut conn = self.conn()?;
        let rows = sql_query(
            "SELECT id, table_name, op, record_id, payload, base_version, enqueued_at
               FROM mutation_queue
              ORDER BY seq ASC",
        )
        .load::<MutationDbRow>(&mut conn)
        .map_err(StorageError::QueryFailed)?;
        rows.into_iter().map(MutationDbRow::into_mutation).collect()
    }

    async fn remove(&self, mutation_id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        sql_query("DELETE FROM mutation_queue WHERE id = ?1")
            .bind::<Text, _>(mutation_id)
            .execute(&mut conn)
            .map_err(StorageError::QueryFailed)?;
        Ok(())
    }

    async fn clear(&self) -> Result<usize> {
        let mut conn = self.conn()?;
        let removed = sql_query("DELETE FROM mutation_queue")
            .execute(&mut conn)
            .map_err(StorageError::QueryFailed)?;
        Ok(removed)
    }
}

#[derive(QueryableByName)]
struct SyncStateDbRow {
    #[diesel(sql_type = Text)]
    table_name: String,
    #[diesel(sql_type = Nullable<Text>)]
    cursor: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    last_synced_at: Option<String>,
    #[diesel(sql_type = Integer)]
    error_count: i32,
    #[diesel(sql_type = Nullable<Text>)]
    last_error: Option<String>,
    #[diesel(sql_type = Text)]
    created_at: String,
    #[diesel(sql_type = Text)]
    updated_at: String,
}

impl SyncStateDbRow {
    fn into_state(self) -> Result<TableSyncState> {
        Ok(TableSyncState {
            last_synced_at: self.last_synced_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            table_name: self.table_name,
            cursor: self.cursor,
            error_count: self.error_count,
            last_error: self.last_error,
        })
    }
}

#[async_trait]
impl SyncStateStore for SqliteStore {
    async fn get(&self, table: &str) -> Result<Option<TableSyncState>> {
        let mut conn = self.conn()?;
        let row = sql_query(
            "SELECT table_name, cursor, last_synced_at, error_count, last_error, created_at, updated_at
               FROM sync_state
              WHERE table_name = ?1",
        )
        .bind::<Text, _>(table)
        .get_result::<SyncStateDbRow>(&mut conn)
        .optional()
        .map_err(StorageError::QueryFailed)?;
        row.map(SyncStateDbRow::into_state).transpose()
    }

    async fn upsert(&self, state: &TableSyncState) -> Result<()> {
        let mut conn = self.conn()?;
        sql_query(
            r#"
            INSERT INTO sync_state (table_name, cursor, last_synced_at, error_count, last_error, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(table_name) DO UPDATE SET
                cursor         = excluded.cursor,
                last_synced_at = excluded.last_synced_at,
                error_count    = excluded.error_count,
                last_error     = excluded.last_error,
                updated_at     = excluded.updated_at
            "#,
        )
        .bind::<Text, _>(&state.table_name)
        .bind::<Nullable<Text>, _>(&state.cursor)
        .bind::<Nullable<Text>, _>(&state.last_synced_at.map(fmt_ts))
        .bind::<Integer, _>(state.error_count)
        .bind::<Nullable<Text>, _>(&state.last_error)
        .bind::<Text, _>(fmt_ts(state.created_at))
        .bind::<Text, _>(fmt_ts(state.updated_at))
        .execute(&mut conn)
        .map_err(StorageError::QueryFailed)?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<usize> {
        let mut conn = self.conn()?;
        let removed = sql_query("DELETE FROM sync_state")
            .execute(&mut conn)
            .map_err(StorageError::QueryFailed)?;
        Ok(removed)
    }
}
