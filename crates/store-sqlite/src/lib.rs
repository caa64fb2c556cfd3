//! SQLite-backed implementation of the tasksync local-store traits.
//!
//! One database holds the record cache, the mutation queue, and the
//! per-table sync state. The schema is bootstrapped with idempotent DDL at
//! pool creation, so the same database file can be reopened freely.

mod errors;
mod store;

pub use errors::StorageError;
pub use store::SqliteStore;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_query;
use diesel::SqliteConnection;

use tasksync_core::{Result, StoreError};

pub type DbConn = SqliteConnection;
pub type DbPool = Pool<ConnectionManager<DbConn>>;

/// Open (or create) the database and bootstrap the schema.
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<DbConn>::new(database_url);
    let pool = Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| StoreError::PoolCreationFailed(e.to_string()))?;

    let mut conn = pool
        .get()
        .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
    bootstrap(&mut conn)?;

    Ok(pool)
}

fn bootstrap(conn: &mut DbConn) -> Result<()> {
    for ddl in [
        "PRAGMA foreign_keys = ON;",
        r#"
        CREATE TABLE IF NOT EXISTS records (
            table_name TEXT NOT NULL,
            id         TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version    TEXT,
            deleted    INTEGER NOT NULL DEFAULT 0,
            payload    TEXT NOT NULL,
            PRIMARY KEY (table_name, id)
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS mutation_queue (
            seq          INTEGER PRIMARY KEY AUTOINCREMENT,
            id           TEXT NOT NULL UNIQUE,
            table_name   TEXT NOT NULL,
            op           TEXT NOT NULL,
            record_id    TEXT,
            payload      TEXT,
            base_version TEXT,
            enqueued_at  TEXT NOT NULL
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            table_name     TEXT PRIMARY KEY,
            cursor         TEXT,
            last_synced_at TEXT,
            error_count    INTEGER NOT NULL DEFAULT 0,
            last_error     TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        "#,
    ] {
        sql_query(ddl)
            .execute(conn)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    }
    Ok(())
}
