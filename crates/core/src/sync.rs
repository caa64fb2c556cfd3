//! Sync-state bookkeeping and the local-store seams used by the coordinator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::records::{PendingMutation, RecordRow};

/// Per-table pull bookmark plus sync health bookkeeping.
///
/// The cursor is an opaque server-issued string; the client only stores and
/// echoes it. It advances only after a pull cycle has applied every page, and
/// it is never shared across tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSyncState {
    pub table_name: String,
    pub cursor: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TableSyncState {
    /// Create a fresh state for a table that has never been pulled.
    pub fn new(table_name: impl Into<String>) -> Self {
        let now = Utc::now();
        TableSyncState {
            table_name: table_name.into(),
            cursor: None,
            last_synced_at: None,
            error_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark a pull cycle as fully applied and advance the cursor.
    pub fn mark_synced(&mut self, cursor: String) {
        self.cursor = Some(cursor);
        self.last_synced_at = Some(Utc::now());
        self.error_count = 0;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    /// Record a failed pull cycle. The cursor is left untouched.
    pub fn mark_failed(&mut self, error: String) {
        self.error_count += 1;
        self.last_error = Some(error);
        self.updated_at = Utc::now();
    }
}

/// Local cache of pulled records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Apply server rows last-write-wins by `updated_at`: an incoming row
    /// replaces the local copy only if it is strictly newer, and tombstoned
    /// rows delete. Returns the number of rows that changed local state.
    async fn apply(&self, table: &str, rows: &[RecordRow]) -> Result<usize>;

    /// Fetch one cached row.
    async fn get(&self, table: &str, id: &str) -> Result<Option<RecordRow>>;

    /// All cached rows of a table.
    async fn list(&self, table: &str) -> Result<Vec<RecordRow>>;
}

/// FIFO queue of local writes awaiting push.
#[async_trait]
pub trait MutationQueue: Send + Sync {
    async fn enqueue(&self, mutation: PendingMutation) -> Result<()>;

    /// All queued mutations in the order they were queued.
    async fn pending(&self) -> Result<Vec<PendingMutation>>;

    /// Remove a mutation after it was pushed successfully.
    async fn remove(&self, mutation_id: &str) -> Result<()>;

    /// Drop every queued mutation. Returns the number removed.
    async fn clear(&self) -> Result<usize>;
}

/// Persistence for per-table sync state.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get(&self, table: &str) -> Result<Option<TableSyncState>>;

    async fn upsert(&self, state: &TableSyncState) -> Result<()>;

    /// Tear down all sync state (used on logout). Returns the number removed.
    async fn delete_all(&self) -> Result<usize>;
}
