//! Push/pull reconciliation between the local cache and the remote tables.

use chrono::Utc;
use log::{debug, info, warn};
use reqwest::Method;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use tasksync_core::{
    Error, MutationOp, MutationQueue, PendingMutation, RecordRow, RecordStore, Result,
    SyncStateStore, TableSyncState,
};

use crate::transport::{attach_local_version, ApiRequest, AuthenticatedTransport};

/// Default page size for change pulls.
const DEFAULT_PULL_LIMIT: u32 = 100;

/// One page of remote changes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeBatch {
    rows: Vec<RecordRow>,
    cursor: String,
    done: bool,
}

/// A mutation that could not be pushed this pass. It stays queued.
#[derive(Debug)]
pub struct PushFailure {
    pub mutation_id: String,
    pub table: String,
    pub record_id: Option<String>,
    pub error: Error,
}

/// Aggregate outcome of one push pass.
#[derive(Debug, Default)]
pub struct PushReport {
    pub pushed: usize,
    /// Mutations skipped because an earlier mutation for the same record
    /// failed in this pass.
    pub skipped: usize,
    pub failed: Vec<PushFailure>,
}

impl PushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Aggregate outcome of one sync cycle (push, then pull per table).
#[derive(Debug, Default)]
pub struct SyncReport {
    pub push: PushReport,
    /// Rows applied per table by the pull phase.
    pub pulled: HashMap<String, usize>,
    /// Tables whose pull failed, with the error.
    pub pull_failures: HashMap<String, Error>,
}

/// Reconciles locally queued mutations with the remote store and refreshes
/// the local cache from the remote change feed.
///
/// At most one push or pull runs against a table at a time, guarded by a
/// per-table async mutex. Cancelling an in-flight push (dropping the future)
/// leaves already-sent mutations applied remotely and removed from the
/// queue; the pass is not atomic across the queue.
pub struct SyncCoordinator {
    transport: Arc<AuthenticatedTransport>,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn MutationQueue>,
    sync_state: Arc<dyn SyncStateStore>,
    tables: RwLock<HashSet<String>>,
    table_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    pull_limit: u32,
}

impl SyncCoordinator {
    pub fn new(
        transport: Arc<AuthenticatedTransport>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn MutationQueue>,
        sync_state: Arc<dyn SyncStateStore>,
    ) -> Self {
        Self {
            transport,
            records,
            queue,
            sync_state,
            tables: RwLock::new(HashSet::new()),
            table_locks: Mutex::new(HashMap::new()),
            pull_limit: DEFAULT_PULL_LIMIT,
        }
    }

    pub fn with_pull_limit(mut self, limit: u32) -> Self {
        self.pull_limit = limit;
        self
    }

    /// Register a table for inclusion in `sync` pulls.
    pub async fn register_table(&self, name: &str) {
        self.tables.write().await.insert(name.to_string());
    }

    async fn table_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.table_locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Push queued mutations in FIFO order.
    ///
    /// A failing mutation is recorded in the report and does not block
    /// mutations for other records; later mutations for a record that
    /// already failed in this pass are skipped so per-record ordering
    /// survives. Successful mutations are removed from the queue, everything
    /// else stays queued for the next pass.
    pub async fn push(&self) -> Result<PushReport> {
        let pending = self.queue.pending().await?;
        if pending.is_empty() {
            return Ok(PushReport::default());
        }

        // Hold every involved table's lock for the pass; sorted order keeps
        // acquisition deterministic.
        let mut names: Vec<String> = pending
            .iter()
            .map(|m| m.table.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        let mut guards = Vec::with_capacity(names.len());
        for name in &names {
            let lock = self.table_lock(name).await;
            guards.push(lock.lock_owned().await);
        }

        let mut report = PushReport::default();
        let mut failed_records: HashSet<(String, String)> = HashSet::new();

        for mutation in pending {
            if let Some(record_id) = &mutation.record_id {
                if failed_records.contains(&(mutation.table.clone(), record_id.clone())) {
                    debug!(
                        "skipping queued {} for {}/{} after earlier failure",
                        mutation.op.as_str(),
                        mutation.table,
                        record_id
                    );
                    report.skipped += 1;
                    continue;
                }
            }

            match self.push_one(&mutation).await {
                Ok(()) => {
                    self.queue.remove(&mutation.id).await?;
                    report.pushed += 1;
                }
                Err(error) => {
                    warn!(
                        "push of {} to '{}' failed: {}",
                        mutation.op.as_str(),
                        mutation.table,
                        error
                    );
                    if let Some(record_id) = &mutation.record_id {
                        failed_records.insert((mutation.table.clone(), record_id.clone()));
                    }
                    report.failed.push(PushFailure {
                        mutation_id: mutation.id.clone(),
                        table: mutation.table.clone(),
                        record_id: mutation.record_id.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            "push pass complete: {} pushed, {} failed, {} skipped",
            report.pushed,
            report.failed.len(),
            report.skipped
        );
        Ok(report)
    }

    async fn push_one(&self, mutation: &PendingMutation) -> Result<()> {
        let base = format!("/api/v1/tables/{}", mutation.table);
        match mutation.op {
            MutationOp::Create => {
                let payload = mutation.payload.clone().ok_or_else(|| {
                    Error::Unexpected("queued create without a payload".to_string())
                })?;
                let request = ApiRequest::new(Method::POST, base).json(payload);
                let response = self.transport.send(&request).await?;
                let body: serde_json::Value =
                    AuthenticatedTransport::parse_json(response).await?;
                let row = RecordRow::from_record_json(body)?;
                self.records
                    .apply(&mutation.table, std::slice::from_ref(&row))
                    .await?;
                Ok(())
            }
            MutationOp::Update => {
                let record_id = mutation.record_id.as_deref().ok_or_else(|| {
                    Error::Unexpected("queued update without a record id".to_string())
                })?;
                let payload = mutation.payload.clone().ok_or_else(|| {
                    Error::Unexpected("queued update without a payload".to_string())
                })?;
                let request =
                    ApiRequest::new(Method::PUT, format!("{}/{}", base, record_id)).json(payload);
                let response = self.transport.send(&request).await?;
                let body: serde_json::Value = AuthenticatedTransport::parse_json(response)
                    .await
                    .map_err(|e| attach_local_version(e, mutation.base_version.as_deref()))?;
                let row = RecordRow::from_record_json(body)?;
                self.records
                    .apply(&mutation.table, std::slice::from_ref(&row))
                    .await?;
                Ok(())
            }
            MutationOp::Delete => {
                let record_id = mutation.record_id.as_deref().ok_or_else(|| {
                    Error::Unexpected("queued delete without a record id".to_string())
                })?;
                let mut request =
                    ApiRequest::new(Method::DELETE, format!("{}/{}", base, record_id));
                if let Some(version) = &mutation.base_version {
                    request = request.query("version", version);
                }
                let response = self.transport.send(&request).await?;
                AuthenticatedTransport::expect_success(response)
                    .await
                    .map_err(|e| attach_local_version(e, mutation.base_version.as_deref()))?;
                let tombstone = RecordRow {
                    id: record_id.to_string(),
                    updated_at: Utc::now(),
                    version: None,
                    deleted: true,
                    data: serde_json::Value::Null,
                };
                self.records
                    .apply(&mutation.table, std::slice::from_ref(&tombstone))
                    .await?;
                Ok(())
            }
        }
    }

    /// Pull remote changes for one table and apply them last-write-wins by
    /// `updated_at`.
    ///
    /// The stored cursor advances only after every page of the cycle has
    /// been applied; a mid-cycle failure records the error on the sync state
    /// and leaves the cursor untouched. Returns the number of rows that
    /// changed local state.
    pub async fn pull(&self, table: &str) -> Result<usize> {
        self.register_table(table).await;
        let lock = self.table_lock(table).await;
        let _guard = lock.lock_owned().await;

        let mut state = self
            .sync_state
            .get(table)
            .await?
            .unwrap_or_else(|| TableSyncState::new(table));

        match self.pull_pages(table, state.cursor.clone()).await {
            Ok((applied, cursor)) => {
                state.mark_synced(cursor);
                self.sync_state.upsert(&state).await?;
                info!("pulled {} rows into '{}'", applied, table);
                Ok(applied)
            }
            Err(error) => {
                state.mark_failed(error.to_string());
                self.sync_state.upsert(&state).await?;
                Err(error)
            }
        }
    }

    async fn pull_pages(&self, table: &str, mut cursor: Option<String>) -> Result<(usize, String)> {
        let mut applied = 0usize;
        loop {
            let mut request = ApiRequest::new(
                Method::GET,
                format!("/api/v1/tables/{}/changes", table),
            )
            .query("limit", self.pull_limit);
            if let Some(cursor) = &cursor {
                request = request.query("cursor", cursor);
            }

            let response = self.transport.send(&request).await?;
            let batch: ChangeBatch = AuthenticatedTransport::parse_json(response).await?;
            if !batch.rows.is_empty() {
                applied += self.records.apply(table, &batch.rows).await?;
            }
            debug!(
                "applied change page for '{}' ({} rows, done: {})",
                table,
                batch.rows.len(),
                batch.done
            );

            if batch.done {
                return Ok((applied, batch.cursor));
            }
            cursor = Some(batch.cursor);
        }
    }

    /// One full cycle: push queued mutations, then pull every registered
    /// table. One table's pull failure does not stop the others.
    pub async fn sync(&self) -> Result<SyncReport> {
        let push = self.push().await?;
        let mut report = SyncReport {
            push,
            ..Default::default()
        };

        let tables: Vec<String> = {
            let tables = self.tables.read().await;
            let mut names: Vec<String> = tables.iter().cloned().collect();
            names.sort();
            names
        };

        for table in tables {
            match self.pull(&table).await {
                Ok(applied) => {
                    report.pulled.insert(table, applied);
                }
                Err(error) => {
                    report.pull_failures.insert(table, error);
                }
            }
        }
        Ok(report)
    }
}
