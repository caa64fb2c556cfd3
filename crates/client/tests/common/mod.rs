//! Shared fixtures: in-memory stores, a static login flow, token helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::MockServer;

use tasksync_client::{CloudSyncService, ServiceConfig};
use tasksync_core::{
    AuthError, AuthToken, CredentialStore, InteractiveAuthenticator, MutationQueue,
    PendingMutation, Record, RecordMeta, RecordRow, RecordStore, Result, SyncStateStore,
    TableSyncState,
};

// ─────────────────────────────────────────────────────────────────────────────
// Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Unsigned JWT with the given `exp` claim (seconds since epoch).
pub fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json!({ "alg": "none" })).unwrap());
    let payload = URL_SAFE_NO_PAD
        .encode(serde_json::to_vec(&json!({ "sub": "user-1", "exp": exp })).unwrap());
    format!("{}.{}.sig", header, payload)
}

pub fn jwt_expiring_in(seconds: i64) -> String {
    jwt_with_exp(Utc::now().timestamp() + seconds)
}

pub fn token_expiring_in(seconds: i64) -> AuthToken {
    AuthToken::new("user-1", jwt_expiring_in(seconds))
}

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

// ─────────────────────────────────────────────────────────────────────────────
// Credential store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCredentials {
    secrets: Mutex<HashMap<String, String>>,
    /// Number of `set_secret` calls, for at-most-one-write-per-refresh checks.
    pub set_calls: AtomicUsize,
}

impl MemoryCredentials {
    pub fn has_token(&self) -> bool {
        !self.secrets.lock().unwrap().is_empty()
    }
}

impl CredentialStore for MemoryCredentials {
    fn get_secret(&self, key: &str) -> Result<Option<String>> {
        Ok(self.secrets.lock().unwrap().get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        self.secrets.lock().unwrap().remove(key);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Login flows
// ─────────────────────────────────────────────────────────────────────────────

/// Hands out a fixed token, standing in for a browser login flow.
pub struct StaticAuthenticator {
    token: AuthToken,
    pub calls: AtomicUsize,
}

impl StaticAuthenticator {
    pub fn new(token: AuthToken) -> Self {
        Self {
            token,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InteractiveAuthenticator for StaticAuthenticator {
    async fn authenticate(&self) -> Result<AuthToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.clone())
    }
}

/// A login flow the user always cancels.
pub struct FailingAuthenticator;

#[async_trait]
impl InteractiveAuthenticator for FailingAuthenticator {
    async fn authenticate(&self) -> Result<AuthToken> {
        Err(AuthError::ReauthenticationRequired("login cancelled".to_string()).into())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Local store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory implementation of all three local-store traits, mirroring the
/// last-write-wins semantics of the SQLite store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), RecordRow>>,
    queue: Mutex<Vec<PendingMutation>>,
    states: Mutex<HashMap<String, TableSyncState>>,
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn apply(&self, table: &str, rows: &[RecordRow]) -> Result<usize> {
        let mut records = self.records.lock().unwrap();
        let mut changed = 0;
        for row in rows {
            let key = (table.to_string(), row.id.clone());
            if row.deleted {
                if let Some(existing) = records.get(&key) {
                    if existing.updated_at <= row.updated_at {
                        records.remove(&key);
                        changed += 1;
                    }
                }
                continue;
            }
            match records.get(&key) {
                Some(existing) if existing.updated_at >= row.updated_at => {}
                _ => {
                    records.insert(key, row.clone());
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<RecordRow>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(table.to_string(), id.to_string()))
            .cloned())
    }

    async fn list(&self, table: &str) -> Result<Vec<RecordRow>> {
        let records = self.records.lock().unwrap();
        let mut rows: Vec<RecordRow> = records
            .iter()
            .filter(|((t, _), _)| t == table)
            .map(|(_, row)| row.clone())
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }
}

#[async_trait]
impl MutationQueue for MemoryStore {
    async fn enqueue(&self, mutation: PendingMutation) -> Result<()> {
        self.queue.lock().unwrap().push(mutation);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<PendingMutation>> {
        Ok(self.queue.lock().unwrap().clone())
    }

    async fn remove(&self, mutation_id: &str) -> Result<()> {
        self.queue.lock().unwrap().retain(|m| m.id != mutation_id);
        Ok(())
    }

    async fn clear(&self) -> Result<usize> {
        let mut queue = self.queue.lock().unwrap();
        let removed = queue.len();
        queue.clear();
        Ok(removed)
    }
}

#[async_trait]
impl SyncStateStore for MemoryStore {
    async fn get(&self, table: &str) -> Result<Option<TableSyncState>> {
        Ok(self.states.lock().unwrap().get(table).cloned())
    }

    async fn upsert(&self, state: &TableSyncState) -> Result<()> {
        self.states
            .lock()
            .unwrap()
            .insert(state.table_name.clone(), state.clone());
        Ok(())
    }

    async fn delete_all(&self) -> Result<usize> {
        let mut states = self.states.lock().unwrap();
        let removed = states.len();
        states.clear();
        Ok(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title: String,
    #[serde(default)]
    pub complete: bool,
}

impl TaskItem {
    pub fn new(title: &str) -> Self {
        Self {
            meta: RecordMeta::default(),
            title: title.to_string(),
            complete: false,
        }
    }
}

impl Record for TaskItem {
    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service harness
// ─────────────────────────────────────────────────────────────────────────────

/// A logged-in service wired to the mock server and in-memory stores.
pub async fn test_service(
    server: &MockServer,
) -> (CloudSyncService, Arc<MemoryStore>, Arc<MemoryCredentials>) {
    let credentials = Arc::new(MemoryCredentials::default());
    let store = Arc::new(MemoryStore::default());
    let authenticator = Arc::new(StaticAuthenticator::new(token_expiring_in(3600)));

    let service = CloudSyncService::new(
        ServiceConfig::new(server.uri()),
        credentials.clone(),
        Some(authenticator),
        store.clone(),
        store.clone(),
        store.clone(),
    );
    service.login().await.unwrap();
    (service, store, credentials)
}
