//! Typed CRUD facade over the authenticated transport.

use reqwest::Method;
use serde::Deserialize;
use std::marker::PhantomData;
use std::sync::Arc;

use tasksync_core::{Error, Record, Result, ValidationError};

use crate::transport::{attach_local_version, ApiRequest, AuthenticatedTransport};

/// One page of a listing; callers iterate pages themselves, there is no
/// implicit full-table fetch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
}

/// Typed CRUD operations for one remote table.
pub struct TableClient<T: Record> {
    transport: Arc<AuthenticatedTransport>,
    name: String,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> TableClient<T> {
    pub(crate) fn new(transport: Arc<AuthenticatedTransport>, name: impl Into<String>) -> Self {
        Self {
            transport,
            name: name.into(),
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn base_path(&self) -> String {
        format!("/api/v1/tables/{}", self.name)
    }

    fn record_path(&self, id: &str) -> String {
        format!("{}/{}", self.base_path(), id)
    }

    /// Create a new record. The server assigns `id`, `updated_at`, and
    /// `version`; the returned record carries all three.
    pub async fn create(&self, record: &T) -> Result<T> {
        if !record.is_new() {
            return Err(ValidationError::InvalidInput(
                "create requires a record without an id".to_string(),
            )
            .into());
        }
        let body = serde_json::to_value(record)?;
        let request = ApiRequest::new(Method::POST, self.base_path()).json(body);
        let response = self.transport.send(&request).await?;
        AuthenticatedTransport::parse_json(response).await
    }

    pub async fn read(&self, id: &str) -> Result<T> {
        let request = ApiRequest::new(Method::GET, self.record_path(id));
        let response = self.transport.send(&request).await?;
        AuthenticatedTransport::parse_json(response).await
    }

    /// Update an existing record. The carried `version` must match the
    /// server's or the call fails with a version conflict.
    pub async fn update(&self, record: &T) -> Result<T> {
        let id = record
            .id()
            .ok_or_else(|| Error::Validation(ValidationError::MissingField("id".to_string())))?;
        let body = serde_json::to_value(record)?;
        let request = ApiRequest::new(Method::PUT, self.record_path(id)).json(body);
        let response = self.transport.send(&request).await?;
        AuthenticatedTransport::parse_json(response)
            .await
            .map_err(|e| attach_local_version(e, record.version()))
    }

    /// Delete a record. Deleting an already-deleted record is `NotFound`,
    /// never a silent success.
    pub async fn delete(&self, record: &T) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| Error::Validation(ValidationError::MissingField("id".to_string())))?;
        let mut request = ApiRequest::new(Method::DELETE, self.record_path(id));
        if let Some(version) = record.version() {
            request = request.query("version", version);
        }
        let response = self.transport.send(&request).await?;
        AuthenticatedTransport::expect_success(response)
            .await
            .map_err(|e| attach_local_version(e, record.version()))
    }

    /// Fetch one page, skipping `skip` records and returning at most `take`.
    pub async fn list(&self, skip: u64, take: u64) -> Result<Page<T>> {
        let request = ApiRequest::new(Method::GET, self.base_path())
            .query("skip", skip)
            .query("take", take);
        let response = self.transport.send(&request).await?;
        AuthenticatedTransport::parse_json(response).await
    }
}
