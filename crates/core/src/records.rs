//! Record metadata and the untyped row representation used by the sync path.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result, ValidationError};

/// Server-managed bookkeeping carried by every synced record.
///
/// Embed it in a record type with `#[serde(flatten)]`. The server assigns all
/// three fields on create and bumps `updated_at` and `version` on every
/// write; a record whose `id` is `None` has never been persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A user entity synced between the client and the server.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned {
    fn meta(&self) -> &RecordMeta;
    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn id(&self) -> Option<&str> {
        self.meta().id.as_deref()
    }

    /// Opaque concurrency token used for conflict detection.
    fn version(&self) -> Option<&str> {
        self.meta().version.as_deref()
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.meta().updated_at
    }

    /// A record without an id must be created, never updated.
    fn is_new(&self) -> bool {
        self.meta().id.is_none()
    }
}

/// Untyped change row exchanged with the server and the local cache.
///
/// `deleted` marks a tombstone: the record was removed remotely and the
/// local copy should be dropped when the row is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRow {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub version: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    /// Full record body as sent by the server.
    pub data: serde_json::Value,
}

impl RecordRow {
    /// Build a row from a flat record body as returned by the CRUD endpoints,
    /// keeping the full body as the payload.
    pub fn from_record_json(value: serde_json::Value) -> Result<Self> {
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation(ValidationError::MissingField("id".to_string())))?
            .to_string();
        let updated_at = value
            .get("updatedAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| {
                Error::Validation(ValidationError::MissingField("updatedAt".to_string()))
            })?;
        let version = value
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(RecordRow {
            id,
            updated_at,
            version,
            deleted: false,
            data: value,
        })
    }
}

/// A locally queued write awaiting push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub id: String,
    pub table: String,
    pub op: MutationOp,
    /// Target record; `None` for creates (the server assigns the id).
    pub record_id: Option<String>,
    pub payload: Option<serde_json::Value>,
    /// Version the mutation was based on, checked by the server at push time.
    pub base_version: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingMutation {
    pub fn create(table: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table: table.into(),
            op: MutationOp::Create,
            record_id: None,
            payload: Some(payload),
            base_version: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn update(
        table: impl Into<String>,
        record_id: impl Into<String>,
        base_version: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table: table.into(),
            op: MutationOp::Update,
            record_id: Some(record_id.into()),
            payload: Some(payload),
            base_version,
            enqueued_at: Utc::now(),
        }
    }

    pub fn delete(
        table: impl Into<String>,
        record_id: impl Into<String>,
        base_version: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table: table.into(),
            op: MutationOp::Delete,
            record_id: Some(record_id.into()),
            payload: None,
            base_version,
            enqueued_at: Utc::now(),
        }
    }
}

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

impl MutationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOp::Create => "create",
            MutationOp::Update => "update",
            MutationOp::Delete => "delete",
        }
    }
}

impl std::str::FromStr for MutationOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "create" => Ok(MutationOp::Create),
            "update" => Ok(MutationOp::Update),
            "delete" => Ok(MutationOp::Delete),
            other => Err(format!("unknown mutation op '{}'", other)),
        }
    }
}
