//! Auth-token model, expiry decoding, and the credential-store seam.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// A bearer token plus the identity it belongs to.
///
/// `expires_at` is derived from the token's `exp` claim at construction;
/// a token whose payload cannot be decoded carries no expiry and is treated
/// as already expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    pub user_id: String,
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = decode_expiry(&token);
        Self {
            user_id: user_id.into(),
            token,
            expires_at,
        }
    }

    /// Zero grace window: a token expiring exactly now is already expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }
}

/// Decode the `exp` claim from a JWT payload segment without verifying the
/// signature. Returns `None` for anything that does not parse.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// Platform credential storage (keychain, password vault) as seen by the
/// core.
///
/// Implementations are external adapters. Semantics follow the OS keyring:
/// reading a missing entry yields `Ok(None)` and deleting a missing entry is
/// not an error.
pub trait CredentialStore: Send + Sync {
    /// Retrieve a secret for the given key.
    fn get_secret(&self, key: &str) -> Result<Option<String>>;

    /// Store a secret for the given key, replacing any existing value.
    fn set_secret(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a secret for the given key.
    fn delete_secret(&self, key: &str) -> Result<()>;
}

/// Interactive login flow (system browser, login page) as seen by the core.
///
/// Invoked when no usable credentials exist and silent refresh has failed.
#[async_trait]
pub trait InteractiveAuthenticator: Send + Sync {
    async fn authenticate(&self) -> Result<AuthToken>;
}
