//! Token lifecycle: cached access, silent refresh, interactive fallback.

use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use tasksync_core::{
    AuthError, AuthToken, CredentialStore, Error, InteractiveAuthenticator, Result,
};

use crate::transport::AUTH_HEADER;

/// Credential-store key under which the auth token is persisted.
const TOKEN_SECRET_KEY: &str = "tasksync.auth_token";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    user_id: String,
    token: String,
}

/// Maintains the current auth token and transparently refreshes it.
///
/// The cache is owned by the manager instance and handed around explicitly;
/// there is no process-wide token state.
pub struct TokenManager {
    client: reqwest::Client,
    auth_base_url: String,
    credentials: Arc<dyn CredentialStore>,
    authenticator: Option<Arc<dyn InteractiveAuthenticator>>,
    cached: RwLock<Option<AuthToken>>,
}

impl TokenManager {
    pub fn new(
        auth_base_url: &str,
        credentials: Arc<dyn CredentialStore>,
        authenticator: Option<Arc<dyn InteractiveAuthenticator>>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
            credentials,
            authenticator,
            cached: RwLock::new(None),
        }
    }

    /// Return a token that is not expired, refreshing silently if needed.
    ///
    /// Expiry comes from the token's decoded `exp` claim with a zero grace
    /// window; a malformed token counts as expired and is never returned
    /// without a refresh attempt.
    pub async fn get_valid_token(&self) -> Result<AuthToken> {
        let mut candidate = self.cached.read().await.clone();
        if candidate.is_none() {
            candidate = self.load_persisted()?;
        }

        match candidate {
            Some(token) if !token.is_expired() => {
                *self.cached.write().await = Some(token.clone());
                Ok(token)
            }
            Some(expired) => self.refresh_silent(&expired).await,
            None => Err(AuthError::ReauthenticationRequired(
                "no stored credentials".to_string(),
            )
            .into()),
        }
    }

    /// Obtain a fresh token after the transport saw a 401: silent refresh
    /// first, interactive login as the fallback.
    pub async fn authorize_retry(&self) -> Result<AuthToken> {
        let current = match self.cached.read().await.clone() {
            Some(token) => Some(token),
            None => self.load_persisted()?,
        };

        if let Some(current) = current {
            match self.refresh_silent(&current).await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    warn!("silent refresh failed, falling back to interactive login: {e}")
                }
            }
        }
        self.sign_in().await
    }

    /// Interactive login through the configured authenticator. The resulting
    /// token is persisted and cached.
    pub async fn sign_in(&self) -> Result<AuthToken> {
        let authenticator = self.authenticator.as_ref().ok_or_else(|| {
            Error::Auth(AuthError::ReauthenticationRequired(
                "no interactive authenticator configured".to_string(),
            ))
        })?;
        let token = authenticator.authenticate().await?;
        self.store(token.clone()).await?;
        info!("signed in as {}", token.user_id);
        Ok(token)
    }

    /// Drop the cached token and the persisted credential entry.
    pub async fn invalidate(&self) -> Result<()> {
        *self.cached.write().await = None;
        self.credentials.delete_secret(TOKEN_SECRET_KEY)
    }

    /// Silent refresh against the identity endpoint. Persists the new token
    /// exactly once on success.
    async fn refresh_silent(&self, current: &AuthToken) -> Result<AuthToken> {
        debug!("refreshing auth token for user {}", current.user_id);
        let url = format!("{}/api/v1/auth/refresh", self.auth_base_url);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let token_value = HeaderValue::from_str(&current.token).map_err(|_| {
            AuthError::InvalidToken("token is not a valid header value".to_string())
        })?;
        headers.insert(AUTH_HEADER, token_value);

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| AuthError::ReauthenticationRequired(format!("token refresh failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::ReauthenticationRequired(format!(
                "token refresh rejected with status {}",
                response.status()
            ))
            .into());
        }

        let body: RefreshResponse = response.json().await.map_err(|e| {
            AuthError::ReauthenticationRequired(format!("malformed refresh response: {e}"))
        })?;
        let token = AuthToken::new(body.user_id, body.token);
        self.store(token.clone()).await?;
        info!("auth token refreshed for user {}", token.user_id);
        Ok(token)
    }

    async fn store(&self, token: AuthToken) -> Result<()> {
        let json = serde_json::to_string(&token)?;
        self.credentials.set_secret(TOKEN_SECRET_KEY, &json)?;
        *self.cached.write().await = Some(token);
        Ok(())
    }

    fn load_persisted(&self) -> Result<Option<AuthToken>> {
        match self.credentials.get_secret(TOKEN_SECRET_KEY)? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(token) => Ok(Some(token)),
                Err(e) => {
                    warn!("discarding unreadable stored token: {e}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}
