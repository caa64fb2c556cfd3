//! Authenticated HTTP transport with a single retry on authorization failure.

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use tasksync_core::{AuthError, Error, Result, ValidationError};

use crate::token_manager::TokenManager;

/// Header carrying the bearer token.
pub const AUTH_HEADER: &str = "X-AUTH-TOKEN";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A fully buffered request description.
///
/// The body is JSON held in memory, never a stream, so the request can be
/// replayed after a token refresh without consuming anything twice.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Transport that attaches credentials to outbound requests and retries
/// exactly once after a `401 Unauthorized`.
pub struct AuthenticatedTransport {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl AuthenticatedTransport {
    pub fn new(base_url: &str, tokens: Arc<TokenManager>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Send a buffered request with the current token attached.
    ///
    /// On `401` the token manager is asked for a fresh token (silent refresh,
    /// then interactive login) and the same buffered request is re-sent once.
    /// A second `401` is terminal.
    pub async fn send(&self, request: &ApiRequest) -> Result<reqwest::Response> {
        let token = self.tokens.get_valid_token().await?;
        let response = self.execute(request, &token.token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(
            "401 from {} {}, refreshing token and retrying once",
            request.method, request.path
        );
        let fresh = self.tokens.authorize_retry().await?;
        let retry = self.execute(request, &fresh.token).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(AuthError::ReauthenticationRequired(
                "request was rejected twice".to_string(),
            )
            .into());
        }
        Ok(retry)
    }

    async fn execute(&self, request: &ApiRequest, token: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(self.headers(token)?);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    fn headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let token_value = HeaderValue::from_str(token).map_err(|_| {
            AuthError::InvalidToken("token is not a valid header value".to_string())
        })?;
        headers.insert(AUTH_HEADER, token_value);

        Ok(headers)
    }

    /// Decode a JSON response body, mapping error statuses onto the error
    /// taxonomy.
    pub async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        debug!("API response ({}): {}", status, body);

        if !status.is_success() {
            return Err(Self::error_for(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            Error::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Check a response for success where no body is expected.
    pub async fn expect_success(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await?;
        Err(Self::error_for(status, &body))
    }

    fn error_for(status: StatusCode, body: &str) -> Error {
        match status {
            StatusCode::NOT_FOUND => Error::NotFound(
                message_from(body).unwrap_or_else(|| "record not found".to_string()),
            ),
            // Conflict responses carry the current server record; the caller
            // fills in the local version it was holding.
            StatusCode::CONFLICT => Error::conflict(None, remote_version_from(body)),
            StatusCode::BAD_REQUEST => Error::Validation(ValidationError::InvalidInput(
                message_from(body).unwrap_or_else(|| body.to_string()),
            )),
            _ => match message_from(body) {
                Some(message) => Error::api(status.as_u16(), message),
                None => Error::api(status.as_u16(), format!("Request failed: {}", body)),
            },
        }
    }
}

/// Fill the local half of a conflict error; other errors pass through.
pub(crate) fn attach_local_version(err: Error, local: Option<&str>) -> Error {
    match err {
        Error::Conflict { remote, .. } => Error::Conflict {
            local: local.map(str::to_string),
            remote,
        },
        other => other,
    }
}

#[derive(Debug, serde::Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
}

fn message_from(body: &str) -> Option<String> {
    serde_json::from_str::<ApiErrorResponse>(body)
        .ok()
        .map(|e| format!("{}: {}", e.code, e.message))
}

fn remote_version_from(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("version")?
        .as_str()
        .map(str::to_string)
}
