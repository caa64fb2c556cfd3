//! Core error types for the tasksync client.
//!
//! This module defines transport- and storage-agnostic error types. HTTP
//! errors (from reqwest) and storage-specific errors (from Diesel, SQLite,
//! etc.) are converted to these types at the layer boundaries.

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the sync client.
///
/// Auto-recovery is limited to a single token refresh after a 401; every
/// other error propagates to the caller unmodified. Conflicts are surfaced,
/// never resolved internally.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Optimistic-concurrency mismatch between the caller's record and the
    /// server's stored record. Both version tokens are carried so the caller
    /// can decide how to resolve.
    #[error("Version conflict: local {local:?}, remote {remote:?}")]
    Conflict {
        local: Option<String>,
        remote: Option<String>,
    },

    #[error("Record not found: {0}")]
    NotFound(String),

    /// Transient transport failure; retryable at the caller's discretion.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    /// Non-success response that maps to no other variant.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Create an API error from status and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a version-conflict error.
    pub fn conflict(local: Option<String>, remote: Option<String>) -> Self {
        Self::Conflict { local, remote }
    }
}

/// Authentication failures.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Silent refresh (and the interactive fallback, where configured)
    /// failed; the caller must prompt for a fresh login.
    #[error("reauthentication required: {0}")]
    ReauthenticationRequired(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Validation errors for records and other user input.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Required field '{0}' is missing")]
    MissingField(String),

    #[error("Failed to parse date/time: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
}

/// Storage-agnostic error type for local cache operations.
///
/// This enum uses `String` for all error details, allowing the storage layer
/// to convert storage-specific errors (Diesel, SQLite, etc.) into this format.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to establish a database connection.
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to create or configure the connection pool.
    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(String),

    /// A database query failed to execute.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// The requested row was not found.
    #[error("Row not found: {0}")]
    NotFound(String),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Internal/unexpected storage error.
    #[error("Internal store error: {0}")]
    Internal(String),
}

// === From implementations for common error types ===

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(ValidationError::InvalidInput(err.to_string()))
    }
}

impl From<chrono::ParseError> for Error {
    fn from(err: chrono::ParseError) -> Self {
        Error::Validation(ValidationError::DateTimeParse(err))
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}
