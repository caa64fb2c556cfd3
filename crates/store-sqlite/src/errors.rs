//! SQLite-specific error types, converted to core errors at the boundary.

use diesel::result::Error as DieselError;
use thiserror::Error;

use tasksync_core::{Error, StoreError};

/// Storage-specific errors that wrap Diesel and r2d2 types.
///
/// These are internal to the storage layer and converted to
/// `tasksync_core::Error` before being returned to callers.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Query execution failed: {0}")]
    QueryFailed(#[from] DieselError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConnectionFailed(e) => {
                Error::Store(StoreError::ConnectionFailed(e.to_string()))
            }
            StorageError::Pool(e) => Error::Store(StoreError::PoolCreationFailed(e.to_string())),
            StorageError::QueryFailed(DieselError::NotFound) => {
                Error::Store(StoreError::NotFound("row not found".to_string()))
            }
            StorageError::QueryFailed(e) => Error::Store(StoreError::QueryFailed(e.to_string())),
            StorageError::Serialization(e) => {
                Error::Store(StoreError::Serialization(e.to_string()))
            }
        }
    }
}
