//! Tasksync Core - Domain types, error taxonomy, and storage seams.
//!
//! This crate contains the transport- and storage-agnostic pieces of the
//! tasksync client: record metadata, auth-token handling, and the traits
//! that are implemented by the `store-sqlite` crate and consumed by the
//! `client` crate.

pub mod auth;
pub mod errors;
pub mod records;
pub mod sync;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
pub use errors::{AuthError, StoreError, ValidationError};

// Re-export common types
pub use auth::{decode_expiry, AuthToken, CredentialStore, InteractiveAuthenticator};
pub use records::{MutationOp, PendingMutation, Record, RecordMeta, RecordRow};
pub use sync::{MutationQueue, RecordStore, SyncStateStore, TableSyncState};
