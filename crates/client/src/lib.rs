//! Tasksync Client - authenticated sync client for the tasksync cloud API.
//!
//! This crate provides the HTTP layer (bearer-token transport with a single
//! retry on authorization failure), the token manager, typed table CRUD, and
//! the push/pull sync coordinator.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tasksync_client::{CloudSyncService, ServiceConfig};
//!
//! let service = CloudSyncService::new(
//!     ServiceConfig::new("https://api.tasksync.app"),
//!     credentials,      // Arc<dyn CredentialStore>
//!     Some(login_flow), // Arc<dyn InteractiveAuthenticator>
//!     records,          // Arc<dyn RecordStore>
//!     queue,            // Arc<dyn MutationQueue>
//!     sync_state,       // Arc<dyn SyncStateStore>
//! );
//! service.login().await?;
//! let todos = service.table::<TaskItem>("todoitem").await;
//! let report = service.sync().await?;
//! ```

mod coordinator;
mod service;
mod table;
mod token_manager;
mod transport;

pub use coordinator::{PushFailure, PushReport, SyncCoordinator, SyncReport};
pub use service::{CloudSyncService, ServiceConfig};
pub use table::{Page, TableClient};
pub use token_manager::TokenManager;
pub use transport::{ApiRequest, AuthenticatedTransport, AUTH_HEADER};
