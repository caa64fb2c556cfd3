//! Entry facade tying the transport, token manager, and coordinator together.

use log::info;
use std::sync::Arc;

use tasksync_core::{
    AuthToken, CredentialStore, InteractiveAuthenticator, MutationQueue, Record, RecordStore,
    Result, SyncStateStore,
};

use crate::coordinator::{SyncCoordinator, SyncReport};
use crate::table::TableClient;
use crate::token_manager::TokenManager;
use crate::transport::AuthenticatedTransport;

/// Connection settings for the cloud backend.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the table API.
    pub base_url: String,
    /// Base URL of the identity endpoint; defaults to `base_url`.
    pub auth_url: Option<String>,
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_url: None,
        }
    }

    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }
}

/// The only surface a UI layer needs: login, logout, tables, sync.
///
/// Every collaborator is injected through the constructor; the service owns
/// no global state and can be constructed as many times as needed.
pub struct CloudSyncService {
    transport: Arc<AuthenticatedTransport>,
    tokens: Arc<TokenManager>,
    coordinator: SyncCoordinator,
    sync_state: Arc<dyn SyncStateStore>,
}

impl CloudSyncService {
    pub fn new(
        config: ServiceConfig,
        credentials: Arc<dyn CredentialStore>,
        authenticator: Option<Arc<dyn InteractiveAuthenticator>>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn MutationQueue>,
        sync_state: Arc<dyn SyncStateStore>,
    ) -> Self {
        let auth_url = config
            .auth_url
            .clone()
            .unwrap_or_else(|| config.base_url.clone());
        let tokens = Arc::new(TokenManager::new(&auth_url, credentials, authenticator));
        let transport = Arc::new(AuthenticatedTransport::new(&config.base_url, tokens.clone()));
        let coordinator =
            SyncCoordinator::new(transport.clone(), records, queue, sync_state.clone());

        Self {
            transport,
            tokens,
            coordinator,
            sync_state,
        }
    }

    /// Interactive login; the resulting token is persisted to the credential
    /// store and cached for subsequent requests.
    pub async fn login(&self) -> Result<AuthToken> {
        self.tokens.sign_in().await
    }

    /// Tear down the session: token cache, credential entry, and all
    /// per-table sync state. Cached records and queued mutations belong to
    /// the caller-owned local database and are left intact.
    pub async fn logout(&self) -> Result<()> {
        self.tokens.invalidate().await?;
        let removed = self.sync_state.delete_all().await?;
        info!("logged out; {} sync state entries cleared", removed);
        Ok(())
    }

    /// Typed client for one remote table; also registers the table for
    /// `sync` pulls.
    pub async fn table<T: Record>(&self, name: &str) -> TableClient<T> {
        self.coordinator.register_table(name).await;
        TableClient::new(self.transport.clone(), name)
    }

    /// One push-then-pull reconciliation pass over every registered table.
    pub async fn sync(&self) -> Result<SyncReport> {
        self.coordinator.sync().await
    }

    /// Direct access to the coordinator for push-only or pull-only flows.
    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// The token manager backing this service.
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }
}
