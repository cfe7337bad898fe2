//! RemoteSyncService - IRemoteService implementation over HTTP
//!
//! Wraps the [`RemoteClient`] to fulfil the [`IRemoteService`] port contract.
//!
//! ## Design Notes
//!
//! - Uses `tokio::sync::RwLock` because `IRemoteService` methods take `&self`
//!   while a token refresh needs `&mut RemoteClient`.
//! - Adapter errors are converted to `anyhow` with a context naming the call.

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tracing::debug;

use cloudmirror_core::config::RemoteConfig;
use cloudmirror_core::ports::{IRemoteService, SyncFromRequest, SyncResponse, SyncToRequest};

use crate::client::RemoteClient;

/// Remote service adapter backed by [`RemoteClient`]
pub struct RemoteSyncService {
    client: RwLock<RemoteClient>,
}

impl RemoteSyncService {
    pub fn new(client: RemoteClient) -> Self {
        Self {
            client: RwLock::new(client),
        }
    }

    /// Builds the adapter from the `remote` configuration section
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let client = RemoteClient::from_config(config).context("Failed to build HTTP client")?;
        Ok(Self::new(client))
    }

    /// Replaces the bearer token used by subsequent calls
    pub async fn update_access_token(&self, token: impl Into<String>) {
        self.client.write().await.set_access_token(token);
    }
}

#[async_trait::async_trait]
impl IRemoteService for RemoteSyncService {
    async fn sync_to(&self, request: &SyncToRequest) -> Result<SyncResponse> {
        let client = self.client.read().await;
        debug!(events = request.events.len(), "RemoteSyncService::sync_to");
        client.sync_to(request).await.context("SyncTo failed")
    }

    async fn sync_from(&self, request: &SyncFromRequest) -> Result<SyncResponse> {
        let client = self.client.read().await;
        debug!("RemoteSyncService::sync_from");
        client.sync_from(request).await.context("SyncFrom failed")
    }

    async fn download(&self, storage_key: &str) -> Result<Vec<u8>> {
        let client = self.client.read().await;
        debug!(storage_key, "RemoteSyncService::download");
        client
            .download(storage_key)
            .await
            .with_context(|| format!("Download of {storage_key} failed"))
    }
}
