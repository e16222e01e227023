//! Auth providers and the user's connections to them

use std::time::Duration;
use strand_api::ApiClient;
use strand_core::{AuthProvider, AuthProviderConnection, CreateAuthProviderConnection, Result};
use tracing::info;

use crate::ttl::TtlCache;

pub struct AuthProviderStore {
    api: ApiClient,
    providers: TtlCache<Vec<AuthProvider>>,
    connections: TtlCache<Vec<AuthProviderConnection>>,
}

impl AuthProviderStore {
    pub fn new(api: ApiClient, ttl: Duration) -> Self {
        Self {
            api,
            providers: TtlCache::new(ttl),
            connections: TtlCache::new(ttl),
        }
    }

    /// Providers available to connect
    pub async fn providers(&self, force: bool) -> Result<Vec<AuthProvider>> {
        self.providers
            .get_or_fetch(force, || self.api.list_auth_providers())
            .await
    }

    /// Connections the user already made
    pub async fn connections(&self, force: bool) -> Result<Vec<AuthProviderConnection>> {
        self.connections
            .get_or_fetch(force, || self.api.list_auth_provider_connections())
            .await
    }

    pub async fn is_connected(&self, short_name: &str) -> Result<bool> {
        Ok(self
            .connections(false)
            .await?
            .iter()
            .any(|c| c.short_name == short_name))
    }

    /// Full record for one connection, always from the backend
    pub async fn connection_details(&self, readable_id: &str) -> Result<AuthProviderConnection> {
        self.api.get_auth_provider_connection(readable_id).await
    }

    pub async fn create_connection(&self, request: &CreateAuthProviderConnection) -> Result<AuthProviderConnection> {
        let connection = self.api.create_auth_provider_connection(request).await?;
        info!(
            "Connected auth provider {} as {}",
            connection.short_name, connection.readable_id
        );
        self.connections.invalidate().await;
        Ok(connection)
    }
}
