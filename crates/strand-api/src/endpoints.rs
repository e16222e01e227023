//! Typed endpoint methods

use serde::{Deserialize, Serialize};
use strand_core::{
    ActionCheckRequest, ActionCheckResponse, ApiKey, AuthFieldValues, AuthProvider,
    AuthProviderConnection, Collection, CollectionDetails, CreateApiKey,
    CreateAuthProviderConnection, CreateOrganization, CreateSourceConnection,
    IntegrationCredential, Organization, Result, SourceConnection, SourceDetails, StrandError,
    SyncJob,
};
use tracing::info;

use crate::client::ApiClient;

/// Request body for `POST /collections/`
pub type CreateCollection = CollectionDetails;

/// Request body for `POST /connections/oauth2/source/code`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthCodeExchange {
    pub short_name: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_fields: Option<AuthFieldValues>,
}

impl ApiClient {
    // Collections

    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        self.get("/collections/").await
    }

    pub async fn get_collection(&self, readable_id: &str) -> Result<Collection> {
        self.get(&format!("/collections/{}", readable_id)).await
    }

    pub async fn create_collection(&self, details: &CreateCollection) -> Result<Collection> {
        let collection: Collection = self.post("/collections/", details).await?;
        info!("Created collection {}", collection.readable_id);
        Ok(collection)
    }

    /// Look a collection up, mapping 404 to `None`
    pub async fn find_collection(&self, readable_id: &str) -> Result<Option<Collection>> {
        match self.get_collection(readable_id).await {
            Ok(collection) => Ok(Some(collection)),
            Err(StrandError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // Source catalogue

    pub async fn list_sources(&self) -> Result<Vec<SourceDetails>> {
        self.get("/sources/list").await
    }

    pub async fn get_source(&self, short_name: &str) -> Result<SourceDetails> {
        self.get(&format!("/sources/detail/{}", short_name)).await
    }

    // Source connections

    pub async fn list_source_connections(&self, collection: Option<&str>) -> Result<Vec<SourceConnection>> {
        match collection {
            Some(readable_id) => {
                self.get_with_query("/source-connections/", &[("collection", readable_id)])
                    .await
            }
            None => self.get("/source-connections/").await,
        }
    }

    pub async fn get_source_connection(&self, id: &str) -> Result<SourceConnection> {
        self.get(&format!("/source-connections/{}", id)).await
    }

    pub async fn create_source_connection(&self, request: &CreateSourceConnection) -> Result<SourceConnection> {
        let connection: SourceConnection = self.post("/source-connections/", request).await?;
        info!(
            "Created source connection {} ({}) in {}",
            connection.id, request.short_name, request.collection
        );
        Ok(connection)
    }

    /// Trigger a sync run for a source connection
    pub async fn run_source_connection(&self, id: &str) -> Result<SyncJob> {
        self.post(&format!("/source-connections/{}/run", id), &serde_json::json!({}))
            .await
    }

    pub async fn source_connection_jobs(&self, id: &str) -> Result<Vec<SyncJob>> {
        self.get(&format!("/source-connections/{}/jobs", id)).await
    }

    // Sync jobs

    pub async fn sync_jobs(&self, sync_id: &str) -> Result<Vec<SyncJob>> {
        self.get(&format!("/sync/{}/jobs", sync_id)).await
    }

    // OAuth2

    /// Authorization URL for a source, optionally carrying pre-collected fields
    pub async fn oauth_auth_url(&self, short_name: &str, auth_fields: Option<&AuthFieldValues>) -> Result<String> {
        let encoded = match auth_fields {
            Some(fields) if !fields.is_empty() => Some(serde_json::to_string(fields)?),
            _ => None,
        };

        let mut query = vec![("short_name", short_name)];
        if let Some(encoded) = &encoded {
            query.push(("auth_fields", encoded.as_str()));
        }

        let url: String = self
            .get_with_query("/connections/oauth2/source/auth_url", &query)
            .await?;
        if url.trim().is_empty() {
            return Err(StrandError::InvalidResponse(format!(
                "Empty authorization URL for {}",
                short_name
            )));
        }
        Ok(url)
    }

    /// Exchange an authorization code for a stored credential
    pub async fn exchange_oauth_code(&self, request: &OAuthCodeExchange) -> Result<IntegrationCredential> {
        self.post("/connections/oauth2/source/code", request).await
    }

    // Auth providers

    pub async fn list_auth_providers(&self) -> Result<Vec<AuthProvider>> {
        self.get("/auth-providers/list").await
    }

    pub async fn list_auth_provider_connections(&self) -> Result<Vec<AuthProviderConnection>> {
        self.get("/auth-providers/connections/").await
    }

    pub async fn get_auth_provider_connection(&self, readable_id: &str) -> Result<AuthProviderConnection> {
        self.get(&format!("/auth-providers/connections/{}", readable_id))
            .await
    }

    pub async fn create_auth_provider_connection(
        &self,
        request: &CreateAuthProviderConnection,
    ) -> Result<AuthProviderConnection> {
        self.post("/auth-providers/", request).await
    }

    // Organizations

    pub async fn list_organizations(&self) -> Result<Vec<Organization>> {
        self.get("/organizations").await
    }

    pub async fn create_organization(&self, request: &CreateOrganization) -> Result<Organization> {
        self.post("/organizations", request).await
    }

    // API keys

    pub async fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
        self.get("/api-keys").await
    }

    pub async fn create_api_key(&self, request: &CreateApiKey) -> Result<ApiKey> {
        self.post("/api-keys", request).await
    }

    pub async fn delete_api_key(&self, id: &str) -> Result<()> {
        self.delete("/api-keys", &[("id", id)]).await
    }

    // Usage

    pub async fn check_actions(&self, request: &ActionCheckRequest) -> Result<ActionCheckResponse> {
        self.post("/usage/check-actions", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MockTokenSource, TokenCache};
    use crate::mock::MockTransport;
    use crate::transport::Method;
    use serde_json::json;
    use std::sync::Arc;

    fn client(transport: &Arc<MockTransport>) -> ApiClient {
        let tokens = Arc::new(TokenCache::new(Arc::new(MockTokenSource::new())));
        ApiClient::new("http://api.test", Arc::clone(transport) as _, tokens).unwrap()
    }

    #[tokio::test]
    async fn test_find_collection_maps_not_found() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_status(Method::Get, "/collections/docs-abc123", 404);
        transport.respond_json(
            Method::Get,
            "/collections/docs-abc123",
            200,
            json!({"id": "1", "name": "Docs", "readable_id": "docs-abc123"}),
        );
        let client = client(&transport);

        assert!(client.find_collection("docs-abc123").await.unwrap().is_none());
        let found = client.find_collection("docs-abc123").await.unwrap().unwrap();
        assert_eq!(found.name, "Docs");
    }

    #[tokio::test]
    async fn test_auth_url_query() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::Get,
            "/connections/oauth2/source/auth_url",
            200,
            json!("https://idp.example/authorize"),
        );
        transport.respond_json(
            Method::Get,
            "/connections/oauth2/source/auth_url",
            200,
            json!("https://idp.example/authorize?x"),
        );
        let client = client(&transport);

        let url = client.oauth_auth_url("notion", None).await.unwrap();
        assert_eq!(url, "https://idp.example/authorize");

        let fields = AuthFieldValues::new().with("client_id", "abc");
        client.oauth_auth_url("gmail", Some(&fields)).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].query("short_name").as_deref(), Some("notion"));
        assert!(requests[0].query("auth_fields").is_none());
        assert_eq!(
            requests[1].query("auth_fields").as_deref(),
            Some("{\"client_id\":\"abc\"}")
        );
    }

    #[tokio::test]
    async fn test_empty_auth_url_rejected() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(Method::Get, "/connections/oauth2/source/auth_url", 200, json!(""));
        let client = client(&transport);
        assert!(matches!(
            client.oauth_auth_url("notion", None).await,
            Err(StrandError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_source_connections_filtered_by_collection() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::Get,
            "/source-connections/",
            200,
            json!([{"id": "sc1", "short_name": "slack", "collection": "docs"}]),
        );
        let client = client(&transport);

        let connections = client.list_source_connections(Some("docs")).await.unwrap();
        assert_eq!(connections[0].short_name, "slack");
        assert_eq!(
            transport.requests()[0].query("collection").as_deref(),
            Some("docs")
        );
    }

    #[tokio::test]
    async fn test_check_actions() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::Post,
            "/usage/check-actions",
            200,
            json!({"results": {"entities": {"allowed": false, "reason": "usage_limit_exceeded"}}}),
        );
        let client = client(&transport);

        let mut request = ActionCheckRequest::default();
        request.actions.insert("entities".to_string(), 1);
        let response = client.check_actions(&request).await.unwrap();
        assert!(!response.results["entities"].allowed);
        assert_eq!(
            transport.requests()[0].body,
            Some(json!({"actions": {"entities": 1}}))
        );
    }
}
