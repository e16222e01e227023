//! JSON REST client with bearer-token injection
//!
//! Transport-level retries are deliberately absent: a 401/403 clears the
//! shared token and surfaces as `Unauthorized`, leaving retry decisions to
//! the caller.

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use strand_core::{Result, StrandConfig, StrandError};
use tracing::{debug, warn};

use crate::auth::{token_source_from_config, TokenCache};
use crate::transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};

/// Client for the backend REST API
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenCache>,
}

impl ApiClient {
    /// Create a client against `base_url`
    pub fn new(base_url: &str, transport: Arc<dyn Transport>, tokens: Arc<TokenCache>) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| StrandError::Config(format!("Invalid API URL '{}': {}", base_url, e)))?;

        Ok(Self {
            base_url,
            transport,
            tokens,
        })
    }

    /// Real HTTP client configured from `StrandConfig`
    pub fn from_config(config: &StrandConfig) -> Result<Self> {
        let tokens = Arc::new(TokenCache::new(token_source_from_config(config)));
        Self::new(config.api_base(), Arc::new(ReqwestTransport::new()), tokens)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn tokens(&self) -> Arc<TokenCache> {
        Arc::clone(&self.tokens)
    }

    /// Absolute URL for an API path (`/collections/`)
    pub fn url(&self, path: &str) -> Result<Url> {
        let joined = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        Url::parse(&joined).map_err(|e| StrandError::Other(format!("Invalid URL '{}': {}", joined, e)))
    }

    /// Absolute URL with encoded query parameters
    pub fn url_with_query(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.url(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Attach the bearer token, if one is available
    pub async fn authorize(&self, request: HttpRequest) -> Result<HttpRequest> {
        match self.tokens.get_token().await? {
            Some(token) => Ok(request.with_header("Authorization", format!("Bearer {}", token))),
            None => Ok(request),
        }
    }

    /// Send an authorized request and map error statuses
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = self.authorize(request).await?;
        let method = request.method;
        let path = request.url.path().to_string();
        debug!("{} {}", method, path);

        let response = self.transport.send(request).await?;
        self.check_status(method, &path, response).await
    }

    async fn check_status(&self, method: Method, path: &str, response: HttpResponse) -> Result<HttpResponse> {
        match response.status {
            s if (200..300).contains(&s) => Ok(response),
            401 | 403 => {
                warn!("{} {} rejected with {}; clearing token", method, path, response.status);
                self.tokens.clear().await;
                Err(StrandError::Unauthorized {
                    status: response.status,
                    message: response.text(),
                })
            }
            404 => Err(StrandError::NotFound(path.to_string())),
            status => Err(StrandError::Api {
                status,
                body: response.text(),
            }),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        self.execute(HttpRequest::new(Method::Get, url)).await?.json()
    }

    pub async fn get_with_query<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.url_with_query(path, query)?;
        self.execute(HttpRequest::new(Method::Get, url)).await?.json()
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path)?;
        let request = HttpRequest::new(Method::Post, url).with_json(serde_json::to_value(body)?);
        self.execute(request).await?.json()
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path)?;
        let request = HttpRequest::new(Method::Put, url).with_json(serde_json::to_value(body)?);
        self.execute(request).await?.json()
    }

    /// DELETE, ignoring any response body
    pub async fn delete(&self, path: &str, query: &[(&str, &str)]) -> Result<()> {
        let url = self.url_with_query(path, query)?;
        self.execute(HttpRequest::new(Method::Delete, url)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockTokenSource;
    use crate::mock::MockTransport;
    use serde_json::json;

    fn client(transport: Arc<MockTransport>) -> (ApiClient, Arc<TokenCache>) {
        let tokens = Arc::new(TokenCache::new(Arc::new(MockTokenSource::new())));
        let client = ApiClient::new("http://api.test/", transport, Arc::clone(&tokens)).unwrap();
        (client, tokens)
    }

    #[test]
    fn test_url_building() {
        let (client, _) = client(Arc::new(MockTransport::new()));
        assert_eq!(client.base_url(), "http://api.test");
        assert_eq!(
            client.url("/collections/").unwrap().as_str(),
            "http://api.test/collections/"
        );
        assert_eq!(
            client
                .url_with_query("/x", &[("auth_fields", "{\"a\":\"b c\"}")])
                .unwrap()
                .query(),
            Some("auth_fields=%7B%22a%22%3A%22b+c%22%7D")
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let tokens = Arc::new(TokenCache::new(Arc::new(MockTokenSource::new())));
        assert!(ApiClient::new("not a url", Arc::new(MockTransport::new()), tokens).is_err());
    }

    #[tokio::test]
    async fn test_bearer_header_injected() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(Method::Get, "/collections/", 200, json!([]));
        let (client, _) = client(Arc::clone(&transport));

        let _: Vec<serde_json::Value> = client.get("/collections/").await.unwrap();
        let requests = transport.requests();
        assert_eq!(requests[0].header("Authorization"), Some("Bearer token-1"));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(Method::Post, "/collections/", 200, json!({"ok": true}));
        let (client, _) = client(Arc::clone(&transport));

        let _: serde_json::Value = client
            .post("/collections/", &json!({"name": "Docs"}))
            .await
            .unwrap();
        assert_eq!(transport.requests()[0].body, Some(json!({"name": "Docs"})));
    }

    #[tokio::test]
    async fn test_unauthorized_clears_token() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_status(Method::Get, "/organizations", 401);
        transport.respond_json(Method::Get, "/organizations", 200, json!([]));
        let (client, tokens) = client(Arc::clone(&transport));

        let err = client
            .get::<Vec<serde_json::Value>>("/organizations")
            .await
            .unwrap_err();
        assert!(err.is_auth_failure());

        let _: Vec<serde_json::Value> = client.get("/organizations").await.unwrap();
        assert_eq!(tokens.fetch_count(), 2);
        assert_eq!(
            transport.requests()[1].header("Authorization"),
            Some("Bearer token-2")
        );
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_status(Method::Get, "/missing", 404);
        transport.respond(Method::Get, "/broken", HttpResponse::new(500, "kaboom"));
        let (client, tokens) = client(Arc::clone(&transport));

        assert!(matches!(
            client.get::<serde_json::Value>("/missing").await,
            Err(StrandError::NotFound(_))
        ));
        match client.get::<serde_json::Value>("/broken").await {
            Err(StrandError::Api { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "kaboom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // Non-auth failures keep the token
        assert_eq!(tokens.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_ignores_body() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::Delete, "/api-keys", HttpResponse::new(200, "{\"id\": \"k\"}"));
        let (client, _) = client(Arc::clone(&transport));

        client.delete("/api-keys", &[("id", "k")]).await.unwrap();
        assert_eq!(transport.requests()[0].query("id").as_deref(), Some("k"));
    }
}
