//! Completing a connection after the identity provider redirects back

use strand_api::{ApiClient, OAuthCodeExchange};
use strand_core::storage::keys;
use strand_core::{
    AuthFieldValues, BrowserStorage, Collection, CollectionDetails, CreateSourceConnection,
    IntegrationCredential, Result, SourceConnection, StrandError,
};
use tracing::info;

use crate::flow::{default_connection_name, ensure_collection, remember_connection};
use crate::options::FlowOptions;
use crate::redirect::{redirect_with_error, ErrorRedirect};

/// Records created by a completed callback
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    pub return_url: String,
    pub credential: IntegrationCredential,
    pub collection: Collection,
    pub source_connection: SourceConnection,
}

/// State the connect flow stashed before redirecting
#[derive(Debug, Clone, PartialEq)]
struct StashedFlow {
    collection: CollectionDetails,
    is_new_collection: bool,
    auth_fields: Option<AuthFieldValues>,
    return_url: Option<String>,
}

pub struct OAuthCallback {
    api: ApiClient,
    storage: BrowserStorage,
    options: FlowOptions,
}

impl OAuthCallback {
    pub fn new(api: ApiClient, storage: BrowserStorage, options: FlowOptions) -> Self {
        Self {
            api,
            storage,
            options,
        }
    }

    /// Like [`OAuthCallback::complete`], funnelling failures into an error redirect
    pub async fn run(&self, short_name: &str, code: &str) -> std::result::Result<CallbackOutcome, ErrorRedirect> {
        match self.complete(short_name, code).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(redirect_with_error(&self.storage, &self.options, &e, short_name)),
        }
    }

    /// Exchange `code` and create the source connection the flow was started for
    pub async fn complete(&self, short_name: &str, code: &str) -> Result<CallbackOutcome> {
        if code.trim().is_empty() {
            return Err(StrandError::Validation(
                "authorization code must not be empty".to_string(),
            ));
        }

        let stashed = self.take_stash(short_name)?;

        let credential = self
            .api
            .exchange_oauth_code(&OAuthCodeExchange {
                short_name: short_name.to_string(),
                code: code.to_string(),
                auth_fields: stashed.auth_fields.clone(),
            })
            .await?;
        info!("Received {} credential {}", short_name, credential.id);

        let collection =
            ensure_collection(&self.api, &stashed.collection, stashed.is_new_collection).await?;

        let create = CreateSourceConnection {
            name: default_connection_name(short_name),
            short_name: short_name.to_string(),
            collection: collection.readable_id.clone(),
            auth_fields: None,
            credential_id: Some(credential.id.clone()),
            sync_immediately: true,
        };
        let source_connection = self.api.create_source_connection(&create).await?;
        remember_connection(&self.storage, &source_connection)?;

        Ok(CallbackOutcome {
            return_url: stashed
                .return_url
                .unwrap_or_else(|| self.options.default_return_url()),
            credential,
            collection,
            source_connection,
        })
    }

    /// Read and clear every stashed value, even when one fails to decode
    fn take_stash(&self, short_name: &str) -> Result<StashedFlow> {
        let auth_fields = self
            .storage
            .take_session::<AuthFieldValues>(&keys::oauth_config(short_name));
        let details = self
            .storage
            .take_local::<CollectionDetails>(keys::OAUTH_COLLECTION_DETAILS);
        let collection_id = self.storage.take_local::<String>(keys::OAUTH_COLLECTION_ID);
        let is_new = self.storage.take_session::<bool>(keys::OAUTH_IS_NEW_COLLECTION);
        let return_url = self.storage.take_local::<String>(keys::OAUTH_RETURN_URL);

        let mut collection = details?.ok_or_else(|| {
            StrandError::Flow(format!(
                "no collection details stored for the {} authorization",
                short_name
            ))
        })?;
        if collection.readable_id.is_none() {
            collection.readable_id = collection_id?;
        }

        Ok(StashedFlow {
            collection,
            is_new_collection: is_new?.unwrap_or(false),
            auth_fields: auth_fields?,
            return_url: return_url?,
        })
    }
}

impl std::fmt::Debug for OAuthCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCallback")
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use strand_api::{Method, MockTokenSource, MockTransport, TokenCache};

    fn callback(transport: &Arc<MockTransport>) -> (OAuthCallback, BrowserStorage) {
        let tokens = Arc::new(TokenCache::new(Arc::new(MockTokenSource::new())));
        let api = ApiClient::new("http://api.test", Arc::clone(transport) as _, tokens).unwrap();
        let storage = BrowserStorage::in_memory();
        (
            OAuthCallback::new(api, storage.clone(), FlowOptions::default()),
            storage,
        )
    }

    fn stash(storage: &BrowserStorage) {
        storage
            .put_local(
                keys::OAUTH_COLLECTION_DETAILS,
                &CollectionDetails::new("Docs").with_readable_id("docs-abc123"),
            )
            .unwrap();
        storage
            .put_session(
                &keys::oauth_config("gmail"),
                &AuthFieldValues::new().with("client_id", "cid"),
            )
            .unwrap();
        storage
            .put_session(keys::OAUTH_IS_NEW_COLLECTION, &true)
            .unwrap();
        storage
            .put_local(keys::OAUTH_RETURN_URL, &"/collections/docs-abc123")
            .unwrap();
    }

    #[tokio::test]
    async fn test_complete_creates_connection_with_credential() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::Post,
            "/connections/oauth2/source/code",
            200,
            json!({"id": "cred-1", "integration_short_name": "gmail"}),
        );
        transport.respond_status(Method::Get, "/collections/docs-abc123", 404);
        transport.respond_json(
            Method::Post,
            "/collections/",
            200,
            json!({"id": "c1", "name": "Docs", "readable_id": "docs-abc123"}),
        );
        transport.respond_json(
            Method::Post,
            "/source-connections/",
            200,
            json!({"id": "sc1", "short_name": "gmail", "collection": "docs-abc123"}),
        );
        let (callback, storage) = callback(&transport);
        stash(&storage);

        let outcome = callback.complete("gmail", "code-xyz").await.unwrap();
        assert_eq!(outcome.return_url, "/collections/docs-abc123");
        assert_eq!(outcome.credential.id, "cred-1");
        assert_eq!(outcome.source_connection.id, "sc1");

        let exchange = transport.requests_to(Method::Post, "/connections/oauth2/source/code")[0]
            .body
            .clone()
            .unwrap();
        assert_eq!(exchange["code"], json!("code-xyz"));
        assert_eq!(exchange["auth_fields"], json!({"client_id": "cid"}));

        let create = transport.requests_to(Method::Post, "/source-connections/")[0]
            .body
            .clone()
            .unwrap();
        assert_eq!(create["credential_id"], json!("cred-1"));
        assert_eq!(create["sync_immediately"], json!(true));

        // The stash is consumed
        assert!(storage
            .get_local::<CollectionDetails>(keys::OAUTH_COLLECTION_DETAILS)
            .unwrap()
            .is_none());
        assert!(storage
            .get_session::<AuthFieldValues>(&keys::oauth_config("gmail"))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_stash_is_flow_error() {
        let transport = Arc::new(MockTransport::new());
        let (callback, _) = callback(&transport);

        let err = callback.complete("gmail", "code").await.unwrap_err();
        assert!(matches!(err, StrandError::Flow(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_code_rejected() {
        let transport = Arc::new(MockTransport::new());
        let (callback, storage) = callback(&transport);
        stash(&storage);

        assert!(matches!(
            callback.complete("gmail", " ").await,
            Err(StrandError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_run_redirects_on_exchange_failure() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_status(Method::Post, "/connections/oauth2/source/code", 400);
        let (callback, storage) = callback(&transport);
        stash(&storage);

        let redirect = callback.run("gmail", "code").await.unwrap_err();
        assert_eq!(redirect.source_name, "gmail");
        assert!(redirect.url.contains("source=gmail"));
    }
}
