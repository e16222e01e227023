//! Connection-flow orchestrator
//!
//! Turns a connect request into backend calls: either a direct collection and
//! source-connection creation, or an OAuth hand-off whose state is stashed in
//! storage for [`OAuthCallback`](crate::OAuthCallback) to pick up. The
//! orchestrator never navigates; it returns what the caller should do next.

use strand_api::ApiClient;
use strand_core::storage::keys;
use strand_core::{
    generate_readable_id, random_suffix, validate_collection_details, AuthFieldValues,
    BrowserStorage, Collection, CollectionDetails, CreateSourceConnection, Result, SourceConnection,
    SourceDetails, StrandError,
};
use tracing::{debug, info};

use crate::decision::{decide, ConnectPath};
use crate::options::FlowOptions;
use crate::redirect::{redirect_with_error, ErrorRedirect};

/// Auth field carrying a pasted local-development token
pub const LOCAL_TOKEN_FIELD: &str = "access_token";

/// Everything needed to connect one source into one collection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub source_short_name: String,
    /// Fetched from the backend when absent
    pub source_details: Option<SourceDetails>,
    pub collection: CollectionDetails,
    /// Creating a collection that must not exist yet
    pub is_new_collection: bool,
    pub auth_fields: Option<AuthFieldValues>,
    pub connection_name: Option<String>,
    pub local_token: Option<String>,
    pub return_url: Option<String>,
}

impl ConnectRequest {
    pub fn new(source_short_name: impl Into<String>, collection: CollectionDetails) -> Self {
        Self {
            source_short_name: source_short_name.into(),
            source_details: None,
            collection,
            is_new_collection: false,
            auth_fields: None,
            connection_name: None,
            local_token: None,
            return_url: None,
        }
    }

    pub fn with_source(mut self, source: SourceDetails) -> Self {
        self.source_details = Some(source);
        self
    }

    pub fn new_collection(mut self, is_new: bool) -> Self {
        self.is_new_collection = is_new;
        self
    }

    pub fn with_auth_fields(mut self, fields: AuthFieldValues) -> Self {
        self.auth_fields = Some(fields);
        self
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    pub fn with_local_token(mut self, token: impl Into<String>) -> Self {
        self.local_token = Some(token.into());
        self
    }

    pub fn with_return_url(mut self, url: impl Into<String>) -> Self {
        self.return_url = Some(url.into());
        self
    }
}

/// What the caller should do after a successful run
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// Send the user to the identity provider
    OAuthRedirect { auth_url: String },
    /// The source connection exists and its first sync was requested
    Connected {
        collection: Collection,
        source_connection: SourceConnection,
    },
}

pub struct ConnectFlow {
    api: ApiClient,
    storage: BrowserStorage,
    options: FlowOptions,
}

impl ConnectFlow {
    pub fn new(api: ApiClient, storage: BrowserStorage, options: FlowOptions) -> Self {
        Self {
            api,
            storage,
            options,
        }
    }

    pub fn options(&self) -> &FlowOptions {
        &self.options
    }

    /// Run the flow, turning any failure into an error redirect
    pub async fn run(&self, request: &ConnectRequest) -> std::result::Result<ConnectOutcome, ErrorRedirect> {
        match self.execute(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.redirect_with_error(&e, &request.source_short_name)),
        }
    }

    pub fn redirect_with_error(&self, err: &StrandError, source_name: &str) -> ErrorRedirect {
        redirect_with_error(&self.storage, &self.options, err, source_name)
    }

    /// Run the flow, returning failures as errors
    pub async fn execute(&self, request: &ConnectRequest) -> Result<ConnectOutcome> {
        check_collection(&request.collection)?;

        let source = self.resolve_source(request).await?;
        let path = decide(&source, request, &self.options)?;
        info!("Connecting {} ({})", source.short_name, path);

        match path {
            ConnectPath::OAuthRedirect => self.start_oauth(&source, request).await,
            ConnectPath::Direct => {
                self.connect_direct(&source, request, request.auth_fields.clone())
                    .await
            }
            ConnectPath::LocalToken => {
                let mut fields = request.auth_fields.clone().unwrap_or_default();
                if let Some(token) = &request.local_token {
                    fields.insert(LOCAL_TOKEN_FIELD, token.trim());
                }
                self.connect_direct(&source, request, Some(fields)).await
            }
        }
    }

    /// Reuse or create the target collection
    pub async fn ensure_collection(&self, details: &CollectionDetails, is_new: bool) -> Result<Collection> {
        ensure_collection(&self.api, details, is_new).await
    }

    async fn resolve_source(&self, request: &ConnectRequest) -> Result<SourceDetails> {
        match &request.source_details {
            Some(source) => Ok(source.clone()),
            None => self.api.get_source(&request.source_short_name).await,
        }
    }

    async fn start_oauth(&self, source: &SourceDetails, request: &ConnectRequest) -> Result<ConnectOutcome> {
        let collection = with_readable_id(&request.collection);
        check_collection(&collection)?;
        let auth_fields = request.auth_fields.as_ref().filter(|f| !f.is_empty());

        // Everything the callback needs must be stored before the redirect
        if let Some(fields) = auth_fields {
            self.storage
                .put_session(&keys::oauth_config(&source.short_name), fields)?;
        }
        self.storage
            .put_local(keys::OAUTH_COLLECTION_DETAILS, &collection)?;
        if let Some(readable_id) = &collection.readable_id {
            self.storage.put_local(keys::OAUTH_COLLECTION_ID, readable_id)?;
        }
        self.storage
            .put_session(keys::OAUTH_IS_NEW_COLLECTION, &request.is_new_collection)?;
        let return_url = request
            .return_url
            .clone()
            .unwrap_or_else(|| self.options.default_return_url());
        self.storage.put_local(keys::OAUTH_RETURN_URL, &return_url)?;

        let auth_url = self
            .api
            .oauth_auth_url(&source.short_name, auth_fields)
            .await?;
        info!("Redirecting to {} authorization", source.display_name());
        Ok(ConnectOutcome::OAuthRedirect { auth_url })
    }

    async fn connect_direct(
        &self,
        source: &SourceDetails,
        request: &ConnectRequest,
        auth_fields: Option<AuthFieldValues>,
    ) -> Result<ConnectOutcome> {
        let collection = self
            .ensure_collection(&with_readable_id(&request.collection), request.is_new_collection)
            .await?;

        let create = CreateSourceConnection {
            name: request
                .connection_name
                .clone()
                .unwrap_or_else(|| default_connection_name(source.display_name())),
            short_name: source.short_name.clone(),
            collection: collection.readable_id.clone(),
            auth_fields: auth_fields.filter(|f| !f.is_empty()),
            credential_id: None,
            sync_immediately: true,
        };
        let source_connection = self.api.create_source_connection(&create).await?;
        remember_connection(&self.storage, &source_connection)?;

        Ok(ConnectOutcome::Connected {
            collection,
            source_connection,
        })
    }
}

impl std::fmt::Debug for ConnectFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectFlow")
            .field("api", &self.api)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Reuse an existing collection or create it.
///
/// A supplied readable id that already exists is reused, unless the caller
/// asked for a new collection, in which case the collision is an error.
pub(crate) async fn ensure_collection(
    api: &ApiClient,
    details: &CollectionDetails,
    is_new: bool,
) -> Result<Collection> {
    let details = with_readable_id(details);
    check_collection(&details)?;
    let readable_id = details.readable_id.as_deref().unwrap_or_default();

    match api.find_collection(readable_id).await? {
        Some(_) if is_new => Err(StrandError::CollectionExists(readable_id.to_string())),
        Some(existing) => {
            info!("Reusing collection {}", existing.readable_id);
            Ok(existing)
        }
        None => api.create_collection(&details).await,
    }
}

pub(crate) fn remember_connection(storage: &BrowserStorage, connection: &SourceConnection) -> Result<()> {
    debug!("Remembering source connection {}", connection.id);
    storage.put_session(keys::LAST_CREATED_SOURCE_CONNECTION, connection)
}

pub(crate) fn default_connection_name(source_name: &str) -> String {
    format!("{} Connection", source_name)
}

fn check_collection(details: &CollectionDetails) -> Result<()> {
    let errors = validate_collection_details(details);
    if errors.is_empty() {
        return Ok(());
    }
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    Err(StrandError::Validation(messages.join("; ")))
}

/// Fill in a readable id derived from the name when none was chosen
fn with_readable_id(details: &CollectionDetails) -> CollectionDetails {
    let mut details = details.clone();
    if details.readable_id.is_none() {
        details.readable_id = Some(generate_readable_id(&details.name, &random_suffix()));
    }
    details
}
