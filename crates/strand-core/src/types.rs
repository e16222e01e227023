//! Core type definitions for Strand
//!
//! Records exchanged with the data-integration backend. Response records
//! default every optional field so additional or missing server fields never
//! break decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::{Result, StrandError};

/// How a source authenticates.
///
/// Unknown strings are preserved so newer backend variants still round-trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthType {
    #[default]
    None,
    Basic,
    ApiKey,
    ConfigClass,
    /// Any `oauth2*` variant (`oauth2`, `oauth2_with_refresh`, ...)
    OAuth2(String),
    Other(String),
}

impl AuthType {
    pub fn is_oauth2(&self) -> bool {
        matches!(self, Self::OAuth2(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic => "basic",
            Self::ApiKey => "api_key",
            Self::ConfigClass => "config_class",
            Self::OAuth2(variant) | Self::Other(variant) => variant,
        }
    }
}

impl From<String> for AuthType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "none" | "" => Self::None,
            "basic" => Self::Basic,
            "api_key" => Self::ApiKey,
            "config_class" => Self::ConfigClass,
            v if v.starts_with("oauth2") => Self::OAuth2(value),
            _ => Self::Other(value),
        }
    }
}

impl From<AuthType> for String {
    fn from(value: AuthType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One configuration field a source or auth provider declares
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthField {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub secret: bool,
}

impl AuthField {
    /// Human label, falling back to the field name
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFields {
    #[serde(default)]
    pub fields: Vec<AuthField>,
}

/// Descriptor of an integration type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDetails {
    pub short_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub auth_fields: Option<AuthFields>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl SourceDetails {
    pub fn new(short_name: impl Into<String>, auth_type: AuthType) -> Self {
        let short_name = short_name.into();
        Self {
            name: short_name.clone(),
            short_name,
            auth_type,
            ..Default::default()
        }
    }

    pub fn with_field(mut self, field: AuthField) -> Self {
        self.auth_fields
            .get_or_insert_with(AuthFields::default)
            .fields
            .push(field);
        self
    }

    pub fn fields(&self) -> &[AuthField] {
        self.auth_fields
            .as_ref()
            .map(|f| f.fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &AuthField> {
        self.fields().iter().filter(|f| f.required)
    }

    /// Whether a configuration wizard must run before direct creation
    pub fn requires_configuration(&self) -> bool {
        self.required_fields().next().is_some()
    }

    /// Display name, falling back to the short name
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.short_name
        } else {
            &self.name
        }
    }
}

/// Values collected for a source's auth fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthFieldValues(pub serde_json::Map<String, serde_json::Value>);

impl AuthFieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names of required fields that are absent or blank
    pub fn missing_required(&self, source: &SourceDetails) -> Vec<String> {
        source
            .required_fields()
            .filter(|field| match self.0.get(&field.name) {
                None | Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(|field| field.name.clone())
            .collect()
    }
}

/// Name and optional slug for a collection being created or targeted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDetails {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readable_id: Option<String>,
}

impl CollectionDetails {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            readable_id: None,
        }
    }

    pub fn with_readable_id(mut self, readable_id: impl Into<String>) -> Self {
        self.readable_id = Some(readable_id.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub readable_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConnection {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sync_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Request body for `POST /source-connections/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSourceConnection {
    pub name: String,
    pub short_name: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_fields: Option<AuthFieldValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    pub sync_immediately: bool,
}

/// Sync job lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for SyncJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    #[serde(default)]
    pub sync_id: Option<String>,
    #[serde(default)]
    pub status: SyncJobStatus,
    #[serde(default)]
    pub entities_inserted: Option<u64>,
    #[serde(default)]
    pub entities_updated: Option<u64>,
    #[serde(default)]
    pub entities_deleted: Option<u64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Progress record pushed over the sync event stream.
///
/// Known counters and flags are typed; every other key lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kept: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities_encountered: Option<u64>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub is_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SyncUpdate {
    /// Parse one event-stream frame, rejecting anything that is not a JSON
    /// object with well-typed known fields.
    pub fn from_frame(data: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| StrandError::MalformedUpdate(format!("invalid JSON: {}", e)))?;

        if !value.is_object() {
            return Err(StrandError::MalformedUpdate(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        }

        serde_json::from_value(value).map_err(|e| StrandError::MalformedUpdate(e.to_string()))
    }

    /// Whether the job reached a final state
    pub fn is_terminal(&self) -> bool {
        self.is_complete || self.is_failed
    }

    /// Sum of the entity counters present on this update
    pub fn processed(&self) -> u64 {
        [
            self.inserted,
            self.updated,
            self.deleted,
            self.kept,
            self.skipped,
        ]
        .iter()
        .flatten()
        .sum()
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Credential returned by the OAuth2 code exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationCredential {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub integration_short_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An auth provider type (e.g. Composio, Pipedream) users can connect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProvider {
    pub short_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub auth_fields: Option<AuthFields>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProviderConnection {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub readable_id: String,
    pub short_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAuthProviderConnection {
    pub name: String,
    pub readable_id: String,
    pub short_name: String,
    pub auth_fields: AuthFieldValues,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    #[serde(default)]
    pub decrypted_key: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateApiKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_days: Option<u32>,
}

/// Whether a billable action is currently permitted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionCheck {
    pub allowed: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionCheckRequest {
    pub actions: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionCheckResponse {
    #[serde(default)]
    pub results: HashMap<String, ActionCheck>,
}
