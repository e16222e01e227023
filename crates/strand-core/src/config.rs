//! Configuration management for Strand
//!
//! Settings come from `strand.toml` (every field has a default) and are then
//! overlaid with the environment variables the dashboard build reads.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, StrandError};

/// Backend base URL
pub const ENV_API_URL: &str = "VITE_API_URL";
/// Static bearer token override
pub const ENV_ACCESS_TOKEN: &str = "VITE_ACCESS_TOKEN";
/// Enables the local token-entry bypass
pub const ENV_LOCAL_DEVELOPMENT: &str = "VITE_LOCAL_DEVELOPMENT";

const CONFIG_FILE: &str = "strand.toml";

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrandConfig {
    /// Backend base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Dashboard base URL; return and error redirects resolve against it
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// Static bearer token; when absent requests go out unauthenticated
    #[serde(default)]
    pub access_token: Option<String>,

    /// Allow pasting a token instead of running OAuth for selected sources
    #[serde(default)]
    pub local_development: bool,

    /// Sources that accept the local token bypass
    #[serde(default = "default_local_token_sources")]
    pub local_token_sources: Vec<String>,

    #[serde(default)]
    pub subscription: SubscriptionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Sync-progress subscription settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Updates retained per subscription (oldest evicted first)
    #[serde(default = "default_max_updates")]
    pub max_updates: usize,

    /// Reconnect attempts after a retryable failure or unexpected close
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// TTLs for the cached stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_usage_ttl_secs")]
    pub usage_ttl_secs: u64,

    #[serde(default = "default_auth_providers_ttl_secs")]
    pub auth_providers_ttl_secs: u64,

    #[serde(default = "default_organizations_ttl_secs")]
    pub organizations_ttl_secs: u64,
}

/// Where the persisted local/session storage files live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

fn default_api_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_app_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_local_token_sources() -> Vec<String> {
    vec!["slack".to_string()]
}

fn default_max_updates() -> usize {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_usage_ttl_secs() -> u64 {
    30
}

fn default_auth_providers_ttl_secs() -> u64 {
    60
}

fn default_organizations_ttl_secs() -> u64 {
    300
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".strand")
}

impl StrandConfig {
    /// Load `strand.toml` from `dir` or fall back to defaults
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| StrandError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Write the default configuration to `dir/strand.toml`
    pub fn write_default(dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| StrandError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Overlay process environment variables
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables from an arbitrary lookup (used by tests)
    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_url = url;
        }
        if let Some(token) = lookup(ENV_ACCESS_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.access_token = Some(token);
        }
        if let Some(flag) = lookup(ENV_LOCAL_DEVELOPMENT) {
            self.local_development = parse_flag(&flag);
        }
        self
    }

    /// Base URL without a trailing slash
    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// Whether `short_name` may use the pasted-token bypass
    pub fn allows_local_token(&self, short_name: &str) -> bool {
        self.local_development
            && self
                .local_token_sources
                .iter()
                .any(|s| s.eq_ignore_ascii_case(short_name))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl SubscriptionConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl CacheConfig {
    pub fn usage_ttl(&self) -> Duration {
        Duration::from_secs(self.usage_ttl_secs)
    }

    pub fn auth_providers_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_providers_ttl_secs)
    }

    pub fn organizations_ttl(&self) -> Duration {
        Duration::from_secs(self.organizations_ttl_secs)
    }
}

impl Default for StrandConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            app_url: default_app_url(),
            access_token: None,
            local_development: false,
            local_token_sources: default_local_token_sources(),
            subscription: SubscriptionConfig::default(),
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_updates: default_max_updates(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            usage_ttl_secs: default_usage_ttl_secs(),
            auth_providers_ttl_secs: default_auth_providers_ttl_secs(),
            organizations_ttl_secs: default_organizations_ttl_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}
