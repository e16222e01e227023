//! Flow settings derived from `StrandConfig`

use strand_api::Url;
use strand_core::{Result, StrandConfig, StrandError};

/// Where the dashboard lands after a finished or failed connection
pub const DASHBOARD_PATH: &str = "/dashboard";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOptions {
    /// Local token bypass enabled
    pub local_development: bool,
    /// Sources that may use the bypass
    pub local_token_sources: Vec<String>,
    /// Dashboard base URL for return and error links
    pub app_url: String,
}

impl FlowOptions {
    pub fn from_config(config: &StrandConfig) -> Self {
        Self {
            local_development: config.local_development,
            local_token_sources: config.local_token_sources.clone(),
            app_url: config.app_url.clone(),
        }
    }

    pub fn allows_local_token(&self, short_name: &str) -> bool {
        self.local_development
            && self
                .local_token_sources
                .iter()
                .any(|s| s.eq_ignore_ascii_case(short_name))
    }

    /// Absolute dashboard link for `path` with encoded query pairs
    pub fn app_link(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let base = Url::parse(&self.app_url)
            .map_err(|e| StrandError::Config(format!("Invalid app URL '{}': {}", self.app_url, e)))?;
        let mut url = base
            .join(path)
            .map_err(|e| StrandError::Config(format!("Invalid app path '{}': {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Return URL used when the caller supplies none
    pub fn default_return_url(&self) -> String {
        self.app_link(DASHBOARD_PATH, &[])
            .map(|url| url.to_string())
            .unwrap_or_else(|_| DASHBOARD_PATH.to_string())
    }
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self::from_config(&StrandConfig::default())
    }
}
