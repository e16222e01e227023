//! Single landing point for failed connection attempts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strand_core::storage::keys;
use strand_core::{BrowserStorage, StrandError};
use tracing::{error, warn};

use crate::options::{FlowOptions, DASHBOARD_PATH};

/// What the error page shows, stored under `connection_error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionErrorDetails {
    pub message: String,
    pub source_name: String,
    /// Whether retrying without changes could succeed
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

/// Redirect instructions for a failed flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRedirect {
    pub message: String,
    pub source_name: String,
    pub url: String,
}

impl std::fmt::Display for ErrorRedirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connecting {} failed: {}", self.source_name, self.message)
    }
}

impl std::error::Error for ErrorRedirect {}

/// Record the failure and build the error-page redirect.
///
/// Never fails itself: a storage or URL problem is logged and the redirect
/// is still produced.
pub fn redirect_with_error(
    storage: &BrowserStorage,
    options: &FlowOptions,
    err: &StrandError,
    source_name: &str,
) -> ErrorRedirect {
    let message = err.to_string();
    error!("Connection flow for {} failed: {}", source_name, message);

    let details = ConnectionErrorDetails {
        message: message.clone(),
        source_name: source_name.to_string(),
        retryable: err.is_retryable(),
        timestamp: Utc::now(),
    };
    if let Err(e) = storage.put_local(keys::CONNECTION_ERROR, &details) {
        warn!("Could not store connection error details: {}", e);
    }

    let query = [
        ("connected", "error"),
        ("source", source_name),
        ("message", message.as_str()),
    ];
    let url = match options.app_link(DASHBOARD_PATH, &query) {
        Ok(url) => url.to_string(),
        Err(e) => {
            warn!("{}", e);
            format!("{}?connected=error", DASHBOARD_PATH)
        }
    };

    ErrorRedirect {
        message,
        source_name: source_name.to_string(),
        url,
    }
}

/// Read back the last stored failure, if any
pub fn last_connection_error(storage: &BrowserStorage) -> strand_core::Result<Option<ConnectionErrorDetails>> {
    storage.get_local(keys::CONNECTION_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_api::Url;

    #[test]
    fn test_redirect_carries_message_and_source() {
        let storage = BrowserStorage::in_memory();
        let err = StrandError::CollectionExists("docs-abc123".to_string());

        let redirect = redirect_with_error(&storage, &FlowOptions::default(), &err, "notion");
        assert_eq!(redirect.source_name, "notion");
        assert_eq!(redirect.message, "Collection 'docs-abc123' already exists");

        let url = Url::parse(&redirect.url).unwrap();
        assert_eq!(url.path(), "/dashboard");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("connected".to_string(), "error".to_string())));
        assert!(pairs.contains(&("source".to_string(), "notion".to_string())));
        assert!(pairs.contains(&("message".to_string(), redirect.message.clone())));

        let stored = last_connection_error(&storage).unwrap().unwrap();
        assert_eq!(stored.source_name, "notion");
        assert!(!stored.retryable);
    }

    #[test]
    fn test_bad_app_url_still_redirects() {
        let options = FlowOptions {
            app_url: "::".to_string(),
            ..FlowOptions::default()
        };
        let redirect = redirect_with_error(
            &BrowserStorage::in_memory(),
            &options,
            &StrandError::Flow("boom".to_string()),
            "slack",
        );
        assert_eq!(redirect.url, "/dashboard?connected=error");
    }
}
