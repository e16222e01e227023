//! Bearer-token acquisition and caching
//!
//! One [`TokenCache`] is shared by the REST client and every event-stream
//! client. A 401/403 anywhere clears it, so the next consumer fetches a
//! fresh token from the underlying [`TokenSource`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strand_core::{Result, StrandConfig};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Where fresh tokens come from
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a token; `None` means requests go out unauthenticated
    async fn fetch_token(&self) -> Result<Option<String>>;
}

/// A fixed token (e.g. `VITE_ACCESS_TOKEN`)
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch_token(&self) -> Result<Option<String>> {
        Ok(Some(self.token.clone()))
    }
}

/// No authentication (backends running with auth disabled)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl TokenSource for NoAuth {
    async fn fetch_token(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Token source for tests: hands out `token-1`, `token-2`, ... and counts fetches
#[derive(Debug, Default)]
pub struct MockTokenSource {
    fetches: AtomicU64,
}

impl MockTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for MockTokenSource {
    async fn fetch_token(&self) -> Result<Option<String>> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(format!("token-{}", n)))
    }
}

/// Pick the token source for a configuration
///
/// Priority:
/// 1. `access_token` (file or `VITE_ACCESS_TOKEN`)
/// 2. unauthenticated
pub fn token_source_from_config(config: &StrandConfig) -> Arc<dyn TokenSource> {
    match &config.access_token {
        Some(token) => {
            info!("Using static access token");
            Arc::new(StaticTokenSource::new(token.clone()))
        }
        None => {
            info!("No access token configured; requests are unauthenticated");
            Arc::new(NoAuth)
        }
    }
}

/// Cached bearer token shared across clients
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    cached: Mutex<Option<String>>,
    fetch_count: AtomicU64,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Cached token, or a fresh one when the cache is empty.
    ///
    /// Concurrent callers wait on the same refresh.
    pub async fn get_token(&self) -> Result<Option<String>> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(Some(token.clone()));
        }

        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        debug!("Fetching fresh access token");
        let token = self.source.fetch_token().await?;
        cached.clone_from(&token);
        Ok(token)
    }

    /// Drop the cached token so the next consumer refreshes
    pub async fn clear(&self) {
        let mut cached = self.cached.lock().await;
        if cached.take().is_some() {
            info!("Cleared cached access token");
        }
    }

    /// Number of fetches issued against the source
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("fetch_count", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_is_cached() {
        let cache = TokenCache::new(Arc::new(MockTokenSource::new()));
        assert_eq!(cache.get_token().await.unwrap().as_deref(), Some("token-1"));
        assert_eq!(cache.get_token().await.unwrap().as_deref(), Some("token-1"));
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_forces_refresh() {
        let cache = TokenCache::new(Arc::new(MockTokenSource::new()));
        cache.get_token().await.unwrap();
        cache.clear().await;
        assert_eq!(cache.get_token().await.unwrap().as_deref(), Some("token-2"));
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_no_auth_refetches_each_time() {
        let cache = TokenCache::new(Arc::new(NoAuth));
        assert!(cache.get_token().await.unwrap().is_none());
        assert!(cache.get_token().await.unwrap().is_none());
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_source_from_config() {
        let mut config = StrandConfig::default();
        let source = token_source_from_config(&config);
        assert!(source.fetch_token().await.unwrap().is_none());

        config.access_token = Some("abc".to_string());
        let source = token_source_from_config(&config);
        assert_eq!(source.fetch_token().await.unwrap().as_deref(), Some("abc"));
    }
}
