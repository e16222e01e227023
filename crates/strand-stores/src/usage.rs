//! Usage-limit checks cached per action set

use std::collections::BTreeMap;
use std::time::Duration;
use strand_api::ApiClient;
use strand_core::{ActionCheck, ActionCheckRequest, ActionCheckResponse, Result};
use tracing::debug;

use crate::ttl::KeyedTtlCache;

pub struct UsageStore {
    api: ApiClient,
    checks: KeyedTtlCache<String, ActionCheckResponse>,
}

impl UsageStore {
    pub fn new(api: ApiClient, ttl: Duration) -> Self {
        Self {
            api,
            checks: KeyedTtlCache::new(ttl),
        }
    }

    /// Check whether `actions` (action name to amount) are allowed
    pub async fn check_actions(&self, actions: &BTreeMap<String, u64>) -> Result<ActionCheckResponse> {
        self.check(actions, false).await
    }

    /// Same as [`UsageStore::check_actions`], bypassing the cache
    pub async fn refresh(&self, actions: &BTreeMap<String, u64>) -> Result<ActionCheckResponse> {
        self.check(actions, true).await
    }

    /// Whether a single unit of `action` is allowed.
    ///
    /// Actions the backend does not report on are allowed.
    pub async fn is_allowed(&self, action: &str) -> Result<bool> {
        Ok(self
            .check_one(action)
            .await?
            .map(|check| check.allowed)
            .unwrap_or(true))
    }

    pub async fn check_one(&self, action: &str) -> Result<Option<ActionCheck>> {
        let actions = BTreeMap::from([(action.to_string(), 1)]);
        let mut response = self.check_actions(&actions).await?;
        Ok(response.results.remove(action))
    }

    /// Drop every cached check
    pub fn clear(&self) {
        debug!("Clearing usage checks");
        self.checks.clear();
    }

    pub fn cached_checks(&self) -> usize {
        self.checks.len()
    }

    async fn check(&self, actions: &BTreeMap<String, u64>, force: bool) -> Result<ActionCheckResponse> {
        let key = action_key(actions);
        self.checks
            .get_or_fetch(&key, force, || async {
                let request = ActionCheckRequest {
                    actions: actions.clone(),
                };
                self.api.check_actions(&request).await
            })
            .await
    }
}

/// Stable cache key: `name:amount` pairs in name order
fn action_key(actions: &BTreeMap<String, u64>) -> String {
    actions
        .iter()
        .map(|(name, amount)| format!("{}:{}", name, amount))
        .collect::<Vec<_>>()
        .join(",")
}
