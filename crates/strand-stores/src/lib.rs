//! # strand-stores
//!
//! Client-side state over backend responses: TTL-cached lists with in-flight
//! deduplication, plus the side panel UI state. Each store owns its slice;
//! the only cross-store effect (switching organization clears usage checks)
//! is an explicit call.

mod auth_providers;
mod organizations;
mod side_panel;
mod ttl;
mod usage;

pub use auth_providers::AuthProviderStore;
pub use organizations::OrganizationStore;
pub use side_panel::{PanelContext, SidePanelState, SidePanelStore, SidePanelView};
pub use ttl::{KeyedTtlCache, TtlCache};
pub use usage::UsageStore;

use std::sync::Arc;
use strand_api::ApiClient;
use strand_core::{BrowserStorage, CacheConfig};

/// Every store, wired together
pub struct Stores {
    pub organizations: OrganizationStore,
    pub auth_providers: AuthProviderStore,
    pub usage: Arc<UsageStore>,
    pub side_panel: SidePanelStore,
}

impl Stores {
    pub fn new(api: ApiClient, storage: BrowserStorage, cache: &CacheConfig) -> Self {
        let usage = Arc::new(UsageStore::new(api.clone(), cache.usage_ttl()));
        Self {
            organizations: OrganizationStore::new(
                api.clone(),
                storage,
                cache.organizations_ttl(),
                Arc::clone(&usage),
            ),
            auth_providers: AuthProviderStore::new(api, cache.auth_providers_ttl()),
            usage,
            side_panel: SidePanelStore::new(),
        }
    }
}
