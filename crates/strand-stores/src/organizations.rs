//! Organization list and the user's current selection

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use strand_api::ApiClient;
use strand_core::storage::keys;
use strand_core::{BrowserStorage, CreateOrganization, Organization, Result, StrandError};
use tracing::{info, warn};

use crate::ttl::TtlCache;
use crate::usage::UsageStore;

pub struct OrganizationStore {
    api: ApiClient,
    storage: BrowserStorage,
    organizations: TtlCache<Vec<Organization>>,
    current: Mutex<Option<String>>,
    usage: Arc<UsageStore>,
}

impl OrganizationStore {
    /// Restores the persisted selection; an unreadable one is discarded
    pub fn new(api: ApiClient, storage: BrowserStorage, ttl: Duration, usage: Arc<UsageStore>) -> Self {
        let current = match storage.get_local::<String>(keys::CURRENT_ORGANIZATION_ID) {
            Ok(current) => current,
            Err(e) => {
                warn!("Ignoring stored organization: {}", e);
                None
            }
        };
        Self {
            api,
            storage,
            organizations: TtlCache::new(ttl),
            current: Mutex::new(current),
            usage,
        }
    }

    /// Organizations the user belongs to.
    ///
    /// Selects the primary (or first) organization when nothing valid is
    /// selected yet.
    pub async fn organizations(&self, force: bool) -> Result<Vec<Organization>> {
        let organizations = self
            .organizations
            .get_or_fetch(force, || self.api.list_organizations())
            .await?;

        let current = self.current_organization_id();
        let selected_exists = current
            .as_deref()
            .is_some_and(|id| organizations.iter().any(|o| o.id == id));
        if !selected_exists {
            let fallback = organizations
                .iter()
                .find(|o| o.is_primary)
                .or_else(|| organizations.first());
            if let Some(org) = fallback {
                info!("Selecting organization {}", org.name);
                self.select(&org.id)?;
            }
        }
        Ok(organizations)
    }

    pub fn current_organization_id(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn current_organization(&self) -> Result<Option<Organization>> {
        let organizations = self.organizations(false).await?;
        let current = self.current_organization_id();
        Ok(organizations
            .into_iter()
            .find(|o| Some(&o.id) == current.as_ref()))
    }

    /// Switch to another organization.
    ///
    /// Usage checks belong to the previous organization and are cleared.
    pub async fn switch_organization(&self, id: &str) -> Result<Organization> {
        let organizations = self.organizations(false).await?;
        let org = organizations
            .into_iter()
            .find(|o| o.id == id)
            .ok_or_else(|| StrandError::NotFound(format!("organization {}", id)))?;

        self.select(&org.id)?;
        self.usage.clear();
        info!("Switched to organization {}", org.name);
        Ok(org)
    }

    /// Create an organization and switch to it
    pub async fn create_organization(&self, request: &CreateOrganization) -> Result<Organization> {
        let org = self.api.create_organization(request).await?;
        info!("Created organization {}", org.name);

        if let Some(mut organizations) = self.organizations.peek().await {
            organizations.push(org.clone());
            self.organizations.set(organizations).await;
        }

        self.select(&org.id)?;
        self.usage.clear();
        Ok(org)
    }

    fn select(&self, id: &str) -> Result<()> {
        self.storage
            .put_local(keys::CURRENT_ORGANIZATION_ID, &id)?;
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.to_string());
        Ok(())
    }
}
