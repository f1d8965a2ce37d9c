//! Process-wide tenant registry
//!
//! Holds one [`TenantConfig`] per tenant id. A pipeline run takes the
//! tenant's run lock for its whole duration, so two runs for the same
//! tenant never interleave their existence checks and creates. Runs for
//! different tenants only share the map lookup.

use super::context::ResolvedResources;
use super::names::TenantNames;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Names and last committed identifiers of one tenant
#[derive(Debug)]
pub struct TenantConfig {
    names: TenantNames,
    run_lock: Mutex<()>,
    resolved: RwLock<ResolvedResources>,
}

impl TenantConfig {
    fn new(names: TenantNames) -> Self {
        Self {
            names,
            run_lock: Mutex::new(()),
            resolved: RwLock::new(ResolvedResources::default()),
        }
    }

    /// Deterministic resource names
    pub fn names(&self) -> &TenantNames {
        &self.names
    }

    /// Wait until no other run for this tenant is in progress
    pub async fn begin_run(&self) -> MutexGuard<'_, ()> {
        self.run_lock.lock().await
    }

    /// Identifiers committed by the last successful run
    pub async fn resolved(&self) -> ResolvedResources {
        self.resolved.read().await.clone()
    }

    /// Replace the committed identifiers
    pub async fn commit(&self, resolved: ResolvedResources) {
        tracing::info!(
            tenant = %self.names.tenant_id,
            agent_id = ?resolved.agent_id,
            agent_alias_id = ?resolved.agent_alias_id,
            "Committed provisioned identifiers"
        );
        *self.resolved.write().await = resolved;
    }
}

/// One [`TenantConfig`] per tenant id
#[derive(Debug)]
pub struct TenantRegistry {
    region: String,
    account_id: String,
    tenants: RwLock<HashMap<String, Arc<TenantConfig>>>,
}

impl TenantRegistry {
    /// Create an empty registry for one region and account
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Return the tenant's config, creating it on first reference
    ///
    /// Repeated calls for the same id return the same instance.
    pub async fn get_or_create(&self, tenant_id: &str) -> Result<Arc<TenantConfig>> {
        if let Some(existing) = self.tenants.read().await.get(tenant_id) {
            return Ok(existing.clone());
        }

        let names = TenantNames::derive(tenant_id, &self.region, &self.account_id)?;
        let mut tenants = self.tenants.write().await;
        let config = tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                tracing::info!(tenant = %tenant_id, "Registered tenant");
                Arc::new(TenantConfig::new(names))
            })
            .clone();
        Ok(config)
    }

    /// Committed identifiers of a tenant, if it is registered
    pub async fn snapshot(&self, tenant_id: &str) -> Option<ResolvedResources> {
        let config = self.tenants.read().await.get(tenant_id).cloned()?;
        Some(config.resolved().await)
    }

    /// Forget a tenant; returns whether it was registered
    ///
    /// Runs already holding the tenant's config finish normally.
    pub async fn evict(&self, tenant_id: &str) -> bool {
        let removed = self.tenants.write().await.remove(tenant_id).is_some();
        if removed {
            tracing::info!(tenant = %tenant_id, "Evicted tenant");
        }
        removed
    }

    /// Ids of every registered tenant, sorted
    pub async fn tenant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tenants.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionError;

    fn registry() -> TenantRegistry {
        TenantRegistry::new("us-east-1", "123456789012")
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_instance() {
        let registry = registry();
        let first = registry.get_or_create("acme").await.unwrap();
        let second = registry.get_or_create("acme").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.tenant_ids().await, vec!["acme".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_tenant_is_not_registered() {
        let registry = registry();
        let result = registry.get_or_create("Not Valid").await;

        assert!(matches!(result, Err(ProvisionError::InvalidTenant(_))));
        assert!(registry.tenant_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_commit_is_scoped_to_tenant() {
        let registry = registry();
        let acme = registry.get_or_create("acme").await.unwrap();
        registry.get_or_create("beta").await.unwrap();

        acme.commit(ResolvedResources {
            agent_id: Some("A1".to_string()),
            ..Default::default()
        })
        .await;

        assert_eq!(
            registry.snapshot("acme").await.unwrap().agent_id.as_deref(),
            Some("A1")
        );
        assert_eq!(registry.snapshot("beta").await.unwrap().agent_id, None);
        assert!(registry.snapshot("gamma").await.is_none());
    }

    #[tokio::test]
    async fn test_evict_creates_fresh_instance() {
        let registry = registry();
        let first = registry.get_or_create("acme").await.unwrap();
        assert!(registry.evict("acme").await);
        assert!(!registry.evict("acme").await);

        let second = registry.get_or_create("acme").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_run_lock_serialises_same_tenant() {
        let registry = registry();
        let tenant = registry.get_or_create("acme").await.unwrap();

        let guard = tenant.begin_run().await;
        assert!(tenant.run_lock.try_lock().is_err());
        drop(guard);
        assert!(tenant.run_lock.try_lock().is_ok());
    }
}
