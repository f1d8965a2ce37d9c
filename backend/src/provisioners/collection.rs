//! Vector-search collection, its policies and its index
//!
//! The encryption and network policies must exist before the collection can
//! be created, and the data access policy needs the knowledge-base role and
//! the caller identity. Index creation is only accepted once the data access
//! policy is enforced, which lags the collection turning active, so a fixed
//! delay precedes it.

use super::{logged, tolerate_existing, vanished, ResourceHandle, StageEnv};
use crate::cloud::{CloudError, CollectionSummary, ResourceKind, ResourceStatus, SecurityPolicyKind};
use crate::error::{ProvisionError, Result};
use crate::policy;
use crate::tenant::ProvisioningContext;

/// Upserts the collection stack of a tenant
pub struct CollectionProvisioner<'a> {
    env: &'a StageEnv<'a>,
}

impl<'a> CollectionProvisioner<'a> {
    /// Create a provisioner for one run
    pub fn new(env: &'a StageEnv<'a>) -> Self {
        Self { env }
    }

    /// Provision policies, collection and index
    ///
    /// Requires the knowledge-base role ARN. Resolves the caller identity and
    /// the collection ARN.
    pub async fn ensure(
        &self,
        ctx: ProvisioningContext,
    ) -> Result<(ProvisioningContext, Vec<ResourceHandle>)> {
        let collection = ctx.names().collection.clone();
        logged(ResourceKind::Collection, &collection, self.ensure_inner(ctx).await)
    }

    async fn ensure_inner(
        &self,
        ctx: ProvisioningContext,
    ) -> Result<(ProvisioningContext, Vec<ResourceHandle>)> {
        let names = ctx.names().clone();
        let mut handles = Vec::with_capacity(5);

        handles.push(
            self.ensure_security_policy(
                SecurityPolicyKind::Encryption,
                &names.collection,
                &policy::render(&policy::encryption_policy(&names))?,
            )
            .await?,
        );
        handles.push(
            self.ensure_security_policy(
                SecurityPolicyKind::Network,
                &names.collection,
                &policy::render(&policy::network_policy(&names))?,
            )
            .await?,
        );

        let identity = self.env.clients.identity().get_caller_identity().await?;
        let ctx = ctx.with_caller_arn(identity.arn);

        let data_policy = policy::data_access_policy(
            &names,
            ctx.require_kb_role_arn()?,
            ctx.require_caller_arn()?,
            &self.env.config.cloud.admin_role,
        );
        handles.push(
            self.ensure_access_policy(&names.collection, &policy::render(&data_policy)?)
                .await?,
        );

        let (summary, created) = self.find_or_create_collection(&names.collection).await?;
        let ctx = ctx.with_collection_arn(&summary.arn);

        let collections = self.env.clients.collections();
        let name = names.collection.as_str();
        self.env
            .wait_until_active(ResourceKind::Collection, name, || async move {
                let detail = collections
                    .describe_collection(name)
                    .await?
                    .ok_or_else(|| vanished(ResourceKind::Collection, name))?;
                Ok::<_, ProvisionError>(detail.status)
            })
            .await?;

        handles.push(
            ResourceHandle::synchronous(ResourceKind::Collection, name, created)
                .with_id(&summary.id)
                .with_arn(&summary.arn)
                .with_status(ResourceStatus::Active),
        );

        let endpoint = collections
            .describe_collection(name)
            .await?
            .and_then(|detail| detail.endpoint)
            .ok_or_else(|| {
                CloudError::Validation(format!("collection {} has no endpoint", name))
            })?;
        handles.push(self.ensure_index(&endpoint, &names.vector_index).await?);

        Ok((ctx, handles))
    }

    async fn ensure_security_policy(
        &self,
        kind: SecurityPolicyKind,
        name: &str,
        document: &str,
    ) -> Result<ResourceHandle> {
        let collections = self.env.clients.collections();
        let resource = match kind {
            SecurityPolicyKind::Encryption => ResourceKind::EncryptionPolicy,
            SecurityPolicyKind::Network => ResourceKind::NetworkPolicy,
        };

        let existing = collections.list_security_policies(kind).await?;
        if existing.iter().any(|p| p == name) {
            tracing::debug!(resource = %resource, name = %name, "Policy already exists");
            return Ok(ResourceHandle::synchronous(resource, name, false));
        }

        let description = match kind {
            SecurityPolicyKind::Encryption => "Security policy for financial knowledge base",
            SecurityPolicyKind::Network => "Network policy for financial knowledge base",
        };
        let created = tolerate_existing(
            resource,
            name,
            collections
                .create_security_policy(name, kind, document, description)
                .await,
        )?
        .is_some();
        if created {
            tracing::info!(resource = %resource, name = %name, "Created collection policy");
        }
        Ok(ResourceHandle::synchronous(resource, name, created))
    }

    async fn ensure_access_policy(&self, name: &str, document: &str) -> Result<ResourceHandle> {
        let collections = self.env.clients.collections();
        let kind = ResourceKind::DataAccessPolicy;

        if collections.list_access_policies().await?.iter().any(|p| p == name) {
            tracing::debug!(name = %name, "Data access policy already exists");
            return Ok(ResourceHandle::synchronous(kind, name, false));
        }

        let created = tolerate_existing(
            kind,
            name,
            collections
                .create_access_policy(name, document, "Data policy for financial knowledge base")
                .await,
        )?
        .is_some();
        if created {
            tracing::info!(name = %name, "Created data access policy");
        }
        Ok(ResourceHandle::synchronous(kind, name, created))
    }

    async fn find_collection(&self, name: &str) -> Result<Option<CollectionSummary>> {
        let collections = self.env.clients.collections().list_collections().await?;
        Ok(collections.into_iter().find(|c| c.name == name))
    }

    async fn find_or_create_collection(&self, name: &str) -> Result<(CollectionSummary, bool)> {
        if let Some(existing) = self.find_collection(name).await? {
            tracing::info!(collection = %name, arn = %existing.arn, "Collection already exists");
            return Ok((existing, false));
        }

        let created = tolerate_existing(
            ResourceKind::Collection,
            name,
            self.env
                .clients
                .collections()
                .create_collection(name, "OpenSearch collection for Financial Analysis Base")
                .await,
        )?;
        match created {
            Some(summary) => {
                tracing::info!(collection = %name, arn = %summary.arn, "Created collection");
                Ok((summary, true))
            }
            None => Ok((
                self.find_collection(name)
                    .await?
                    .ok_or_else(|| vanished(ResourceKind::Collection, name))?,
                false,
            )),
        }
    }

    async fn ensure_index(&self, endpoint: &str, index: &str) -> Result<ResourceHandle> {
        let collections = self.env.clients.collections();

        if collections.index_exists(endpoint, index).await? {
            tracing::debug!(index = %index, "Vector index already exists");
            return Ok(ResourceHandle::synchronous(ResourceKind::VectorIndex, index, false));
        }

        self.env
            .settle(
                self.env.config.timing.settle.before_index,
                "data access policy enforcement",
            )
            .await?;
        let created = tolerate_existing(
            ResourceKind::VectorIndex,
            index,
            collections
                .create_index(endpoint, index, &policy::vector_index_body())
                .await,
        )?
        .is_some();
        if created {
            tracing::info!(index = %index, endpoint = %endpoint, "Created vector index");
        }
        Ok(ResourceHandle::synchronous(ResourceKind::VectorIndex, index, created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::CloudClients;
    use crate::cloud::memory::{InMemoryCloud, SimulationProfile};
    use crate::config::{Config, TimingConfig};
    use crate::tenant::TenantNames;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn config() -> Config {
        Config {
            timing: TimingConfig::immediate(),
            ..Config::default()
        }
    }

    fn context() -> ProvisioningContext {
        let names = TenantNames::derive("acme", "us-east-1", "123456789012").unwrap();
        ProvisioningContext::new(names)
            .with_kb_role_arn("arn:aws:iam::123456789012:role/kb")
    }

    #[tokio::test]
    async fn test_collection_stack_created_then_reused() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1", "123456789012"));
        let clients = CloudClients::from_provider(cloud.clone());
        let config = config();
        let cancel = CancellationToken::new();
        let env = StageEnv::new(&clients, &config, &cancel);
        let provisioner = CollectionProvisioner::new(&env);

        let (ctx, handles) = provisioner.ensure(context()).await.unwrap();
        assert_eq!(handles.len(), 5);
        assert!(handles.iter().all(|h| h.created));
        let arn = ctx.require_collection_arn().unwrap().to_string();
        assert!(ctx.require_caller_arn().unwrap().contains("assumed-role/Admin"));

        let policy = cloud.access_policy(&ctx.names().collection).await.unwrap();
        assert!(policy.contains("arn:aws:iam::123456789012:role/kb"));

        cloud.clear_calls().await;
        let (ctx, handles) = provisioner.ensure(context()).await.unwrap();
        assert!(handles.iter().all(|h| !h.created));
        assert_eq!(ctx.require_collection_arn().unwrap(), arn);
        assert!(cloud.mutating_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_index_created_after_activation() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1", "123456789012"));
        let clients = CloudClients::from_provider(cloud.clone());
        let config = config();
        let cancel = CancellationToken::new();
        let env = StageEnv::new(&clients, &config, &cancel);

        CollectionProvisioner::new(&env).ensure(context()).await.unwrap();

        let calls = cloud.calls().await;
        let position = |op: &str| calls.iter().position(|c| c.operation == op).unwrap();
        assert!(position("create_access_policy") < position("create_collection"));
        assert!(position("describe_collection") < position("create_index"));
    }

    #[tokio::test]
    async fn test_failed_collection_is_terminal() {
        let mut profile = SimulationProfile::default();
        profile.failing.insert(ResourceKind::Collection);
        let cloud = Arc::new(InMemoryCloud::with_profile("us-east-1", "123456789012", profile));
        let clients = CloudClients::from_provider(cloud.clone());
        let config = config();
        let cancel = CancellationToken::new();
        let env = StageEnv::new(&clients, &config, &cancel);

        let result = CollectionProvisioner::new(&env).ensure(context()).await;
        assert!(matches!(
            result,
            Err(ProvisionError::TerminalFailure { kind: ResourceKind::Collection, .. })
        ));
        assert!(!cloud.calls().await.iter().any(|c| c.operation == "create_index"));
    }

    #[tokio::test]
    async fn test_requires_kb_role() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1", "123456789012"));
        let clients = CloudClients::from_provider(cloud);
        let config = config();
        let cancel = CancellationToken::new();
        let env = StageEnv::new(&clients, &config, &cancel);
        let names = TenantNames::derive("acme", "us-east-1", "123456789012").unwrap();

        let result = CollectionProvisioner::new(&env)
            .ensure(ProvisioningContext::new(names))
            .await;
        assert!(matches!(result, Err(ProvisionError::MissingDependency(_))));
    }
}
