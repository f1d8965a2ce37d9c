//! Provisioning orchestrator
//!
//! Runs the stages of a tenant's pipeline in a fixed order, each one
//! starting only after the identifiers it depends on were resolved by the
//! previous stages:
//!
//! bucket → documents → knowledge-base role → collection → knowledge base →
//! data source → agent role → agent → association → prepare → alias → invoke
//!
//! Runs for the same tenant are serialised by the tenant's run lock. Runs for
//! different tenants proceed concurrently and share nothing but the clients.

mod report;

pub use report::{ProvisioningReport, Stage};

use crate::clients::CloudClients;
use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::invoke::{Invocation, Invoker};
use crate::provisioners::{
    AgentProvisioner, BucketProvisioner, CollectionProvisioner, DataSourceProvisioner,
    KnowledgeBaseProvisioner, StageEnv,
};
use crate::tenant::{ProvisioningContext, TenantRegistry};
use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Provisions tenants and invokes their agents
pub struct Orchestrator {
    clients: CloudClients,
    config: Config,
    registry: TenantRegistry,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Validate the configuration and resolve the account the pipeline runs in
    ///
    /// # Arguments
    /// * `clients` - Cloud capabilities
    /// * `config` - Pipeline configuration
    ///
    /// # Returns
    /// * `Ok(Orchestrator)` - Ready to provision tenants
    /// * `Err(ProvisionError)` - Invalid configuration or the caller identity could not be read
    pub async fn connect(clients: CloudClients, config: Config) -> Result<Self> {
        config.validate()?;
        let identity = clients.identity().get_caller_identity().await?;
        tracing::info!(
            region = %config.cloud.region,
            account = %identity.account_id,
            caller = %identity.arn,
            "Orchestrator connected"
        );
        let registry = TenantRegistry::new(config.cloud.region.clone(), identity.account_id);
        Ok(Self {
            clients,
            config,
            registry,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts in-flight waits when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tenant registry
    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    /// Pipeline configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Provision every resource of a tenant without invoking the agent
    pub async fn provision(&self, tenant: &str, documents: &Path) -> Result<ProvisioningReport> {
        self.run(tenant, documents, None).await
    }

    /// Provision a tenant and ask the verification question
    pub async fn provision_and_invoke(
        &self,
        tenant: &str,
        documents: &Path,
    ) -> Result<ProvisioningReport> {
        let question = self.config.invocation.verification_question.as_str();
        self.run(tenant, documents, Some(question)).await
    }

    /// Provision a tenant and return the agent's answer to the verification question
    pub async fn provision_and_ask(&self, tenant: &str, documents: &Path) -> Result<String> {
        let report = self.provision_and_invoke(tenant, documents).await?;
        Ok(report.answer().to_string())
    }

    /// Ask an already provisioned tenant's agent a question
    ///
    /// Uses the identifiers committed by the tenant's last successful run.
    pub async fn ask(
        &self,
        tenant: &str,
        prompt: &str,
        session_id: Option<&str>,
    ) -> Result<Invocation> {
        let resolved = self.registry.snapshot(tenant).await.unwrap_or_default();
        let agent_id = resolved
            .agent_id
            .ok_or(ProvisionError::MissingDependency("agent id"))?;
        let alias_id = resolved
            .agent_alias_id
            .ok_or(ProvisionError::MissingDependency("agent alias id"))?;

        Invoker::new(self.clients.runtime(), &self.config.invocation)
            .invoke(prompt, &agent_id, &alias_id, session_id)
            .await
            .inspect_err(|e| tracing::error!(tenant = %tenant, error = %e, "Chat request failed"))
    }

    async fn run(
        &self,
        tenant: &str,
        documents: &Path,
        question: Option<&str>,
    ) -> Result<ProvisioningReport> {
        let tenant_config = self.registry.get_or_create(tenant).await?;
        let _run = tenant_config.begin_run().await;
        let started_at = Utc::now();
        tracing::info!(tenant = %tenant, documents = %documents.display(), "Provisioning run started");

        let result = self
            .run_stages(
                ProvisioningContext::resume(
                    tenant_config.names().clone(),
                    tenant_config.resolved().await,
                ),
                documents,
                question,
            )
            .await;

        match result {
            Ok(mut report) => {
                tenant_config.commit(report.resolved.clone()).await;
                report.started_at = started_at;
                report.finished_at = Utc::now();
                tracing::info!(
                    tenant = %tenant,
                    created = report.created().count(),
                    checked = report.resources.len(),
                    "Provisioning run finished"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(tenant = %tenant, error = %e, "{}", e.user_message());
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        ctx: ProvisioningContext,
        documents: &Path,
        question: Option<&str>,
    ) -> Result<ProvisioningReport> {
        let env = StageEnv::new(&self.clients, &self.config, &self.cancel);
        let tenant = ctx.tenant_id().to_string();
        let mut resources = Vec::new();

        let bucket = BucketProvisioner::new(&env);
        resources.push(self.stage(Stage::Bucket, &tenant, bucket.ensure_bucket(ctx.names())).await?);
        let documents = self
            .stage(Stage::Documents, &tenant, bucket.sync_documents(ctx.names(), documents))
            .await?;

        let knowledge_base = KnowledgeBaseProvisioner::new(&env);
        let (ctx, handles) = self
            .stage(Stage::KnowledgeBaseRole, &tenant, knowledge_base.ensure_role(ctx))
            .await?;
        resources.extend(handles);

        let (ctx, handles) = self
            .stage(Stage::Collection, &tenant, CollectionProvisioner::new(&env).ensure(ctx))
            .await?;
        resources.extend(handles);

        let (ctx, handle) = self
            .stage(Stage::KnowledgeBase, &tenant, knowledge_base.ensure(ctx))
            .await?;
        resources.push(handle);

        let (ctx, outcome) = self
            .stage(
                Stage::DataSource,
                &tenant,
                DataSourceProvisioner::new(&env).ensure(ctx, documents.changed()),
            )
            .await?;
        resources.extend(outcome.handles);
        let ingestion_job_id = outcome.ingestion_job.map(|job| job.id);

        let agent = AgentProvisioner::new(&env);
        let (ctx, handles) = self
            .stage(Stage::AgentRole, &tenant, agent.ensure_role(ctx))
            .await?;
        resources.extend(handles);

        let (ctx, agent_handle) = self
            .stage(Stage::Agent, &tenant, agent.ensure_agent(ctx))
            .await?;
        let agent_created = agent_handle.created;
        resources.push(agent_handle);

        let association = self
            .stage(Stage::Association, &tenant, agent.ensure_association(&ctx))
            .await?;
        let force_prepare = agent_created || association.created;
        resources.push(association);

        self.stage(Stage::Prepare, &tenant, agent.ensure_prepared(&ctx, force_prepare))
            .await?;

        let (ctx, handle) = self
            .stage(Stage::Alias, &tenant, agent.ensure_alias(ctx))
            .await?;
        resources.push(handle);

        let invocation = match question {
            Some(question) => {
                let invoker = Invoker::new(self.clients.runtime(), &self.config.invocation);
                let invocation = self
                    .stage(
                        Stage::Invoke,
                        &tenant,
                        invoker.invoke(
                            question,
                            ctx.require_agent_id()?,
                            ctx.require_agent_alias_id()?,
                            None,
                        ),
                    )
                    .await?;
                Some(invocation)
            }
            None => None,
        };

        let now = Utc::now();
        Ok(ProvisioningReport {
            tenant,
            started_at: now,
            finished_at: now,
            resources,
            documents,
            ingestion_job_id,
            resolved: ctx.into_resolved(),
            invocation,
        })
    }

    /// Run one stage with timing and failure logging
    async fn stage<T, F>(&self, stage: Stage, tenant: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled(format!("before stage {}", stage)));
        }

        let started = Instant::now();
        tracing::debug!(tenant = %tenant, stage = %stage, "Stage started");
        let result = work.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(tenant = %tenant, stage = %stage, elapsed_ms, "Stage complete"),
            Err(e) => {
                tracing::error!(tenant = %tenant, stage = %stage, elapsed_ms, error = %e, "Stage failed")
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::InMemoryCloud;
    use crate::config::TimingConfig;
    use std::sync::Arc;

    fn config() -> Config {
        Config {
            timing: TimingConfig::immediate(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_connect_resolves_account() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1", "123456789012"));
        let orchestrator = Orchestrator::connect(CloudClients::from_provider(cloud), config())
            .await
            .unwrap();

        let tenant = orchestrator.registry().get_or_create("acme").await.unwrap();
        assert_eq!(tenant.names().account_id, "123456789012");
        assert_eq!(tenant.names().region, "us-east-1");
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1", "123456789012"));
        let mut config = config();
        config.models.foundation_model.clear();

        let result = Orchestrator::connect(CloudClients::from_provider(cloud.clone()), config).await;
        assert!(matches!(result, Err(ProvisionError::InvalidConfig(_))));
        assert!(cloud.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_ask_requires_provisioned_tenant() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1", "123456789012"));
        let orchestrator = Orchestrator::connect(CloudClients::from_provider(cloud), config())
            .await
            .unwrap();

        let result = orchestrator.ask("acme", "hello", None).await;
        assert!(matches!(result, Err(ProvisionError::MissingDependency("agent id"))));
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_before_first_stage() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1", "123456789012"));
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::connect(CloudClients::from_provider(cloud.clone()), config())
            .await
            .unwrap()
            .with_cancellation(cancel.clone());
        cloud.clear_calls().await;
        cancel.cancel();

        let dir = tempfile::tempdir().unwrap();
        let result = orchestrator.provision("acme", dir.path()).await;
        assert!(matches!(result, Err(ProvisionError::Cancelled(_))));
        assert!(cloud.calls().await.is_empty());
        assert_eq!(orchestrator.registry().snapshot("acme").await, Some(Default::default()));
    }
}
