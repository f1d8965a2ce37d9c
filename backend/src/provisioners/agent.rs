//! Agent, knowledge-base association, preparation and alias
//!
//! The agent only becomes invokable through an alias, and an alias can only
//! point at a prepared agent. Associating a knowledge base puts the agent
//! back into `NOT_PREPARED`, so preparation always runs after association.

use super::{
    logged, tolerate_existing, vanished, IamProvisioner, PolicyMerge, ResourceHandle, RolePolicy,
    StageEnv,
};
use crate::cloud::{AgentSpec, AgentStatus, ResourceKind, ResourceStatus};
use crate::error::{ProvisionError, Result};
use crate::policy;
use crate::tenant::ProvisioningContext;

/// Agent version the knowledge base is associated with
pub const DRAFT_VERSION: &str = "DRAFT";

const AGENT_DESCRIPTION: &str = "Agent supporting Financial Analysts.";

const AGENT_INSTRUCTION: &str = "You are an agent that support users working with Financial \
Annual Reports or other financial data. You have access to Financial Annual Reports and Data in \
form of a JSON in a Knowledge Base and you can Answer questions from this documentation. Only \
answer questions based on the documentation and reply with \"There is no information about your \
question on the Financial Report at the moment, sorry! Do you want to ask another question?\" If \
the answer to the question is not available in the documentation";

/// Upserts the agent and everything needed to invoke it
pub struct AgentProvisioner<'a> {
    env: &'a StageEnv<'a>,
}

impl<'a> AgentProvisioner<'a> {
    /// Create a provisioner for one run
    pub fn new(env: &'a StageEnv<'a>) -> Self {
        Self { env }
    }

    /// Make sure the agent execution role carries model and retrieval access
    ///
    /// Requires the knowledge base ARN; resolves the agent role ARN.
    pub async fn ensure_role(
        &self,
        ctx: ProvisioningContext,
    ) -> Result<(ProvisioningContext, Vec<ResourceHandle>)> {
        let names = ctx.names();
        let policies = [
            RolePolicy {
                name: names.agent_model_policy.clone(),
                document: policy::agent_model_invoke_policy(
                    names,
                    &self.env.config.models.foundation_model,
                ),
                description: "Policy for bedrock agent to invoke the foundation model",
                merge: PolicyMerge::Replace,
            },
            RolePolicy {
                name: names.agent_retrieval_policy.clone(),
                document: policy::kb_retrieval_policy(ctx.require_knowledge_base_arn()?),
                description: "Policy for bedrock agent to retrieve from the knowledge base",
                merge: PolicyMerge::AccumulateResources,
            },
        ];

        let outcome = IamProvisioner::new(self.env)
            .ensure_role(&names.agent_role, &policies)
            .await?;
        Ok((ctx.with_agent_role_arn(outcome.role_arn), outcome.handles))
    }

    /// Find or create the agent and wait until it has left `CREATING`
    ///
    /// # Returns
    /// * `Ok((ctx, handle))` - Context with the agent id resolved
    /// * `Err(ProvisionError)` - Missing agent role, provider error, or failed agent
    pub async fn ensure_agent(
        &self,
        ctx: ProvisioningContext,
    ) -> Result<(ProvisioningContext, ResourceHandle)> {
        let name = ctx.names().agent.clone();
        logged(ResourceKind::Agent, &name, self.ensure_agent_inner(ctx).await)
    }

    async fn find_agent(&self, name: &str) -> Result<Option<String>> {
        let agents = self.env.clients.agents().list_agents().await?;
        Ok(agents.into_iter().find(|a| a.name == name).map(|a| a.id))
    }

    async fn ensure_agent_inner(
        &self,
        ctx: ProvisioningContext,
    ) -> Result<(ProvisioningContext, ResourceHandle)> {
        let agents = self.env.clients.agents();
        let name = ctx.names().agent.as_str();

        let (id, created) = match self.find_agent(name).await? {
            Some(id) => {
                tracing::info!(agent = %name, id = %id, "Agent already exists");
                (id, false)
            }
            None => {
                let models = &self.env.config.models;
                let spec = AgentSpec {
                    agent_name: name.to_string(),
                    agent_resource_role_arn: ctx.require_agent_role_arn()?.to_string(),
                    description: AGENT_DESCRIPTION.to_string(),
                    idle_session_ttl_secs: models.idle_session_ttl_secs,
                    foundation_model: models.foundation_model.clone(),
                    instruction: AGENT_INSTRUCTION.to_string(),
                };
                match tolerate_existing(ResourceKind::Agent, name, agents.create_agent(&spec).await)? {
                    Some(agent) => {
                        tracing::info!(agent = %name, id = %agent.id, "Created agent");
                        (agent.id, true)
                    }
                    None => (
                        self.find_agent(name)
                            .await?
                            .ok_or_else(|| vanished(ResourceKind::Agent, name))?,
                        false,
                    ),
                }
            }
        };

        let agent_id = id.as_str();
        self.env
            .wait_until_active(ResourceKind::Agent, name, || async move {
                Ok::<_, ProvisionError>(agents.get_agent(agent_id).await?.status.lifecycle(false))
            })
            .await?;

        let agent = agents.get_agent(agent_id).await?;
        let handle = ResourceHandle::synchronous(ResourceKind::Agent, name, created)
            .with_id(&agent.id)
            .with_arn(&agent.arn)
            .with_status(ResourceStatus::Active);
        Ok((ctx.with_agent_id(agent.id), handle))
    }

    /// Associate the knowledge base with the draft agent unless already done
    ///
    /// The returned handle's `created` flag tells whether the association
    /// was made by this call.
    pub async fn ensure_association(&self, ctx: &ProvisioningContext) -> Result<ResourceHandle> {
        let name = &ctx.names().knowledge_base;
        logged(
            ResourceKind::AgentKnowledgeBase,
            name,
            self.ensure_association_inner(ctx).await,
        )
    }

    async fn ensure_association_inner(&self, ctx: &ProvisioningContext) -> Result<ResourceHandle> {
        let agents = self.env.clients.agents();
        let agent_id = ctx.require_agent_id()?;
        let kb_id = ctx.require_knowledge_base_id()?;
        let kb_name = &ctx.names().knowledge_base;

        let associated = agents
            .list_agent_knowledge_bases(agent_id, DRAFT_VERSION)
            .await?;
        if associated.iter().any(|id| id == kb_id) {
            tracing::debug!(agent = %agent_id, knowledge_base = %kb_id, "Knowledge base already associated");
            return Ok(ResourceHandle::synchronous(ResourceKind::AgentKnowledgeBase, kb_name, false)
                .with_id(kb_id));
        }

        let description = format!(
            "Use the information in the {} knowledge base to provide accurate responses to the questions about Financial Reports.",
            kb_name
        );
        let created = tolerate_existing(
            ResourceKind::AgentKnowledgeBase,
            kb_name,
            agents
                .associate_knowledge_base(agent_id, DRAFT_VERSION, kb_id, &description)
                .await,
        )?
        .is_some();
        if created {
            tracing::info!(agent = %agent_id, knowledge_base = %kb_id, "Associated knowledge base with agent");
        }
        Ok(ResourceHandle::synchronous(ResourceKind::AgentKnowledgeBase, kb_name, created).with_id(kb_id))
    }

    /// Prepare the agent and wait for `PREPARED`
    ///
    /// Preparation is requested when `force` is set (the agent or its
    /// association changed in this run) or when the agent is not prepared.
    /// An agent already `PREPARING` is only waited for.
    pub async fn ensure_prepared(&self, ctx: &ProvisioningContext, force: bool) -> Result<bool> {
        let name = &ctx.names().agent;
        logged(
            ResourceKind::Agent,
            name,
            self.ensure_prepared_inner(ctx, force).await,
        )
    }

    async fn ensure_prepared_inner(&self, ctx: &ProvisioningContext, force: bool) -> Result<bool> {
        let agents = self.env.clients.agents();
        let agent_id = ctx.require_agent_id()?;
        let name = ctx.names().agent.as_str();

        let status = agents.get_agent(agent_id).await?.status;
        let prepare = match status {
            AgentStatus::Preparing => false,
            AgentStatus::Prepared => force,
            _ => true,
        };
        if prepare {
            let status = agents.prepare_agent(agent_id).await?;
            tracing::info!(agent = %name, status = ?status, "Requested agent preparation");
        } else {
            tracing::debug!(agent = %name, status = ?status, "Agent preparation not required");
        }

        self.env
            .wait_until_active(ResourceKind::Agent, name, || async move {
                Ok::<_, ProvisionError>(agents.get_agent(agent_id).await?.status.lifecycle(true))
            })
            .await?;
        Ok(prepare)
    }

    /// Find or create the alias and wait until it is prepared
    ///
    /// Requires the agent id; resolves the alias id.
    pub async fn ensure_alias(
        &self,
        ctx: ProvisioningContext,
    ) -> Result<(ProvisioningContext, ResourceHandle)> {
        let name = ctx.names().agent_alias.clone();
        logged(ResourceKind::AgentAlias, &name, self.ensure_alias_inner(ctx).await)
    }

    async fn find_alias(&self, agent_id: &str, name: &str) -> Result<Option<String>> {
        let aliases = self.env.clients.agents().list_agent_aliases(agent_id).await?;
        Ok(aliases.into_iter().find(|a| a.name == name).map(|a| a.id))
    }

    async fn ensure_alias_inner(
        &self,
        ctx: ProvisioningContext,
    ) -> Result<(ProvisioningContext, ResourceHandle)> {
        let agents = self.env.clients.agents();
        let agent_id = ctx.require_agent_id()?;
        let name = ctx.names().agent_alias.as_str();
        let delay = self.env.config.timing.settle.around_alias;

        let (id, created) = match self.find_alias(agent_id, name).await? {
            Some(id) => {
                tracing::info!(alias = %name, id = %id, "Agent alias already exists");
                (id, false)
            }
            None => {
                self.env.settle(delay, "agent preparation").await?;
                let created = tolerate_existing(
                    ResourceKind::AgentAlias,
                    name,
                    agents.create_agent_alias(agent_id, name).await,
                )?;
                match created {
                    Some(alias) => {
                        tracing::info!(alias = %name, id = %alias.id, "Created agent alias");
                        self.env.settle(delay, "agent alias propagation").await?;
                        (alias.id, true)
                    }
                    None => (
                        self.find_alias(agent_id, name)
                            .await?
                            .ok_or_else(|| vanished(ResourceKind::AgentAlias, name))?,
                        false,
                    ),
                }
            }
        };

        let alias_id = id.as_str();
        self.env
            .wait_until_active(ResourceKind::AgentAlias, name, || async move {
                let alias = agents.get_agent_alias(agent_id, alias_id).await?;
                Ok::<_, ProvisionError>(alias.status.lifecycle())
            })
            .await?;

        let handle = ResourceHandle::synchronous(ResourceKind::AgentAlias, name, created)
            .with_id(alias_id)
            .with_status(ResourceStatus::Active);
        Ok((ctx.with_agent_alias_id(id), handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::CloudClients;
    use crate::cloud::memory::{InMemoryCloud, SimulationProfile};
    use crate::cloud::{AgentApi, IamApi};
    use crate::config::{Config, TimingConfig};
    use crate::provisioners::{CollectionProvisioner, KnowledgeBaseProvisioner};
    use crate::tenant::TenantNames;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        cloud: Arc<InMemoryCloud>,
        clients: CloudClients,
        config: Config,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new(profile: SimulationProfile) -> Self {
            let cloud = Arc::new(InMemoryCloud::with_profile(
                "us-east-1",
                "123456789012",
                profile,
            ));
            Self {
                clients: CloudClients::from_provider(cloud.clone()),
                cloud,
                config: Config {
                    timing: TimingConfig::immediate(),
                    ..Config::default()
                },
                cancel: CancellationToken::new(),
            }
        }

        fn env(&self) -> StageEnv<'_> {
            StageEnv::new(&self.clients, &self.config, &self.cancel)
        }

        /// Context with a knowledge base and the agent role resolved
        async fn context(&self) -> ProvisioningContext {
            let env = self.env();
            let role = self.cloud.create_role("kb-role", "{}").await.unwrap();
            let names = TenantNames::derive("acme", "us-east-1", "123456789012").unwrap();
            let ctx = ProvisioningContext::new(names).with_kb_role_arn(role.arn);
            let (ctx, _) = CollectionProvisioner::new(&env).ensure(ctx).await.unwrap();
            let (ctx, _) = KnowledgeBaseProvisioner::new(&env).ensure(ctx).await.unwrap();
            AgentProvisioner::new(&env).ensure_role(ctx).await.unwrap().0
        }
    }

    #[tokio::test]
    async fn test_agent_role_scoped_to_knowledge_base() {
        let fx = Fixture::new(SimulationProfile::default());
        let ctx = fx.context().await;

        assert!(ctx.require_agent_role_arn().unwrap().ends_with(
            "role/AmazonBedrockExecutionRoleForAgents_financial_docs"
        ));
        let attached = fx.cloud.attached_policies(&ctx.names().agent_role).await;
        assert_eq!(attached.len(), 2);

        let versions = fx
            .cloud
            .policy_versions(&ctx.names().agent_retrieval_policy)
            .await;
        assert!(versions[0]
            .document
            .contains(ctx.require_knowledge_base_arn().unwrap()));
    }

    #[tokio::test]
    async fn test_full_agent_chain() {
        let fx = Fixture::new(SimulationProfile::default());
        let ctx = fx.context().await;
        let env = fx.env();
        let provisioner = AgentProvisioner::new(&env);

        let (ctx, agent) = provisioner.ensure_agent(ctx).await.unwrap();
        assert!(agent.created);
        let association = provisioner.ensure_association(&ctx).await.unwrap();
        assert!(association.created);
        assert!(provisioner.ensure_prepared(&ctx, true).await.unwrap());
        let (ctx, alias) = provisioner.ensure_alias(ctx).await.unwrap();
        assert!(alias.created);

        let agent_id = ctx.require_agent_id().unwrap();
        let live = fx.cloud.get_agent(agent_id).await.unwrap();
        assert_eq!(live.status, AgentStatus::Prepared);
        let kbs = fx
            .cloud
            .list_agent_knowledge_bases(agent_id, DRAFT_VERSION)
            .await
            .unwrap();
        assert_eq!(kbs, vec![ctx.require_knowledge_base_id().unwrap().to_string()]);
        assert!(ctx.require_agent_alias_id().is_ok());
    }

    #[tokio::test]
    async fn test_rerun_reuses_everything() {
        let fx = Fixture::new(SimulationProfile::default());
        let ctx = fx.context().await;
        let env = fx.env();
        let provisioner = AgentProvisioner::new(&env);

        let (ctx, _) = provisioner.ensure_agent(ctx).await.unwrap();
        provisioner.ensure_association(&ctx).await.unwrap();
        provisioner.ensure_prepared(&ctx, true).await.unwrap();
        let (ctx, _) = provisioner.ensure_alias(ctx).await.unwrap();
        let alias_id = ctx.require_agent_alias_id().unwrap().to_string();

        fx.cloud.clear_calls().await;
        let names = ctx.names().clone();
        let (ctx, agent) = provisioner
            .ensure_agent(ProvisioningContext::resume(names, ctx.into_resolved()))
            .await
            .unwrap();
        let association = provisioner.ensure_association(&ctx).await.unwrap();
        let prepared = provisioner.ensure_prepared(&ctx, false).await.unwrap();
        let (ctx, alias) = provisioner.ensure_alias(ctx).await.unwrap();

        assert!(!agent.created && !association.created && !alias.created);
        assert!(!prepared);
        assert_eq!(ctx.require_agent_alias_id().unwrap(), alias_id);
        assert!(fx.cloud.mutating_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_prepare_precedes_alias() {
        let fx = Fixture::new(SimulationProfile::default());
        let ctx = fx.context().await;
        let env = fx.env();
        let provisioner = AgentProvisioner::new(&env);

        let (ctx, _) = provisioner.ensure_agent(ctx).await.unwrap();
        provisioner.ensure_association(&ctx).await.unwrap();
        provisioner.ensure_prepared(&ctx, true).await.unwrap();
        provisioner.ensure_alias(ctx).await.unwrap();

        let calls = fx.cloud.calls().await;
        let position = |op: &str| calls.iter().position(|c| c.operation == op).unwrap();
        assert!(position("create_agent") < position("associate_knowledge_base"));
        assert!(position("associate_knowledge_base") < position("prepare_agent"));
        assert!(position("prepare_agent") < position("create_agent_alias"));
    }

    #[tokio::test]
    async fn test_alias_requires_agent() {
        let fx = Fixture::new(SimulationProfile::default());
        let env = fx.env();
        let names = TenantNames::derive("acme", "us-east-1", "123456789012").unwrap();

        let result = AgentProvisioner::new(&env)
            .ensure_alias(ProvisioningContext::new(names))
            .await;
        assert!(matches!(result, Err(ProvisionError::MissingDependency(_))));
        assert!(fx.cloud.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_agent_is_terminal() {
        let mut profile = SimulationProfile::default();
        profile.failing.insert(ResourceKind::Agent);
        let fx = Fixture::new(profile);
        let ctx = fx.context().await;
        let env = fx.env();

        let result = AgentProvisioner::new(&env).ensure_agent(ctx).await;
        assert!(matches!(
            result,
            Err(ProvisionError::TerminalFailure { kind: ResourceKind::Agent, .. })
        ));
        assert!(!fx
            .cloud
            .calls()
            .await
            .iter()
            .any(|c| c.operation == "associate_knowledge_base"));
    }
}
