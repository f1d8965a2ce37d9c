//! Knowledge base bound to the tenant's collection

use super::{
    logged, tolerate_existing, vanished, IamProvisioner, PolicyMerge, ResourceHandle, RolePolicy,
    StageEnv,
};
use crate::cloud::{KnowledgeBaseSpec, ResourceKind, ResourceStatus};
use crate::error::{ProvisionError, Result};
use crate::policy;
use crate::tenant::ProvisioningContext;

/// Upserts the tenant's knowledge base
pub struct KnowledgeBaseProvisioner<'a> {
    env: &'a StageEnv<'a>,
}

impl<'a> KnowledgeBaseProvisioner<'a> {
    /// Create a provisioner for one run
    pub fn new(env: &'a StageEnv<'a>) -> Self {
        Self { env }
    }

    /// Find or create the knowledge base and wait until it is active
    ///
    /// Requires the collection ARN and the knowledge-base role ARN; resolves
    /// the knowledge base id and ARN.
    pub async fn ensure(
        &self,
        ctx: ProvisioningContext,
    ) -> Result<(ProvisioningContext, ResourceHandle)> {
        let name = ctx.names().knowledge_base.clone();
        logged(ResourceKind::KnowledgeBase, &name, self.ensure_inner(ctx).await)
    }

    /// Make sure the knowledge-base service role exists with its three policies
    ///
    /// Resolves the knowledge-base role ARN.
    pub async fn ensure_role(
        &self,
        ctx: ProvisioningContext,
    ) -> Result<(ProvisioningContext, Vec<ResourceHandle>)> {
        let names = ctx.names();
        let policies = [
            RolePolicy {
                name: names.kb_model_policy.clone(),
                document: policy::kb_foundation_model_policy(
                    names,
                    &self.env.config.models.embedding_model,
                ),
                description: "Policy for accessing foundation model",
                merge: PolicyMerge::Replace,
            },
            RolePolicy {
                name: names.kb_collection_policy.clone(),
                document: policy::kb_collection_access_policy(names),
                description: "Policy for accessing opensearch serverless",
                merge: PolicyMerge::Replace,
            },
            RolePolicy {
                name: names.kb_bucket_policy.clone(),
                document: policy::kb_bucket_access_policy(names),
                description: "Policy for reading documents from s3",
                merge: PolicyMerge::AccumulateResources,
            },
        ];

        let outcome = IamProvisioner::new(self.env)
            .ensure_role(&names.kb_role, &policies)
            .await?;
        Ok((ctx.with_kb_role_arn(outcome.role_arn), outcome.handles))
    }

    async fn find(&self, name: &str) -> Result<Option<String>> {
        let summaries = self.env.clients.knowledge_bases().list_knowledge_bases().await?;
        Ok(summaries.into_iter().find(|kb| kb.name == name).map(|kb| kb.id))
    }

    async fn ensure_inner(
        &self,
        ctx: ProvisioningContext,
    ) -> Result<(ProvisioningContext, ResourceHandle)> {
        let knowledge_bases = self.env.clients.knowledge_bases();
        let names = ctx.names();
        let name = names.knowledge_base.as_str();

        let (id, created) = match self.find(name).await? {
            Some(id) => {
                tracing::info!(knowledge_base = %name, id = %id, "Knowledge base already exists");
                (id, false)
            }
            None => {
                let spec = KnowledgeBaseSpec {
                    name: name.to_string(),
                    description: "KB that contains the Annual Financial Report".to_string(),
                    role_arn: ctx.require_kb_role_arn()?.to_string(),
                    embedding_model_arn: names
                        .foundation_model_arn(&self.env.config.models.embedding_model),
                    storage_configuration: policy::storage_configuration(
                        names,
                        ctx.require_collection_arn()?,
                    ),
                };

                self.env
                    .settle(
                        self.env.config.timing.settle.before_knowledge_base,
                        "knowledge base role propagation",
                    )
                    .await?;
                match tolerate_existing(
                    ResourceKind::KnowledgeBase,
                    name,
                    knowledge_bases.create_knowledge_base(&spec).await,
                )? {
                    Some(kb) => {
                        tracing::info!(knowledge_base = %name, id = %kb.id, "Created knowledge base");
                        (kb.id, true)
                    }
                    None => (
                        self.find(name)
                            .await?
                            .ok_or_else(|| vanished(ResourceKind::KnowledgeBase, name))?,
                        false,
                    ),
                }
            }
        };

        let kb_id = id.as_str();
        self.env
            .wait_until_active(ResourceKind::KnowledgeBase, name, || async move {
                Ok::<_, ProvisionError>(knowledge_bases.get_knowledge_base(kb_id).await?.status)
            })
            .await?;

        let kb = knowledge_bases.get_knowledge_base(kb_id).await?;
        let handle = ResourceHandle::synchronous(ResourceKind::KnowledgeBase, name, created)
            .with_id(&kb.id)
            .with_arn(&kb.arn)
            .with_status(ResourceStatus::Active);
        Ok((ctx.with_knowledge_base(kb.id, kb.arn), handle))
    }
}
