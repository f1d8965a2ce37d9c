//! Per-run provisioning context
//!
//! A [`ProvisioningContext`] is owned by a single pipeline run. Each stage
//! consumes it and hands back a new value carrying the identifiers it
//! resolved, so a later stage can only read an identifier after the stage
//! producing it has finished.

use super::names::TenantNames;
use crate::error::{ProvisionError, Result};
use serde::Serialize;

/// Identifiers resolved while provisioning a tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedResources {
    /// ARN of the identity running the pipeline
    pub caller_arn: Option<String>,
    /// Knowledge-base execution role
    pub kb_role_arn: Option<String>,
    /// Vector-search collection
    pub collection_arn: Option<String>,
    /// Knowledge-base id
    pub knowledge_base_id: Option<String>,
    /// Knowledge-base ARN
    pub knowledge_base_arn: Option<String>,
    /// Data-source id
    pub data_source_id: Option<String>,
    /// Agent execution role
    pub agent_role_arn: Option<String>,
    /// Agent id
    pub agent_id: Option<String>,
    /// Agent alias id
    pub agent_alias_id: Option<String>,
}

/// Names and resolved identifiers threaded through one pipeline run
#[derive(Debug, Clone)]
pub struct ProvisioningContext {
    names: TenantNames,
    resolved: ResolvedResources,
}

/// Store a resolved identifier and log it
fn resolve(tenant: &str, field: &'static str, slot: &mut Option<String>, value: String) {
    tracing::info!(tenant = %tenant, field = field, value = %value, "Resolved identifier");
    *slot = Some(value);
}

fn require<'a>(slot: &'a Option<String>, what: &'static str) -> Result<&'a str> {
    slot.as_deref().ok_or(ProvisionError::MissingDependency(what))
}

impl ProvisioningContext {
    /// Start a run with nothing resolved
    pub fn new(names: TenantNames) -> Self {
        Self::resume(names, ResolvedResources::default())
    }

    /// Start a run from identifiers a previous run resolved
    pub fn resume(names: TenantNames, resolved: ResolvedResources) -> Self {
        Self { names, resolved }
    }

    /// Tenant resource names
    pub fn names(&self) -> &TenantNames {
        &self.names
    }

    /// Tenant id
    pub fn tenant_id(&self) -> &str {
        &self.names.tenant_id
    }

    /// Identifiers resolved so far
    pub fn resolved(&self) -> &ResolvedResources {
        &self.resolved
    }

    /// Give up the context, keeping the resolved identifiers
    pub fn into_resolved(self) -> ResolvedResources {
        self.resolved
    }

    /// Record the caller identity ARN
    pub fn with_caller_arn(mut self, arn: impl Into<String>) -> Self {
        resolve(&self.names.tenant_id, "caller_arn", &mut self.resolved.caller_arn, arn.into());
        self
    }

    /// Record the knowledge-base role ARN
    pub fn with_kb_role_arn(mut self, arn: impl Into<String>) -> Self {
        resolve(&self.names.tenant_id, "kb_role_arn", &mut self.resolved.kb_role_arn, arn.into());
        self
    }

    /// Record the collection ARN
    pub fn with_collection_arn(mut self, arn: impl Into<String>) -> Self {
        resolve(
            &self.names.tenant_id,
            "collection_arn",
            &mut self.resolved.collection_arn,
            arn.into(),
        );
        self
    }

    /// Record the knowledge base id and ARN
    pub fn with_knowledge_base(mut self, id: impl Into<String>, arn: impl Into<String>) -> Self {
        let tenant = &self.names.tenant_id;
        resolve(tenant, "knowledge_base_id", &mut self.resolved.knowledge_base_id, id.into());
        resolve(tenant, "knowledge_base_arn", &mut self.resolved.knowledge_base_arn, arn.into());
        self
    }

    /// Record the data-source id
    pub fn with_data_source_id(mut self, id: impl Into<String>) -> Self {
        resolve(&self.names.tenant_id, "data_source_id", &mut self.resolved.data_source_id, id.into());
        self
    }

    /// Record the agent role ARN
    pub fn with_agent_role_arn(mut self, arn: impl Into<String>) -> Self {
        resolve(&self.names.tenant_id, "agent_role_arn", &mut self.resolved.agent_role_arn, arn.into());
        self
    }

    /// Record the agent id
    pub fn with_agent_id(mut self, id: impl Into<String>) -> Self {
        resolve(&self.names.tenant_id, "agent_id", &mut self.resolved.agent_id, id.into());
        self
    }

    /// Record the agent alias id
    pub fn with_agent_alias_id(mut self, id: impl Into<String>) -> Self {
        resolve(&self.names.tenant_id, "agent_alias_id", &mut self.resolved.agent_alias_id, id.into());
        self
    }

    /// Caller identity ARN
    pub fn require_caller_arn(&self) -> Result<&str> {
        require(&self.resolved.caller_arn, "caller identity ARN")
    }

    /// Knowledge-base role ARN
    pub fn require_kb_role_arn(&self) -> Result<&str> {
        require(&self.resolved.kb_role_arn, "knowledge base role ARN")
    }

    /// Collection ARN
    pub fn require_collection_arn(&self) -> Result<&str> {
        require(&self.resolved.collection_arn, "collection ARN")
    }

    /// Knowledge-base id
    pub fn require_knowledge_base_id(&self) -> Result<&str> {
        require(&self.resolved.knowledge_base_id, "knowledge base id")
    }

    /// Knowledge-base ARN
    pub fn require_knowledge_base_arn(&self) -> Result<&str> {
        require(&self.resolved.knowledge_base_arn, "knowledge base ARN")
    }

    /// Data-source id
    pub fn require_data_source_id(&self) -> Result<&str> {
        require(&self.resolved.data_source_id, "data source id")
    }

    /// Agent role ARN
    pub fn require_agent_role_arn(&self) -> Result<&str> {
        require(&self.resolved.agent_role_arn, "agent role ARN")
    }

    /// Agent id
    pub fn require_agent_id(&self) -> Result<&str> {
        require(&self.resolved.agent_id, "agent id")
    }

    /// Agent alias id
    pub fn require_agent_alias_id(&self) -> Result<&str> {
        require(&self.resolved.agent_alias_id, "agent alias id")
    }
}
