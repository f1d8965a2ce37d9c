//! Pipeline stages and the provisioning report

use crate::invoke::Invocation;
use crate::provisioners::{DocumentSync, ResourceHandle};
use crate::tenant::ResolvedResources;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Ordered stages of a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Document bucket
    Bucket,
    /// Document upload
    Documents,
    /// Knowledge-base role and policies
    KnowledgeBaseRole,
    /// Collection policies, collection and vector index
    Collection,
    /// Knowledge base
    KnowledgeBase,
    /// Data source and ingestion
    DataSource,
    /// Agent role and policies
    AgentRole,
    /// Agent
    Agent,
    /// Knowledge-base association
    Association,
    /// Agent preparation
    Prepare,
    /// Agent alias
    Alias,
    /// Verification question
    Invoke,
}

impl Stage {
    /// Every stage in execution order
    pub const ALL: [Stage; 12] = [
        Stage::Bucket,
        Stage::Documents,
        Stage::KnowledgeBaseRole,
        Stage::Collection,
        Stage::KnowledgeBase,
        Stage::DataSource,
        Stage::AgentRole,
        Stage::Agent,
        Stage::Association,
        Stage::Prepare,
        Stage::Alias,
        Stage::Invoke,
    ];

    /// Log label
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Bucket => "bucket",
            Stage::Documents => "documents",
            Stage::KnowledgeBaseRole => "knowledge_base_role",
            Stage::Collection => "collection",
            Stage::KnowledgeBase => "knowledge_base",
            Stage::DataSource => "data_source",
            Stage::AgentRole => "agent_role",
            Stage::Agent => "agent",
            Stage::Association => "association",
            Stage::Prepare => "prepare",
            Stage::Alias => "alias",
            Stage::Invoke => "invoke",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a provisioning run did
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningReport {
    /// Tenant id
    pub tenant: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Every resource the run checked, in provisioning order
    pub resources: Vec<ResourceHandle>,
    /// Document upload outcome
    pub documents: DocumentSync,
    /// Ingestion job started by this run
    pub ingestion_job_id: Option<String>,
    /// Identifiers resolved by the run
    pub resolved: ResolvedResources,
    /// Answer to the verification question, when one was asked
    pub invocation: Option<Invocation>,
}

impl ProvisioningReport {
    /// Resources created or changed by this run
    pub fn created(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.resources.iter().filter(|r| r.created)
    }

    /// Whether the run only performed existence checks
    pub fn is_noop(&self) -> bool {
        self.created().next().is_none() && !self.documents.changed()
    }

    /// Answer text, empty when no question was asked
    pub fn answer(&self) -> &str {
        self.invocation
            .as_ref()
            .map(|i| i.answer.as_str())
            .unwrap_or_default()
    }
}
