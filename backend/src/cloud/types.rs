//! Value types exchanged with the cloud capability traits

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an asynchronously provisioned resource
///
/// Synchronous resources (bucket, role, policy) never report a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    /// Still being provisioned
    Creating,
    /// Ready for use
    Active,
    /// Provisioning failed; no further transition will happen
    Failed,
}

impl ResourceStatus {
    /// Whether no further transition will happen
    pub fn is_terminal(self) -> bool {
        matches!(self, ResourceStatus::Active | ResourceStatus::Failed)
    }

    /// Wire representation
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Creating => "CREATING",
            ResourceStatus::Active => "ACTIVE",
            ResourceStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATING" | "UPDATING" | "PENDING" => Ok(ResourceStatus::Creating),
            "ACTIVE" | "AVAILABLE" => Ok(ResourceStatus::Active),
            "FAILED" | "ERROR" | "CREATE_FAILED" => Ok(ResourceStatus::Failed),
            other => Err(format!("Unknown resource status: {}", other)),
        }
    }
}

/// Kinds of resources the pipeline provisions (used in logs and errors)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Object-storage bucket
    Bucket,
    /// Object uploaded into the bucket
    Document,
    /// IAM managed policy
    IamPolicy,
    /// IAM role
    IamRole,
    /// Collection encryption policy
    EncryptionPolicy,
    /// Collection network policy
    NetworkPolicy,
    /// Collection data access policy
    DataAccessPolicy,
    /// Vector-search collection
    Collection,
    /// Vector index inside a collection
    VectorIndex,
    /// Knowledge base
    KnowledgeBase,
    /// Knowledge-base data source
    DataSource,
    /// Data-source ingestion job
    IngestionJob,
    /// Agent
    Agent,
    /// Agent to knowledge-base association
    AgentKnowledgeBase,
    /// Agent alias
    AgentAlias,
}

impl ResourceKind {
    /// Human readable label
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Bucket => "bucket",
            ResourceKind::Document => "document",
            ResourceKind::IamPolicy => "IAM policy",
            ResourceKind::IamRole => "IAM role",
            ResourceKind::EncryptionPolicy => "encryption policy",
            ResourceKind::NetworkPolicy => "network policy",
            ResourceKind::DataAccessPolicy => "data access policy",
            ResourceKind::Collection => "collection",
            ResourceKind::VectorIndex => "vector index",
            ResourceKind::KnowledgeBase => "knowledge base",
            ResourceKind::DataSource => "data source",
            ResourceKind::IngestionJob => "ingestion job",
            ResourceKind::Agent => "agent",
            ResourceKind::AgentKnowledgeBase => "agent knowledge base association",
            ResourceKind::AgentAlias => "agent alias",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity the process is running as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Account id
    pub account_id: String,
    /// ARN of the calling principal
    pub arn: String,
}

/// Customer-managed IAM policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPolicy {
    /// Policy name
    pub name: String,
    /// Policy ARN
    pub arn: String,
    /// Id of the version currently in force
    pub default_version_id: String,
}

/// One stored version of an IAM policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVersion {
    /// Version id (`v1`, `v2`, ...)
    pub version_id: String,
    /// JSON policy document
    pub document: String,
    /// Whether this version is in force
    pub is_default: bool,
}

/// IAM role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    /// Role name
    pub name: String,
    /// Role ARN
    pub arn: String,
}

/// Kind of collection security policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityPolicyKind {
    /// Encryption-at-rest policy
    Encryption,
    /// Network access policy
    Network,
}

impl SecurityPolicyKind {
    /// Wire representation
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityPolicyKind::Encryption => "encryption",
            SecurityPolicyKind::Network => "network",
        }
    }
}

/// Collection listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSummary {
    /// Collection id
    pub id: String,
    /// Collection name
    pub name: String,
    /// Collection ARN
    pub arn: String,
    /// Lifecycle status
    pub status: ResourceStatus,
}

/// Full collection description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDetail {
    /// Collection id
    pub id: String,
    /// Collection name
    pub name: String,
    /// Collection ARN
    pub arn: String,
    /// Lifecycle status
    pub status: ResourceStatus,
    /// HTTPS endpoint, present once the collection is active
    pub endpoint: Option<String>,
}

/// Knowledge-base listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBaseSummary {
    /// Knowledge-base id
    pub id: String,
    /// Knowledge-base name
    pub name: String,
    /// Lifecycle status
    pub status: ResourceStatus,
}

/// Knowledge base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBase {
    /// Knowledge-base id
    pub id: String,
    /// Knowledge-base name
    pub name: String,
    /// Knowledge-base ARN
    pub arn: String,
    /// Lifecycle status
    pub status: ResourceStatus,
}

/// Field mapping of the vector index backing a knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    /// Metadata field name
    pub metadata_field: String,
    /// Text field name
    pub text_field: String,
    /// Vector field name
    pub vector_field: String,
}

/// Vector store binding of a knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfiguration {
    /// Always `OPENSEARCH_SERVERLESS`
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Collection binding
    pub opensearch_serverless_configuration: OpensearchServerlessConfiguration,
}

/// Collection binding of a knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpensearchServerlessConfiguration {
    /// ARN of the collection
    pub collection_arn: String,
    /// Index inside the collection
    pub vector_index_name: String,
    /// Field mapping
    pub field_mapping: FieldMapping,
}

/// Request to create a knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseSpec {
    /// Knowledge-base name
    pub name: String,
    /// Description
    pub description: String,
    /// Service role the knowledge base runs as
    pub role_arn: String,
    /// Embedding model used to vectorise documents
    pub embedding_model_arn: String,
    /// Vector store binding
    pub storage_configuration: StorageConfiguration,
}

/// Data-source listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceSummary {
    /// Data-source id
    pub id: String,
    /// Data-source name
    pub name: String,
    /// Lifecycle status
    pub status: ResourceStatus,
}

/// Data source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    /// Data-source id
    pub id: String,
    /// Data-source name
    pub name: String,
    /// Owning knowledge base
    pub knowledge_base_id: String,
    /// Lifecycle status
    pub status: ResourceStatus,
}

/// Bucket location of a data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Configuration {
    /// Bucket ARN
    pub bucket_arn: String,
    /// Key prefixes to ingest
    pub inclusion_prefixes: Vec<String>,
}

/// Where a data source reads documents from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfiguration {
    /// Always `S3`
    #[serde(rename = "type")]
    pub source_type: String,
    /// Bucket location
    pub s3_configuration: S3Configuration,
}

/// Fixed-size chunking parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedSizeChunking {
    /// Maximum tokens per chunk
    pub max_tokens: u32,
    /// Overlap between consecutive chunks, in percent
    pub overlap_percentage: u32,
}

/// How ingested documents are chunked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingConfiguration {
    /// Always `FIXED_SIZE`
    pub chunking_strategy: String,
    /// Chunk sizing
    pub fixed_size_chunking_configuration: FixedSizeChunking,
}

/// Request to create a data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSpec {
    /// Data-source name
    pub name: String,
    /// Description
    pub description: String,
    /// Document location
    pub data_source_configuration: DataSourceConfiguration,
    /// Chunking applied at ingestion time
    pub chunking_configuration: ChunkingConfiguration,
}

/// Status of an ingestion job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestionStatus {
    /// Queued
    Starting,
    /// Running
    InProgress,
    /// Finished successfully
    Complete,
    /// Finished with an error
    Failed,
}

impl IngestionStatus {
    /// Map onto the generic lifecycle
    pub fn lifecycle(self) -> ResourceStatus {
        match self {
            IngestionStatus::Starting | IngestionStatus::InProgress => ResourceStatus::Creating,
            IngestionStatus::Complete => ResourceStatus::Active,
            IngestionStatus::Failed => ResourceStatus::Failed,
        }
    }
}

/// Ingestion job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionJob {
    /// Job id
    pub id: String,
    /// Data source the job ingests
    pub data_source_id: String,
    /// Job status
    pub status: IngestionStatus,
}

/// Status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentStatus {
    /// Being created
    Creating,
    /// Created but never prepared, or modified since the last prepare
    NotPrepared,
    /// Prepare in progress
    Preparing,
    /// Draft prepared and invokable
    Prepared,
    /// Being updated
    Updating,
    /// Creation or preparation failed
    Failed,
}

impl AgentStatus {
    /// Map onto the generic lifecycle
    ///
    /// Before association an agent is usable once it leaves `Creating`;
    /// before alias creation it must be `Prepared`.
    pub fn lifecycle(self, require_prepared: bool) -> ResourceStatus {
        match self {
            AgentStatus::Creating | AgentStatus::Preparing | AgentStatus::Updating => {
                ResourceStatus::Creating
            }
            AgentStatus::NotPrepared if require_prepared => ResourceStatus::Creating,
            AgentStatus::NotPrepared | AgentStatus::Prepared => ResourceStatus::Active,
            AgentStatus::Failed => ResourceStatus::Failed,
        }
    }
}

/// Agent listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    /// Agent id
    pub id: String,
    /// Agent name
    pub name: String,
    /// Agent status
    pub status: AgentStatus,
}

/// Agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    /// Agent id
    pub id: String,
    /// Agent name
    pub name: String,
    /// Agent ARN
    pub arn: String,
    /// Agent status
    pub status: AgentStatus,
}

/// Request to create an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// Agent name
    pub agent_name: String,
    /// Execution role
    pub agent_resource_role_arn: String,
    /// Description
    pub description: String,
    /// Session idle timeout
    #[serde(rename = "idleSessionTTLInSeconds")]
    pub idle_session_ttl_secs: u32,
    /// Foundation model id
    pub foundation_model: String,
    /// System instruction
    pub instruction: String,
}

/// Status of an agent alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasStatus {
    /// Being created
    Creating,
    /// Pointing at a prepared version
    Prepared,
    /// Being updated
    Updating,
    /// Creation failed
    Failed,
}

impl AliasStatus {
    /// Map onto the generic lifecycle
    pub fn lifecycle(self) -> ResourceStatus {
        match self {
            AliasStatus::Creating | AliasStatus::Updating => ResourceStatus::Creating,
            AliasStatus::Prepared => ResourceStatus::Active,
            AliasStatus::Failed => ResourceStatus::Failed,
        }
    }
}

/// Agent alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAlias {
    /// Alias id
    pub id: String,
    /// Alias name
    pub name: String,
    /// Alias status
    pub status: AliasStatus,
}

/// Agent invocation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeRequest {
    /// Agent id
    pub agent_id: String,
    /// Alias id
    pub agent_alias_id: String,
    /// Conversation session id
    pub session_id: String,
    /// User question
    pub input_text: String,
    /// Ask the agent to emit trace events
    pub enable_trace: bool,
    /// Close the session after this turn
    pub end_session: bool,
}

/// One event of an agent invocation stream
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Fragment of the answer (UTF-8 bytes)
    Chunk(Vec<u8>),
    /// Diagnostic trace payload
    Trace(serde_json::Value),
    /// Any other event tag
    Other {
        /// Event tag as reported on the wire
        tag: String,
        /// Event payload
        payload: serde_json::Value,
    },
}
