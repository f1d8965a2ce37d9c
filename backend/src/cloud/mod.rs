//! Cloud capability surface
//!
//! The provisioning core never talks to a provider SDK directly. It consumes
//! the narrow, async capability traits defined here, one per cloud service:
//!
//! - [`IdentityApi`]: caller identity
//! - [`StorageApi`]: buckets and objects
//! - [`IamApi`]: managed policies, policy versions, roles
//! - [`CollectionApi`]: vector-search collections, their security/access policies and indexes
//! - [`KnowledgeBaseApi`]: knowledge bases, data sources, ingestion jobs
//! - [`AgentApi`]: agents, knowledge-base associations, aliases
//! - [`AgentRuntimeApi`]: agent invocation (streamed events)
//!
//! Every operation may fail with a [`CloudError`], which is passed through
//! to callers as-is. "Not found" on lookups is expressed as `Ok(None)` or an
//! empty listing rather than an error, since it drives the create branch of
//! every upsert.

pub mod memory;
mod types;

pub use types::*;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Errors reported by a cloud provider
///
/// These are never retried by the provisioning path; they abort the
/// current pipeline run and reach the caller unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// The referenced resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A resource with the same name already exists
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// A service quota was hit (e.g. the IAM policy version limit)
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// The provider throttled the request
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// The caller is not authorized for the operation
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The request was rejected as malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network or transport level failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// IAM keeps at most this many stored versions per managed policy
pub const MAX_POLICY_VERSIONS: usize = 5;

/// IAM attaches at most this many managed policies to one role
pub const MAX_ATTACHED_ROLE_POLICIES: usize = 10;

/// Result alias for capability calls
pub type CloudResult<T> = Result<T, CloudError>;

/// Stream of events produced by an agent invocation
pub type AgentEventStream = BoxStream<'static, CloudResult<AgentEvent>>;

/// Caller identity operations
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Resolve the identity the process is running as
    async fn get_caller_identity(&self) -> CloudResult<CallerIdentity>;
}

/// Object storage operations
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Whether the bucket exists and is reachable
    async fn head_bucket(&self, bucket: &str) -> CloudResult<bool>;

    /// Create a bucket in the given region
    async fn create_bucket(&self, bucket: &str, region: &str) -> CloudResult<()>;

    /// Whether an object exists under `key`
    async fn head_object(&self, bucket: &str, key: &str) -> CloudResult<bool>;

    /// Upload an object
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> CloudResult<()>;
}

/// IAM policy and role operations
#[async_trait]
pub trait IamApi: Send + Sync {
    /// List customer-managed policies
    async fn list_policies(&self) -> CloudResult<Vec<ManagedPolicy>>;

    /// Create a managed policy; its first version becomes the default
    async fn create_policy(
        &self,
        name: &str,
        document: &str,
        description: &str,
    ) -> CloudResult<ManagedPolicy>;

    /// Fetch a single stored version of a policy
    async fn get_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> CloudResult<PolicyVersion>;

    /// List every stored version of a policy
    async fn list_policy_versions(&self, policy_arn: &str) -> CloudResult<Vec<PolicyVersion>>;

    /// Store a new version of a policy
    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> CloudResult<PolicyVersion>;

    /// Delete a non-default policy version
    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> CloudResult<()>;

    /// Look up a role by name
    async fn get_role(&self, role_name: &str) -> CloudResult<Option<Role>>;

    /// Create a role with the given trust policy
    async fn create_role(&self, role_name: &str, assume_role_document: &str) -> CloudResult<Role>;

    /// Attach a managed policy to a role
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> CloudResult<()>;

    /// ARNs of the managed policies attached to a role
    async fn list_attached_role_policies(&self, role_name: &str) -> CloudResult<Vec<String>>;
}

/// Vector-search collection control-plane operations
#[async_trait]
pub trait CollectionApi: Send + Sync {
    /// Names of the security policies of the given kind
    async fn list_security_policies(&self, kind: SecurityPolicyKind) -> CloudResult<Vec<String>>;

    /// Create a security (encryption or network) policy
    async fn create_security_policy(
        &self,
        name: &str,
        kind: SecurityPolicyKind,
        policy: &str,
        description: &str,
    ) -> CloudResult<()>;

    /// Names of the data access policies
    async fn list_access_policies(&self) -> CloudResult<Vec<String>>;

    /// Create a data access policy
    async fn create_access_policy(
        &self,
        name: &str,
        policy: &str,
        description: &str,
    ) -> CloudResult<()>;

    /// List collections
    async fn list_collections(&self) -> CloudResult<Vec<CollectionSummary>>;

    /// Create a vector-search collection
    async fn create_collection(
        &self,
        name: &str,
        description: &str,
    ) -> CloudResult<CollectionSummary>;

    /// Describe a collection by name, including its endpoint once active
    async fn describe_collection(&self, name: &str) -> CloudResult<Option<CollectionDetail>>;

    /// Whether an index exists on the collection endpoint
    async fn index_exists(&self, endpoint: &str, index_name: &str) -> CloudResult<bool>;

    /// Create an index on the collection endpoint
    async fn create_index(
        &self,
        endpoint: &str,
        index_name: &str,
        body: &serde_json::Value,
    ) -> CloudResult<()>;
}

/// Knowledge-base control-plane operations
#[async_trait]
pub trait KnowledgeBaseApi: Send + Sync {
    /// List knowledge bases
    async fn list_knowledge_bases(&self) -> CloudResult<Vec<KnowledgeBaseSummary>>;

    /// Fetch a knowledge base by id
    async fn get_knowledge_base(&self, knowledge_base_id: &str) -> CloudResult<KnowledgeBase>;

    /// Create a knowledge base
    async fn create_knowledge_base(&self, spec: &KnowledgeBaseSpec) -> CloudResult<KnowledgeBase>;

    /// List the data sources of a knowledge base
    async fn list_data_sources(&self, knowledge_base_id: &str)
        -> CloudResult<Vec<DataSourceSummary>>;

    /// Fetch a data source
    async fn get_data_source(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> CloudResult<DataSource>;

    /// Create a data source on a knowledge base
    async fn create_data_source(
        &self,
        knowledge_base_id: &str,
        spec: &DataSourceSpec,
    ) -> CloudResult<DataSource>;

    /// Start an ingestion job for a data source
    async fn start_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> CloudResult<IngestionJob>;

    /// List the ingestion jobs ever started for a data source
    async fn list_ingestion_jobs(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> CloudResult<Vec<IngestionJob>>;

    /// Fetch an ingestion job
    async fn get_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
        ingestion_job_id: &str,
    ) -> CloudResult<IngestionJob>;
}

/// Agent control-plane operations
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// List agents
    async fn list_agents(&self) -> CloudResult<Vec<AgentSummary>>;

    /// Fetch an agent by id
    async fn get_agent(&self, agent_id: &str) -> CloudResult<Agent>;

    /// Create an agent
    async fn create_agent(&self, spec: &AgentSpec) -> CloudResult<Agent>;

    /// Knowledge-base ids associated with an agent version
    async fn list_agent_knowledge_bases(
        &self,
        agent_id: &str,
        agent_version: &str,
    ) -> CloudResult<Vec<String>>;

    /// Associate a knowledge base with an agent version
    async fn associate_knowledge_base(
        &self,
        agent_id: &str,
        agent_version: &str,
        knowledge_base_id: &str,
        description: &str,
    ) -> CloudResult<()>;

    /// Build the agent's draft so it can be invoked
    async fn prepare_agent(&self, agent_id: &str) -> CloudResult<AgentStatus>;

    /// List aliases of an agent
    async fn list_agent_aliases(&self, agent_id: &str) -> CloudResult<Vec<AgentAlias>>;

    /// Fetch an alias
    async fn get_agent_alias(&self, agent_id: &str, alias_id: &str) -> CloudResult<AgentAlias>;

    /// Create an alias pointing at the agent's latest prepared version
    async fn create_agent_alias(&self, agent_id: &str, alias_name: &str)
        -> CloudResult<AgentAlias>;
}

/// Agent runtime operations
#[async_trait]
pub trait AgentRuntimeApi: Send + Sync {
    /// Invoke an agent alias and return its event stream
    async fn invoke_agent(&self, request: &InvokeRequest) -> CloudResult<AgentEventStream>;
}
