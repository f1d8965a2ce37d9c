//! In-memory simulated cloud
//!
//! Implements every capability trait against process-local state so the
//! whole pipeline can run without a provider account. Asynchronous resources
//! start in a transitional status and settle after a configurable number of
//! status reads; individual resource kinds can be forced to fail and
//! individual operations can be made to return an error. Every call is
//! recorded so callers can assert on ordering and on which calls mutated
//! state.

use super::*;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

/// Operations that change provider state
const MUTATING_OPERATIONS: &[&str] = &[
    "create_bucket",
    "put_object",
    "create_policy",
    "create_policy_version",
    "delete_policy_version",
    "create_role",
    "attach_role_policy",
    "create_security_policy",
    "create_access_policy",
    "create_collection",
    "create_index",
    "create_knowledge_base",
    "create_data_source",
    "start_ingestion_job",
    "create_agent",
    "associate_knowledge_base",
    "prepare_agent",
    "create_agent_alias",
];

/// How simulated resources behave
#[derive(Debug, Clone)]
pub struct SimulationProfile {
    /// Status reads that still report a transitional status before a
    /// resource settles
    pub polls_until_ready: u32,
    /// Resource kinds that settle in `FAILED` instead of `ACTIVE`
    pub failing: HashSet<ResourceKind>,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            polls_until_ready: 1,
            failing: HashSet::new(),
        }
    }
}

/// One recorded capability call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Operation name (`create_collection`, `get_role`, ...)
    pub operation: &'static str,
    /// Name or id the call targeted
    pub target: String,
}

impl CallRecord {
    /// Whether the call changed provider state
    pub fn is_mutating(&self) -> bool {
        MUTATING_OPERATIONS.contains(&self.operation)
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition<S> {
    remaining: u32,
    target: S,
}

/// Advance a pending transition by one status read
fn advance<S: Copy>(status: &mut S, transition: &mut Option<Transition<S>>) {
    if let Some(t) = transition {
        if t.remaining > 0 {
            t.remaining -= 1;
        } else {
            *status = t.target;
            *transition = None;
        }
    }
}

#[derive(Debug)]
struct PolicyEntry {
    name: String,
    versions: Vec<PolicyVersion>,
    next_version: u32,
}

impl PolicyEntry {
    fn default_version_id(&self) -> String {
        self.versions
            .iter()
            .find(|v| v.is_default)
            .map(|v| v.version_id.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct RoleEntry {
    role: Role,
    attached: Vec<String>,
}

#[derive(Debug)]
struct Tracked<T, S> {
    value: T,
    status: S,
    transition: Option<Transition<S>>,
}

#[derive(Debug)]
struct CollectionEntry {
    summary: CollectionSummary,
    transition: Option<Transition<ResourceStatus>>,
}

#[derive(Debug)]
struct AgentEntry {
    agent: Agent,
    transition: Option<Transition<AgentStatus>>,
    knowledge_bases: Vec<String>,
}

#[derive(Debug)]
struct AliasEntry {
    agent_id: String,
    alias: AgentAlias,
    transition: Option<Transition<AliasStatus>>,
}

#[derive(Default)]
struct State {
    calls: Vec<CallRecord>,
    injected: HashMap<&'static str, CloudError>,
    buckets: HashMap<String, HashMap<String, Vec<u8>>>,
    policies: HashMap<String, PolicyEntry>,
    roles: HashMap<String, RoleEntry>,
    security_policies: HashSet<(&'static str, String)>,
    access_policies: HashMap<String, String>,
    collections: HashMap<String, CollectionEntry>,
    indexes: HashMap<(String, String), serde_json::Value>,
    knowledge_bases: HashMap<String, Tracked<KnowledgeBase, ResourceStatus>>,
    data_sources: HashMap<String, Tracked<DataSource, ResourceStatus>>,
    ingestion_jobs: HashMap<String, Tracked<IngestionJob, IngestionStatus>>,
    agents: HashMap<String, AgentEntry>,
    aliases: HashMap<String, AliasEntry>,
    invocation_events: Option<Vec<CloudResult<AgentEvent>>>,
    next_id: u64,
}

impl State {
    fn record(&mut self, operation: &'static str, target: &str) -> CloudResult<()> {
        self.calls.push(CallRecord {
            operation,
            target: target.to_string(),
        });
        match self.injected.remove(operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:010X}", self.next_id)
    }
}

/// Simulated provider implementing every capability trait
pub struct InMemoryCloud {
    region: String,
    account_id: String,
    profile: SimulationProfile,
    state: Mutex<State>,
}

impl InMemoryCloud {
    /// Create a simulated account in `region`
    pub fn new(region: &str, account_id: &str) -> Self {
        Self::with_profile(region, account_id, SimulationProfile::default())
    }

    /// Create a simulated account with a custom behaviour profile
    pub fn with_profile(region: &str, account_id: &str, profile: SimulationProfile) -> Self {
        Self {
            region: region.to_string(),
            account_id: account_id.to_string(),
            profile,
            state: Mutex::new(State::default()),
        }
    }

    /// Make the next call to `operation` fail with `error`
    pub async fn inject_error(&self, operation: &'static str, error: CloudError) {
        self.state.lock().await.injected.insert(operation, error);
    }

    /// Replace the events returned by every subsequent invocation
    pub async fn set_invocation_events(&self, events: Vec<CloudResult<AgentEvent>>) {
        self.state.lock().await.invocation_events = Some(events);
    }

    /// Every call recorded so far, in order
    pub async fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().await.calls.clone()
    }

    /// Recorded calls that changed provider state
    pub async fn mutating_calls(&self) -> Vec<CallRecord> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    /// Forget recorded calls
    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Stored versions of the policy named `name`
    pub async fn policy_versions(&self, name: &str) -> Vec<PolicyVersion> {
        self.state
            .lock()
            .await
            .policies
            .values()
            .find(|p| p.name == name)
            .map(|p| p.versions.clone())
            .unwrap_or_default()
    }

    /// Object keys stored in `bucket`, sorted
    pub async fn object_keys(&self, bucket: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut keys: Vec<String> = state
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Names of the collections that exist
    pub async fn collection_names(&self) -> Vec<String> {
        self.state.lock().await.collections.keys().cloned().collect()
    }

    /// Document of the data access policy named `name`
    pub async fn access_policy(&self, name: &str) -> Option<String> {
        self.state.lock().await.access_policies.get(name).cloned()
    }

    /// ARNs attached to a role
    pub async fn attached_policies(&self, role_name: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .roles
            .get(role_name)
            .map(|r| r.attached.clone())
            .unwrap_or_default()
    }

    fn settle<S: Copy>(&self, kind: ResourceKind, ok: S, failed: S) -> Transition<S> {
        Transition {
            remaining: self.profile.polls_until_ready,
            target: if self.profile.failing.contains(&kind) {
                failed
            } else {
                ok
            },
        }
    }

    fn arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:aws:{}:{}:{}:{}",
            service, self.region, self.account_id, resource
        )
    }
}

#[async_trait]
impl IdentityApi for InMemoryCloud {
    async fn get_caller_identity(&self) -> CloudResult<CallerIdentity> {
        self.state
            .lock()
            .await
            .record("get_caller_identity", &self.account_id)?;
        Ok(CallerIdentity {
            account_id: self.account_id.clone(),
            arn: format!(
                "arn:aws:sts::{}:assumed-role/Admin/simulated-session",
                self.account_id
            ),
        })
    }
}

#[async_trait]
impl StorageApi for InMemoryCloud {
    async fn head_bucket(&self, bucket: &str) -> CloudResult<bool> {
        let mut state = self.state.lock().await;
        state.record("head_bucket", bucket)?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record("create_bucket", bucket)?;
        if region != self.region {
            return Err(CloudError::Validation(format!(
                "Location constraint {} does not match endpoint region {}",
                region, self.region
            )));
        }
        if state.buckets.contains_key(bucket) {
            return Err(CloudError::AlreadyExists(bucket.to_string()));
        }
        state.buckets.insert(bucket.to_string(), HashMap::new());
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> CloudResult<bool> {
        let mut state = self.state.lock().await;
        state.record("head_object", key)?;
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| CloudError::NotFound(bucket.to_string()))?;
        Ok(objects.contains_key(key))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record("put_object", key)?;
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::NotFound(bucket.to_string()))?;
        objects.insert(key.to_string(), body);
        Ok(())
    }
}

#[async_trait]
impl IamApi for InMemoryCloud {
    async fn list_policies(&self) -> CloudResult<Vec<ManagedPolicy>> {
        let mut state = self.state.lock().await;
        state.record("list_policies", "local")?;
        Ok(state
            .policies
            .iter()
            .map(|(arn, p)| ManagedPolicy {
                name: p.name.clone(),
                arn: arn.clone(),
                default_version_id: p.default_version_id(),
            })
            .collect())
    }

    async fn create_policy(
        &self,
        name: &str,
        document: &str,
        _description: &str,
    ) -> CloudResult<ManagedPolicy> {
        let mut state = self.state.lock().await;
        state.record("create_policy", name)?;
        if state.policies.values().any(|p| p.name == name) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        let arn = format!("arn:aws:iam::{}:policy/{}", self.account_id, name);
        state.policies.insert(
            arn.clone(),
            PolicyEntry {
                name: name.to_string(),
                versions: vec![PolicyVersion {
                    version_id: "v1".to_string(),
                    document: document.to_string(),
                    is_default: true,
                }],
                next_version: 2,
            },
        );
        Ok(ManagedPolicy {
            name: name.to_string(),
            arn,
            default_version_id: "v1".to_string(),
        })
    }

    async fn get_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> CloudResult<PolicyVersion> {
        let mut state = self.state.lock().await;
        state.record("get_policy_version", policy_arn)?;
        state
            .policies
            .get(policy_arn)
            .and_then(|p| p.versions.iter().find(|v| v.version_id == version_id))
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("{}:{}", policy_arn, version_id)))
    }

    async fn list_policy_versions(&self, policy_arn: &str) -> CloudResult<Vec<PolicyVersion>> {
        let mut state = self.state.lock().await;
        state.record("list_policy_versions", policy_arn)?;
        state
            .policies
            .get(policy_arn)
            .map(|p| p.versions.clone())
            .ok_or_else(|| CloudError::NotFound(policy_arn.to_string()))
    }

    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> CloudResult<PolicyVersion> {
        let mut state = self.state.lock().await;
        state.record("create_policy_version", policy_arn)?;
        let policy = state
            .policies
            .get_mut(policy_arn)
            .ok_or_else(|| CloudError::NotFound(policy_arn.to_string()))?;
        if policy.versions.len() >= MAX_POLICY_VERSIONS {
            return Err(CloudError::LimitExceeded(format!(
                "A managed policy can have up to {} versions: {}",
                MAX_POLICY_VERSIONS, policy_arn
            )));
        }
        if set_as_default {
            for version in &mut policy.versions {
                version.is_default = false;
            }
        }
        let version = PolicyVersion {
            version_id: format!("v{}", policy.next_version),
            document: document.to_string(),
            is_default: set_as_default,
        };
        policy.next_version += 1;
        policy.versions.push(version.clone());
        Ok(version)
    }

    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record("delete_policy_version", version_id)?;
        let policy = state
            .policies
            .get_mut(policy_arn)
            .ok_or_else(|| CloudError::NotFound(policy_arn.to_string()))?;
        let index = policy
            .versions
            .iter()
            .position(|v| v.version_id == version_id)
            .ok_or_else(|| CloudError::NotFound(version_id.to_string()))?;
        if policy.versions[index].is_default {
            return Err(CloudError::Validation(format!(
                "Cannot delete the default version {} of {}",
                version_id, policy_arn
            )));
        }
        policy.versions.remove(index);
        Ok(())
    }

    async fn get_role(&self, role_name: &str) -> CloudResult<Option<Role>> {
        let mut state = self.state.lock().await;
        state.record("get_role", role_name)?;
        Ok(state.roles.get(role_name).map(|r| r.role.clone()))
    }

    async fn create_role(&self, role_name: &str, _assume_role_document: &str) -> CloudResult<Role> {
        let mut state = self.state.lock().await;
        state.record("create_role", role_name)?;
        if state.roles.contains_key(role_name) {
            return Err(CloudError::AlreadyExists(role_name.to_string()));
        }
        let role = Role {
            name: role_name.to_string(),
            arn: format!("arn:aws:iam::{}:role/{}", self.account_id, role_name),
        };
        state.roles.insert(
            role_name.to_string(),
            RoleEntry {
                role: role.clone(),
                attached: Vec::new(),
            },
        );
        Ok(role)
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record("attach_role_policy", policy_arn)?;
        if !state.policies.contains_key(policy_arn) {
            return Err(CloudError::NotFound(policy_arn.to_string()));
        }
        let role = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| CloudError::NotFound(role_name.to_string()))?;
        if !role.attached.iter().any(|a| a == policy_arn) {
            if role.attached.len() >= MAX_ATTACHED_ROLE_POLICIES {
                return Err(CloudError::LimitExceeded(format!(
                    "role {} already has {} managed policies attached",
                    role_name, MAX_ATTACHED_ROLE_POLICIES
                )));
            }
            role.attached.push(policy_arn.to_string());
        }
        Ok(())
    }

    async fn list_attached_role_policies(&self, role_name: &str) -> CloudResult<Vec<String>> {
        let mut state = self.state.lock().await;
        state.record("list_attached_role_policies", role_name)?;
        state
            .roles
            .get(role_name)
            .map(|r| r.attached.clone())
            .ok_or_else(|| CloudError::NotFound(role_name.to_string()))
    }
}

#[async_trait]
impl CollectionApi for InMemoryCloud {
    async fn list_security_policies(&self, kind: SecurityPolicyKind) -> CloudResult<Vec<String>> {
        let mut state = self.state.lock().await;
        state.record("list_security_policies", kind.as_str())?;
        Ok(state
            .security_policies
            .iter()
            .filter(|(k, _)| *k == kind.as_str())
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn create_security_policy(
        &self,
        name: &str,
        kind: SecurityPolicyKind,
        policy: &str,
        _description: &str,
    ) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record("create_security_policy", name)?;
        serde_json::from_str::<serde_json::Value>(policy)
            .map_err(|e| CloudError::Validation(format!("Malformed policy {}: {}", name, e)))?;
        if !state
            .security_policies
            .insert((kind.as_str(), name.to_string()))
        {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    async fn list_access_policies(&self) -> CloudResult<Vec<String>> {
        let mut state = self.state.lock().await;
        state.record("list_access_policies", "data")?;
        Ok(state.access_policies.keys().cloned().collect())
    }

    async fn create_access_policy(
        &self,
        name: &str,
        policy: &str,
        _description: &str,
    ) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record("create_access_policy", name)?;
        if state.access_policies.contains_key(name) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        state
            .access_policies
            .insert(name.to_string(), policy.to_string());
        Ok(())
    }

    async fn list_collections(&self) -> CloudResult<Vec<CollectionSummary>> {
        let mut state = self.state.lock().await;
        state.record("list_collections", "all")?;
        Ok(state
            .collections
            .values()
            .map(|c| c.summary.clone())
            .collect())
    }

    async fn create_collection(
        &self,
        name: &str,
        _description: &str,
    ) -> CloudResult<CollectionSummary> {
        let transition = self.settle(
            ResourceKind::Collection,
            ResourceStatus::Active,
            ResourceStatus::Failed,
        );
        let mut state = self.state.lock().await;
        state.record("create_collection", name)?;
        if state.collections.contains_key(name) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        let id = state.next_id().to_ascii_lowercase();
        let summary = CollectionSummary {
            arn: self.arn("aoss", &format!("collection/{}", id)),
            id,
            name: name.to_string(),
            status: ResourceStatus::Creating,
        };
        state.collections.insert(
            name.to_string(),
            CollectionEntry {
                summary: summary.clone(),
                transition: Some(transition),
            },
        );
        Ok(summary)
    }

    async fn describe_collection(&self, name: &str) -> CloudResult<Option<CollectionDetail>> {
        let mut state = self.state.lock().await;
        state.record("describe_collection", name)?;
        let region = &self.region;
        Ok(state.collections.get_mut(name).map(|entry| {
            advance(&mut entry.summary.status, &mut entry.transition);
            let summary = &entry.summary;
            CollectionDetail {
                id: summary.id.clone(),
                name: summary.name.clone(),
                arn: summary.arn.clone(),
                status: summary.status,
                endpoint: (summary.status == ResourceStatus::Active)
                    .then(|| format!("https://{}.{}.aoss.amazonaws.com", summary.id, region)),
            }
        }))
    }

    async fn index_exists(&self, endpoint: &str, index_name: &str) -> CloudResult<bool> {
        let mut state = self.state.lock().await;
        state.record("index_exists", index_name)?;
        Ok(state
            .indexes
            .contains_key(&(endpoint.to_string(), index_name.to_string())))
    }

    async fn create_index(
        &self,
        endpoint: &str,
        index_name: &str,
        body: &serde_json::Value,
    ) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record("create_index", index_name)?;
        let key = (endpoint.to_string(), index_name.to_string());
        if state.indexes.contains_key(&key) {
            return Err(CloudError::AlreadyExists(index_name.to_string()));
        }
        state.indexes.insert(key, body.clone());
        Ok(())
    }
}

#[async_trait]
impl KnowledgeBaseApi for InMemoryCloud {
    async fn list_knowledge_bases(&self) -> CloudResult<Vec<KnowledgeBaseSummary>> {
        let mut state = self.state.lock().await;
        state.record("list_knowledge_bases", "all")?;
        Ok(state
            .knowledge_bases
            .values()
            .map(|kb| KnowledgeBaseSummary {
                id: kb.value.id.clone(),
                name: kb.value.name.clone(),
                status: kb.status,
            })
            .collect())
    }

    async fn get_knowledge_base(&self, knowledge_base_id: &str) -> CloudResult<KnowledgeBase> {
        let mut state = self.state.lock().await;
        state.record("get_knowledge_base", knowledge_base_id)?;
        let entry = state
            .knowledge_bases
            .get_mut(knowledge_base_id)
            .ok_or_else(|| CloudError::NotFound(knowledge_base_id.to_string()))?;
        advance(&mut entry.status, &mut entry.transition);
        Ok(KnowledgeBase {
            status: entry.status,
            ..entry.value.clone()
        })
    }

    async fn create_knowledge_base(&self, spec: &KnowledgeBaseSpec) -> CloudResult<KnowledgeBase> {
        let transition = self.settle(
            ResourceKind::KnowledgeBase,
            ResourceStatus::Active,
            ResourceStatus::Failed,
        );
        let mut state = self.state.lock().await;
        state.record("create_knowledge_base", &spec.name)?;
        if state
            .knowledge_bases
            .values()
            .any(|kb| kb.value.name == spec.name)
        {
            return Err(CloudError::AlreadyExists(spec.name.clone()));
        }
        let collection_arn = &spec
            .storage_configuration
            .opensearch_serverless_configuration
            .collection_arn;
        if !state
            .collections
            .values()
            .any(|c| &c.summary.arn == collection_arn)
        {
            return Err(CloudError::Validation(format!(
                "Unknown collection {}",
                collection_arn
            )));
        }
        if !state.roles.values().any(|r| r.role.arn == spec.role_arn) {
            return Err(CloudError::Validation(format!(
                "Unknown role {}",
                spec.role_arn
            )));
        }
        let id = state.next_id();
        let kb = KnowledgeBase {
            arn: self.arn("bedrock", &format!("knowledge-base/{}", id)),
            id: id.clone(),
            name: spec.name.clone(),
            status: ResourceStatus::Creating,
        };
        state.knowledge_bases.insert(
            id,
            Tracked {
                value: kb.clone(),
                status: ResourceStatus::Creating,
                transition: Some(transition),
            },
        );
        Ok(kb)
    }

    async fn list_data_sources(
        &self,
        knowledge_base_id: &str,
    ) -> CloudResult<Vec<DataSourceSummary>> {
        let mut state = self.state.lock().await;
        state.record("list_data_sources", knowledge_base_id)?;
        Ok(state
            .data_sources
            .values()
            .filter(|ds| ds.value.knowledge_base_id == knowledge_base_id)
            .map(|ds| DataSourceSummary {
                id: ds.value.id.clone(),
                name: ds.value.name.clone(),
                status: ds.status,
            })
            .collect())
    }

    async fn get_data_source(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> CloudResult<DataSource> {
        let mut state = self.state.lock().await;
        state.record("get_data_source", data_source_id)?;
        let entry = state
            .data_sources
            .get_mut(data_source_id)
            .filter(|ds| ds.value.knowledge_base_id == knowledge_base_id)
            .ok_or_else(|| CloudError::NotFound(data_source_id.to_string()))?;
        advance(&mut entry.status, &mut entry.transition);
        Ok(DataSource {
            status: entry.status,
            ..entry.value.clone()
        })
    }

    async fn create_data_source(
        &self,
        knowledge_base_id: &str,
        spec: &DataSourceSpec,
    ) -> CloudResult<DataSource> {
        let mut state = self.state.lock().await;
        state.record("create_data_source", &spec.name)?;
        if !state.knowledge_bases.contains_key(knowledge_base_id) {
            return Err(CloudError::NotFound(knowledge_base_id.to_string()));
        }
        if state
            .data_sources
            .values()
            .any(|ds| ds.value.knowledge_base_id == knowledge_base_id && ds.value.name == spec.name)
        {
            return Err(CloudError::AlreadyExists(spec.name.clone()));
        }
        let id = state.next_id();
        let ds = DataSource {
            id: id.clone(),
            name: spec.name.clone(),
            knowledge_base_id: knowledge_base_id.to_string(),
            status: ResourceStatus::Active,
        };
        state.data_sources.insert(
            id,
            Tracked {
                value: ds.clone(),
                status: ResourceStatus::Active,
                transition: None,
            },
        );
        Ok(ds)
    }

    async fn start_ingestion_job(
        &self,
        knowledge_base_id: &str,
        data_source_id: &str,
    ) -> CloudResult<IngestionJob> {
        let transition = self.settle(
            ResourceKind::IngestionJob,
            IngestionStatus::Complete,
            IngestionStatus::Failed,
        );
        let mut state = self.state.lock().await;
        state.record("start_ingestion_job", data_source_id)?;
        if !state
            .data_sources
            .get(data_source_id)
            .is_some_and(|ds| ds.value.knowledge_base_id == knowledge_base_id)
        {
            return Err(CloudError::NotFound(data_source_id.to_string()));
        }
        let id = state.next_id();
        let job = IngestionJob {
            id: id.clone(),
            data_source_id: data_source_id.to_string(),
            status: IngestionStatus::Starting,
        };
        state.ingestion_jobs.insert(
            id,
            Tracked {
                value: job.clone(),
                status: IngestionStatus::Starting,
                transition: Some(transition),
            },
        );
        Ok(job)
    }

    async fn list_ingestion_jobs(
        &self,
        _knowledge_base_id: &str,
        data_source_id: &str,
    ) -> CloudResult<Vec<IngestionJob>> {
        let mut state = self.state.lock().await;
        state.record("list_ingestion_jobs", data_source_id)?;
        let mut jobs: Vec<IngestionJob> = state
            .ingestion_jobs
            .values_mut()
            .filter(|job| job.value.data_source_id == data_source_id)
            .map(|job| {
                advance(&mut job.status, &mut job.transition);
                IngestionJob {
                    status: job.status,
                    ..job.value.clone()
                }
            })
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    async fn get_ingestion_job(
        &self,
        _knowledge_base_id: &str,
        _data_source_id: &str,
        ingestion_job_id: &str,
    ) -> CloudResult<IngestionJob> {
        let mut state = self.state.lock().await;
        state.record("get_ingestion_job", ingestion_job_id)?;
        let entry = state
            .ingestion_jobs
            .get_mut(ingestion_job_id)
            .ok_or_else(|| CloudError::NotFound(ingestion_job_id.to_string()))?;
        advance(&mut entry.status, &mut entry.transition);
        Ok(IngestionJob {
            status: entry.status,
            ..entry.value.clone()
        })
    }
}

#[async_trait]
impl AgentApi for InMemoryCloud {
    async fn list_agents(&self) -> CloudResult<Vec<AgentSummary>> {
        let mut state = self.state.lock().await;
        state.record("list_agents", "all")?;
        Ok(state
            .agents
            .values()
            .map(|a| AgentSummary {
                id: a.agent.id.clone(),
                name: a.agent.name.clone(),
                status: a.agent.status,
            })
            .collect())
    }

    async fn get_agent(&self, agent_id: &str) -> CloudResult<Agent> {
        let mut state = self.state.lock().await;
        state.record("get_agent", agent_id)?;
        let entry = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CloudError::NotFound(agent_id.to_string()))?;
        advance(&mut entry.agent.status, &mut entry.transition);
        Ok(entry.agent.clone())
    }

    async fn create_agent(&self, spec: &AgentSpec) -> CloudResult<Agent> {
        let transition = self.settle(
            ResourceKind::Agent,
            AgentStatus::NotPrepared,
            AgentStatus::Failed,
        );
        let mut state = self.state.lock().await;
        state.record("create_agent", &spec.agent_name)?;
        if state
            .agents
            .values()
            .any(|a| a.agent.name == spec.agent_name)
        {
            return Err(CloudError::AlreadyExists(spec.agent_name.clone()));
        }
        if !state
            .roles
            .values()
            .any(|r| r.role.arn == spec.agent_resource_role_arn)
        {
            return Err(CloudError::Validation(format!(
                "Unknown role {}",
                spec.agent_resource_role_arn
            )));
        }
        let id = state.next_id();
        let agent = Agent {
            arn: self.arn("bedrock", &format!("agent/{}", id)),
            id: id.clone(),
            name: spec.agent_name.clone(),
            status: AgentStatus::Creating,
        };
        state.agents.insert(
            id,
            AgentEntry {
                agent: agent.clone(),
                transition: Some(transition),
                knowledge_bases: Vec::new(),
            },
        );
        Ok(agent)
    }

    async fn list_agent_knowledge_bases(
        &self,
        agent_id: &str,
        _agent_version: &str,
    ) -> CloudResult<Vec<String>> {
        let mut state = self.state.lock().await;
        state.record("list_agent_knowledge_bases", agent_id)?;
        state
            .agents
            .get(agent_id)
            .map(|a| a.knowledge_bases.clone())
            .ok_or_else(|| CloudError::NotFound(agent_id.to_string()))
    }

    async fn associate_knowledge_base(
        &self,
        agent_id: &str,
        _agent_version: &str,
        knowledge_base_id: &str,
        _description: &str,
    ) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record("associate_knowledge_base", knowledge_base_id)?;
        if !state.knowledge_bases.contains_key(knowledge_base_id) {
            return Err(CloudError::NotFound(knowledge_base_id.to_string()));
        }
        let entry = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CloudError::NotFound(agent_id.to_string()))?;
        if entry.agent.status == AgentStatus::Creating {
            return Err(CloudError::Validation(format!(
                "Agent {} is still being created",
                agent_id
            )));
        }
        if entry.knowledge_bases.iter().any(|kb| kb == knowledge_base_id) {
            return Err(CloudError::AlreadyExists(knowledge_base_id.to_string()));
        }
        entry.knowledge_bases.push(knowledge_base_id.to_string());
        entry.agent.status = AgentStatus::NotPrepared;
        Ok(())
    }

    async fn prepare_agent(&self, agent_id: &str) -> CloudResult<AgentStatus> {
        let transition = self.settle(
            ResourceKind::Agent,
            AgentStatus::Prepared,
            AgentStatus::Failed,
        );
        let mut state = self.state.lock().await;
        state.record("prepare_agent", agent_id)?;
        let entry = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CloudError::NotFound(agent_id.to_string()))?;
        if matches!(
            entry.agent.status,
            AgentStatus::Creating | AgentStatus::Preparing
        ) {
            return Err(CloudError::Validation(format!(
                "Agent {} cannot be prepared while {:?}",
                agent_id, entry.agent.status
            )));
        }
        entry.agent.status = AgentStatus::Preparing;
        entry.transition = Some(transition);
        Ok(AgentStatus::Preparing)
    }

    async fn list_agent_aliases(&self, agent_id: &str) -> CloudResult<Vec<AgentAlias>> {
        let mut state = self.state.lock().await;
        state.record("list_agent_aliases", agent_id)?;
        Ok(state
            .aliases
            .values()
            .filter(|a| a.agent_id == agent_id)
            .map(|a| a.alias.clone())
            .collect())
    }

    async fn get_agent_alias(&self, agent_id: &str, alias_id: &str) -> CloudResult<AgentAlias> {
        let mut state = self.state.lock().await;
        state.record("get_agent_alias", alias_id)?;
        let entry = state
            .aliases
            .get_mut(alias_id)
            .filter(|a| a.agent_id == agent_id)
            .ok_or_else(|| CloudError::NotFound(alias_id.to_string()))?;
        advance(&mut entry.alias.status, &mut entry.transition);
        Ok(entry.alias.clone())
    }

    async fn create_agent_alias(
        &self,
        agent_id: &str,
        alias_name: &str,
    ) -> CloudResult<AgentAlias> {
        let transition = self.settle(
            ResourceKind::AgentAlias,
            AliasStatus::Prepared,
            AliasStatus::Failed,
        );
        let mut state = self.state.lock().await;
        state.record("create_agent_alias", alias_name)?;
        let agent = state
            .agents
            .get(agent_id)
            .ok_or_else(|| CloudError::NotFound(agent_id.to_string()))?;
        if agent.agent.status != AgentStatus::Prepared {
            return Err(CloudError::Validation(format!(
                "Agent {} has no prepared version",
                agent_id
            )));
        }
        if state
            .aliases
            .values()
            .any(|a| a.agent_id == agent_id && a.alias.name == alias_name)
        {
            return Err(CloudError::AlreadyExists(alias_name.to_string()));
        }
        let id = state.next_id();
        let alias = AgentAlias {
            id: id.clone(),
            name: alias_name.to_string(),
            status: AliasStatus::Creating,
        };
        state.aliases.insert(
            id,
            AliasEntry {
                agent_id: agent_id.to_string(),
                alias: alias.clone(),
                transition: Some(transition),
            },
        );
        Ok(alias)
    }
}

#[async_trait]
impl AgentRuntimeApi for InMemoryCloud {
    async fn invoke_agent(&self, request: &InvokeRequest) -> CloudResult<AgentEventStream> {
        let mut state = self.state.lock().await;
        state.record("invoke_agent", &request.agent_alias_id)?;
        let alias = state
            .aliases
            .get(&request.agent_alias_id)
            .filter(|a| a.agent_id == request.agent_id)
            .ok_or_else(|| CloudError::NotFound(request.agent_alias_id.clone()))?;
        if alias.alias.status != AliasStatus::Prepared {
            return Err(CloudError::Validation(format!(
                "Alias {} is not ready",
                request.agent_alias_id
            )));
        }

        let events = match &state.invocation_events {
            Some(events) => events.clone(),
            None => {
                let agent = state
                    .agents
                    .get(&request.agent_id)
                    .ok_or_else(|| CloudError::NotFound(request.agent_id.clone()))?;
                let answer = format!(
                    "{} answered from knowledge bases [{}]: {}",
                    agent.agent.name,
                    agent.knowledge_bases.join(", "),
                    request.input_text
                );
                vec![
                    Ok(AgentEvent::Trace(json!({
                        "sessionId": request.session_id,
                        "orchestrationTrace": { "rationale": "Searching the knowledge base" }
                    }))),
                    Ok(AgentEvent::Chunk(answer.into_bytes())),
                ]
            }
        };

        let stream = async_stream::stream! {
            for event in events {
                yield event;
            }
        };
        Ok(stream.boxed())
    }
}
