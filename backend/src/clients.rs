//! Cloud client bundle
//!
//! One handle per capability, built once at process start and shared by
//! every tenant's pipeline run. Handles are read-only after construction.
//! The bundle also owns the lock that serialises read-modify-write updates
//! of account-wide IAM policies across concurrent tenant runs.

use crate::cloud::{
    AgentApi, AgentRuntimeApi, CollectionApi, IamApi, IdentityApi, KnowledgeBaseApi, StorageApi,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handles to every cloud capability
#[derive(Clone)]
pub struct CloudClients {
    identity: Arc<dyn IdentityApi>,
    storage: Arc<dyn StorageApi>,
    iam: Arc<dyn IamApi>,
    collections: Arc<dyn CollectionApi>,
    knowledge_bases: Arc<dyn KnowledgeBaseApi>,
    agents: Arc<dyn AgentApi>,
    runtime: Arc<dyn AgentRuntimeApi>,
    shared_policies: Arc<Mutex<()>>,
}

impl CloudClients {
    /// Bundle separately constructed capability handles
    pub fn new(
        identity: Arc<dyn IdentityApi>,
        storage: Arc<dyn StorageApi>,
        iam: Arc<dyn IamApi>,
        collections: Arc<dyn CollectionApi>,
        knowledge_bases: Arc<dyn KnowledgeBaseApi>,
        agents: Arc<dyn AgentApi>,
        runtime: Arc<dyn AgentRuntimeApi>,
    ) -> Self {
        Self {
            identity,
            storage,
            iam,
            collections,
            knowledge_bases,
            agents,
            runtime,
            shared_policies: Arc::new(Mutex::new(())),
        }
    }

    /// Use one provider for every capability
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: IdentityApi
            + StorageApi
            + IamApi
            + CollectionApi
            + KnowledgeBaseApi
            + AgentApi
            + AgentRuntimeApi
            + 'static,
    {
        Self::new(
            provider.clone(),
            provider.clone(),
            provider.clone(),
            provider.clone(),
            provider.clone(),
            provider.clone(),
            provider,
        )
    }

    /// Caller identity
    pub fn identity(&self) -> &dyn IdentityApi {
        self.identity.as_ref()
    }

    /// Object storage
    pub fn storage(&self) -> &dyn StorageApi {
        self.storage.as_ref()
    }

    /// IAM
    pub fn iam(&self) -> &dyn IamApi {
        self.iam.as_ref()
    }

    /// Vector-search collections
    pub fn collections(&self) -> &dyn CollectionApi {
        self.collections.as_ref()
    }

    /// Knowledge bases and data sources
    pub fn knowledge_bases(&self) -> &dyn KnowledgeBaseApi {
        self.knowledge_bases.as_ref()
    }

    /// Agent control plane
    pub fn agents(&self) -> &dyn AgentApi {
        self.agents.as_ref()
    }

    /// Agent runtime
    pub fn runtime(&self) -> &dyn AgentRuntimeApi {
        self.runtime.as_ref()
    }

    /// Held while a policy shared by every tenant is read, merged and written
    pub(crate) fn shared_policy_lock(&self) -> &Mutex<()> {
        &self.shared_policies
    }
}
