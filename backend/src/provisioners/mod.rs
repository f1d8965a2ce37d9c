//! Idempotent resource provisioners
//!
//! Every provisioner follows the same upsert: look the resource up by its
//! deterministic name, return it when found, otherwise create it and wait
//! for it to become active. A create call answered with `AlreadyExists` is
//! treated as success and the resource is read back by name. Failures are
//! logged with the resource they concern and then propagated unchanged.

pub mod agent;
pub mod bucket;
pub mod collection;
pub mod data_source;
pub mod iam;
pub mod knowledge_base;

pub use agent::{AgentProvisioner, DRAFT_VERSION};
pub use bucket::{BucketProvisioner, DocumentSync};
pub use collection::CollectionProvisioner;
pub use data_source::{DataSourceOutcome, DataSourceProvisioner};
pub use iam::{
    IamProvisioner, PolicyChange, PolicyMerge, PolicyOutcome, RoleOutcome, RolePolicy,
};
pub use knowledge_base::KnowledgeBaseProvisioner;

use crate::clients::CloudClients;
use crate::cloud::{CloudError, CloudResult, ResourceKind, ResourceStatus};
use crate::config::Config;
use crate::error::Result;
use crate::poll::{self, PollPolicy};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of one provisioning step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceHandle {
    /// Kind of resource
    pub kind: ResourceKind,
    /// Deterministic name
    pub name: String,
    /// Provider-generated id, if the resource has one
    pub id: Option<String>,
    /// ARN, if the resource has one
    pub arn: Option<String>,
    /// Last observed status; `None` for synchronous resources
    pub status: Option<ResourceStatus>,
    /// Whether this run created (or changed) the resource
    pub created: bool,
}

impl ResourceHandle {
    /// Handle for a synchronous resource
    pub fn synchronous(kind: ResourceKind, name: impl Into<String>, created: bool) -> Self {
        Self {
            kind,
            name: name.into(),
            id: None,
            arn: None,
            status: None,
            created,
        }
    }

    /// Set the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the ARN
    pub fn with_arn(mut self, arn: impl Into<String>) -> Self {
        self.arn = Some(arn.into());
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Shared dependencies of every provisioner during one run
pub struct StageEnv<'a> {
    /// Cloud capabilities
    pub clients: &'a CloudClients,
    /// Pipeline configuration
    pub config: &'a Config,
    /// Cancellation signal of the run
    pub cancel: &'a CancellationToken,
}

impl<'a> StageEnv<'a> {
    /// Bundle the run's dependencies
    pub fn new(clients: &'a CloudClients, config: &'a Config, cancel: &'a CancellationToken) -> Self {
        Self {
            clients,
            config,
            cancel,
        }
    }

    /// Poll policy from the timing configuration
    pub fn poll_policy(&self) -> PollPolicy {
        self.config.timing.poll_policy()
    }

    /// Wait until a resource is active
    pub async fn wait_until_active<F, Fut>(
        &self,
        kind: ResourceKind,
        name: &str,
        probe: F,
    ) -> Result<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ResourceStatus>>,
    {
        poll::wait_until_active(kind, name, &self.poll_policy(), self.cancel, probe).await
    }

    /// Wait out a propagation delay
    pub async fn settle(&self, delay: Duration, reason: &str) -> Result<()> {
        poll::settle(delay, self.cancel, reason).await
    }
}

/// Turn `AlreadyExists` into `Ok(None)` so the caller can read the resource back
pub(crate) fn tolerate_existing<T>(
    kind: ResourceKind,
    name: &str,
    result: CloudResult<T>,
) -> CloudResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CloudError::AlreadyExists(_)) => {
            tracing::warn!(resource = %kind, name = %name, "Resource appeared concurrently, reusing it");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Log a failed step with the resource it concerns
pub(crate) fn logged<T>(kind: ResourceKind, name: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        tracing::error!(resource = %kind, name = %name, error = %e, "Provisioning step failed");
    }
    result
}

/// Error for a resource that vanished between creation and read-back
pub(crate) fn vanished(kind: ResourceKind, name: &str) -> CloudError {
    CloudError::NotFound(format!("{} {}", kind, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerate_existing() {
        let ok: CloudResult<u8> = Ok(1);
        assert_eq!(tolerate_existing(ResourceKind::Bucket, "b", ok), Ok(Some(1)));

        let exists: CloudResult<u8> = Err(CloudError::AlreadyExists("b".into()));
        assert_eq!(tolerate_existing(ResourceKind::Bucket, "b", exists), Ok(None));

        let denied: CloudResult<u8> = Err(CloudError::AccessDenied("b".into()));
        assert!(tolerate_existing(ResourceKind::Bucket, "b", denied).is_err());
    }

    #[test]
    fn test_handle_builders() {
        let handle = ResourceHandle::synchronous(ResourceKind::KnowledgeBase, "kb", true)
            .with_id("KB1")
            .with_status(ResourceStatus::Active);
        assert_eq!(handle.id.as_deref(), Some("KB1"));
        assert_eq!(handle.status, Some(ResourceStatus::Active));
        assert!(handle.arn.is_none());
    }
}
