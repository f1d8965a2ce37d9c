//! IAM managed policies and execution roles
//!
//! A managed policy can store at most [`MAX_POLICY_VERSIONS`] versions. When
//! a changed document has to become the default and the policy is at the
//! limit, every non-default version is deleted first, then the new version
//! is created as default. Only one non-default version is ever needed, so
//! this keeps the policy within the limit for any number of updates.
//!
//! Policies that every tenant of an account contributes to (the bucket-read
//! and knowledge-base retrieval policies) are reconciled with
//! [`PolicyMerge::AccumulateResources`]: the stored resource list is kept and
//! the tenant's resources are appended. These read-modify-write updates are
//! serialised through the client bundle so concurrent tenants cannot drop
//! each other's resources.

use super::{logged, tolerate_existing, vanished, ResourceHandle, StageEnv};
use crate::cloud::{ManagedPolicy, ResourceKind, MAX_POLICY_VERSIONS};
use crate::error::Result;
use crate::policy::{self, PolicyDocument};
use serde::Serialize;
use serde_json::Value;

/// What the policy upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyChange {
    /// The policy did not exist
    Created,
    /// A new default version was stored
    Updated,
    /// The default version already matched
    Unchanged,
}

/// Result of a policy upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    /// Policy name
    pub name: String,
    /// Policy ARN
    pub arn: String,
    /// What the upsert did
    pub change: PolicyChange,
}

impl PolicyOutcome {
    fn handle(&self) -> ResourceHandle {
        ResourceHandle::synchronous(
            ResourceKind::IamPolicy,
            &self.name,
            self.change != PolicyChange::Unchanged,
        )
        .with_arn(&self.arn)
    }
}

/// How a desired document is reconciled with the stored default version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMerge {
    /// The desired document replaces the stored one
    Replace,
    /// Resources the stored document already grants are kept and the
    /// desired ones are appended
    AccumulateResources,
}

/// A policy a role should carry
#[derive(Debug, Clone)]
pub struct RolePolicy {
    /// Policy name
    pub name: String,
    /// Desired document
    pub document: PolicyDocument,
    /// Policy description
    pub description: &'static str,
    /// Reconciliation with the stored document
    pub merge: PolicyMerge,
}

/// Result of a role upsert
#[derive(Debug, Clone)]
pub struct RoleOutcome {
    /// Role ARN
    pub role_arn: String,
    /// Handles for the role and each of its policies
    pub handles: Vec<ResourceHandle>,
}

/// Upserts managed policies and roles
pub struct IamProvisioner<'a> {
    env: &'a StageEnv<'a>,
}

/// Compare two policy documents structurally, falling back to text
fn same_document(live: &str, desired: &str) -> bool {
    match (
        serde_json::from_str::<serde_json::Value>(live),
        serde_json::from_str::<serde_json::Value>(desired),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => live == desired,
    }
}

/// `Resource` of a statement as a list; IAM also accepts a single string
fn resources_of(statement: &Value) -> Vec<Value> {
    match statement.get("Resource") {
        Some(Value::Array(resources)) => resources.clone(),
        Some(single @ Value::String(_)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

/// Desired document with every resource of the matching live statement kept
///
/// Statements are matched on their actions. Live resources come first in
/// their stored order, so a live document that already grants everything
/// desired merges back into itself.
fn merge_resources(live: &str, desired: &str) -> String {
    let (Ok(live), Ok(mut merged)) = (
        serde_json::from_str::<Value>(live),
        serde_json::from_str::<Value>(desired),
    ) else {
        return desired.to_string();
    };
    let live_statements = match live.get("Statement") {
        Some(Value::Array(statements)) => statements.clone(),
        _ => Vec::new(),
    };

    if let Some(Value::Array(statements)) = merged.get_mut("Statement") {
        for statement in statements.iter_mut() {
            let Some(previous) = live_statements
                .iter()
                .find(|s| s.get("Action") == statement.get("Action"))
            else {
                continue;
            };
            let mut resources = resources_of(previous);
            for wanted in resources_of(statement) {
                if !resources.contains(&wanted) {
                    resources.push(wanted);
                }
            }
            statement["Resource"] = Value::Array(resources);
        }
    }
    merged.to_string()
}

impl<'a> IamProvisioner<'a> {
    /// Create a provisioner for one run
    pub fn new(env: &'a StageEnv<'a>) -> Self {
        Self { env }
    }

    async fn find_policy(&self, name: &str) -> Result<Option<ManagedPolicy>> {
        let policies = self.env.clients.iam().list_policies().await?;
        Ok(policies.into_iter().find(|p| p.name == name))
    }

    /// Make sure the managed policy `name` exists with `document` as its default version
    ///
    /// # Arguments
    /// * `name` - Policy name
    /// * `document` - Desired document
    /// * `description` - Used when the policy is created
    /// * `merge` - How `document` is reconciled with the stored version
    ///
    /// # Returns
    /// * `Ok(PolicyOutcome)` - ARN and what was changed
    /// * `Err(ProvisionError)` - A provider call failed
    pub async fn ensure_policy(
        &self,
        name: &str,
        document: &PolicyDocument,
        description: &str,
        merge: PolicyMerge,
    ) -> Result<PolicyOutcome> {
        let result = match merge {
            PolicyMerge::Replace => {
                self.ensure_policy_inner(name, document, description, merge)
                    .await
            }
            PolicyMerge::AccumulateResources => {
                let _guard = self.env.clients.shared_policy_lock().lock().await;
                self.ensure_policy_inner(name, document, description, merge)
                    .await
            }
        };
        logged(ResourceKind::IamPolicy, name, result)
    }

    async fn ensure_policy_inner(
        &self,
        name: &str,
        document: &PolicyDocument,
        description: &str,
        merge: PolicyMerge,
    ) -> Result<PolicyOutcome> {
        let iam = self.env.clients.iam();
        let desired = policy::render(document)?;

        let Some(existing) = self.find_policy(name).await? else {
            let created = tolerate_existing(
                ResourceKind::IamPolicy,
                name,
                iam.create_policy(name, &desired, description).await,
            )?;
            if let Some(policy) = created {
                tracing::info!(policy = %name, arn = %policy.arn, "Created policy");
                return Ok(PolicyOutcome {
                    name: name.to_string(),
                    arn: policy.arn,
                    change: PolicyChange::Created,
                });
            }
            let policy = self
                .find_policy(name)
                .await?
                .ok_or_else(|| vanished(ResourceKind::IamPolicy, name))?;
            return self.update_if_changed(policy, &desired, merge).await;
        };

        self.update_if_changed(existing, &desired, merge).await
    }

    async fn update_if_changed(
        &self,
        policy: ManagedPolicy,
        desired: &str,
        merge: PolicyMerge,
    ) -> Result<PolicyOutcome> {
        let iam = self.env.clients.iam();
        let live = iam
            .get_policy_version(&policy.arn, &policy.default_version_id)
            .await?;
        let merged = match merge {
            PolicyMerge::Replace => desired.to_string(),
            PolicyMerge::AccumulateResources => merge_resources(&live.document, desired),
        };
        let desired = merged.as_str();

        if same_document(&live.document, desired) {
            tracing::debug!(policy = %policy.name, version = %live.version_id, "Policy is up to date");
            return Ok(PolicyOutcome {
                name: policy.name,
                arn: policy.arn,
                change: PolicyChange::Unchanged,
            });
        }

        let versions = iam.list_policy_versions(&policy.arn).await?;
        if versions.len() >= MAX_POLICY_VERSIONS {
            for version in versions.iter().filter(|v| !v.is_default) {
                iam.delete_policy_version(&policy.arn, &version.version_id)
                    .await?;
                tracing::info!(
                    policy = %policy.name,
                    version = %version.version_id,
                    "Deleted non-default policy version"
                );
            }
        }

        let version = iam.create_policy_version(&policy.arn, desired, true).await?;
        tracing::info!(policy = %policy.name, version = %version.version_id, "Stored new default policy version");
        Ok(PolicyOutcome {
            name: policy.name,
            arn: policy.arn,
            change: PolicyChange::Updated,
        })
    }

    /// Make sure a role exists and carries every policy in `policies`
    ///
    /// Waits for the role propagation delay after the role is created and
    /// after any policy is newly attached.
    pub async fn ensure_role(&self, role_name: &str, policies: &[RolePolicy]) -> Result<RoleOutcome> {
        logged(
            ResourceKind::IamRole,
            role_name,
            self.ensure_role_inner(role_name, policies).await,
        )
    }

    async fn ensure_role_inner(&self, role_name: &str, policies: &[RolePolicy]) -> Result<RoleOutcome> {
        let iam = self.env.clients.iam();
        let settle = self.env.config.timing.settle.after_role_change;

        let (role, role_created) = match iam.get_role(role_name).await? {
            Some(role) => (role, false),
            None => {
                let trust = policy::render(&policy::assume_role_policy())?;
                match tolerate_existing(
                    ResourceKind::IamRole,
                    role_name,
                    iam.create_role(role_name, &trust).await,
                )? {
                    Some(role) => {
                        tracing::info!(role = %role_name, arn = %role.arn, "Created role");
                        self.env.settle(settle, "role propagation").await?;
                        (role, true)
                    }
                    None => (
                        iam.get_role(role_name)
                            .await?
                            .ok_or_else(|| vanished(ResourceKind::IamRole, role_name))?,
                        false,
                    ),
                }
            }
        };

        let mut handles = vec![
            ResourceHandle::synchronous(ResourceKind::IamRole, role_name, role_created)
                .with_arn(&role.arn),
        ];

        let attached = iam.list_attached_role_policies(role_name).await?;
        let mut newly_attached = false;
        for wanted in policies {
            let outcome = self
                .ensure_policy(&wanted.name, &wanted.document, wanted.description, wanted.merge)
                .await?;
            if !attached.contains(&outcome.arn) {
                iam.attach_role_policy(role_name, &outcome.arn).await?;
                tracing::info!(role = %role_name, policy = %outcome.name, "Attached policy to role");
                newly_attached = true;
            }
            handles.push(outcome.handle());
        }

        if newly_attached {
            self.env.settle(settle, "policy attachment propagation").await?;
        }

        Ok(RoleOutcome {
            role_arn: role.arn,
            handles,
        })
    }
}
