//! Error types for the provisioning pipeline
//!
//! Provider errors ([`CloudError`]) pass through unchanged inside
//! [`ProvisionError::Cloud`]. Everything else the pipeline can fail with is
//! one of the remaining variants. The CLI renders errors through
//! [`ProvisionError::user_message`].

use crate::cloud::{CloudError, ResourceKind};
use std::time::Duration;
use thiserror::Error;

/// Pipeline-level error types
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The cloud provider rejected a call
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// A resource settled in a failed status
    #[error("{kind} {name} reached terminal status {status}")]
    TerminalFailure {
        /// Kind of the failed resource
        kind: ResourceKind,
        /// Name or id of the failed resource
        name: String,
        /// Status as reported by the provider
        status: String,
    },

    /// A resource did not settle before the poll deadline
    #[error("Timed out after {elapsed:?} waiting for {kind} {name}")]
    Timeout {
        /// Kind of the resource being waited for
        kind: ResourceKind,
        /// Name or id of the resource being waited for
        name: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// The run was cancelled through its cancellation token
    #[error("Provisioning cancelled while {0}")]
    Cancelled(String),

    /// The agent stream produced an event that is neither a chunk nor a trace
    #[error("Unexpected event in agent response stream: {0}")]
    UnexpectedStreamEvent(String),

    /// The assembled agent answer is not valid UTF-8
    #[error("Agent answer is not valid UTF-8: {0}")]
    InvalidAnswer(#[from] std::string::FromUtf8Error),

    /// A step ran before an identifier it depends on was resolved
    #[error("Missing dependency: {0} has not been resolved")]
    MissingDependency(&'static str),

    /// Tenant id cannot be used in resource names
    #[error("Invalid tenant id: {0}")]
    InvalidTenant(String),

    /// Local document source could not be read
    #[error("Document source error: {0}")]
    Documents(#[from] std::io::Error),

    /// A policy document or request failed to serialize
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProvisionError {
    /// Generic failure message followed by the underlying error string
    pub fn user_message(&self) -> String {
        format!("Failed to provision and invoke the agent: {}", self)
    }

    /// Whether the error came from the cloud provider
    pub fn is_cloud(&self) -> bool {
        matches!(self, ProvisionError::Cloud(_))
    }
}

/// Result alias for pipeline operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
