//! Financial document agent provisioner
//!
//! Provisions, per tenant, the chain of cloud resources a document-grounded
//! agent needs (bucket, collection and index, knowledge base, data source,
//! roles and policies, agent and alias) and asks the agent a verification
//! question once everything is in place.
//!
//! The cloud is reached only through the capability traits in [`cloud`];
//! [`cloud::memory::InMemoryCloud`] implements all of them for tests and
//! dry runs.

pub mod clients;
pub mod cloud;
pub mod config;
pub mod error;
pub mod invoke;
pub mod orchestrator;
pub mod policy;
pub mod poll;
pub mod provisioners;
pub mod tenant;

pub use clients::CloudClients;
pub use config::Config;
pub use error::{ProvisionError, Result};
pub use invoke::{Invocation, Invoker};
pub use orchestrator::{Orchestrator, ProvisioningReport, Stage};
pub use tenant::{ProvisioningContext, ResolvedResources, TenantNames, TenantRegistry};
