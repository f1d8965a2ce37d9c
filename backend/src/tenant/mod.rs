//! Tenant naming, per-run context and the tenant registry

mod context;
mod names;
mod registry;

pub use context::{ProvisioningContext, ResolvedResources};
pub use names::{
    TenantNames, AGENT_ROLE_NAME, KB_ROLE_NAME, METADATA_FIELD, TEXT_FIELD, VECTOR_FIELD,
    VECTOR_INDEX_NAME,
};
pub use registry::{TenantConfig, TenantRegistry};
