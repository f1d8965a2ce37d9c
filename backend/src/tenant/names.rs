//! Deterministic per-tenant resource names
//!
//! Every name is derived from the tenant id, the region and the account id,
//! so a tenant's resources can be found again without storing anything.
//! Roles and policies carry only the region and account: they are shared by
//! every tenant of the account.

use crate::error::{ProvisionError, Result};
use serde::Serialize;

/// Vector index name shared by every tenant's collection
pub const VECTOR_INDEX_NAME: &str = "financial-knowledge-base-index";
/// Vector field of the index
pub const VECTOR_FIELD: &str = "financial-knowledge-base-vector";
/// Text field of the index
pub const TEXT_FIELD: &str = "financial-knowledge-base-text";
/// Metadata field of the index
pub const METADATA_FIELD: &str = "financial-knowledge-base-metadata";
/// Execution role assumed by knowledge bases
pub const KB_ROLE_NAME: &str = "AmazonBedrockExecutionRoleForKnowledgeBase_financial_docs";
/// Execution role assumed by agents
pub const AGENT_ROLE_NAME: &str = "AmazonBedrockExecutionRoleForAgents_financial_docs";
/// Longest bucket name the object store accepts
pub const MAX_BUCKET_NAME_LEN: usize = 63;

/// Every resource name of one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantNames {
    /// Tenant id the names were derived from
    pub tenant_id: String,
    /// Region the resources live in
    pub region: String,
    /// Account the resources live in
    pub account_id: String,
    /// `<region>-<account>`
    pub suffix: String,
    /// Document bucket
    pub bucket: String,
    /// Key prefix documents are uploaded under
    pub document_prefix: String,
    /// Vector-search collection; also names its security and access policies
    pub collection: String,
    /// Vector index inside the collection
    pub vector_index: String,
    /// Knowledge base
    pub knowledge_base: String,
    /// Knowledge-base data source
    pub data_source: String,
    /// Agent
    pub agent: String,
    /// Agent alias
    pub agent_alias: String,
    /// Knowledge-base execution role
    pub kb_role: String,
    /// Knowledge-base policy allowing the embedding model
    pub kb_model_policy: String,
    /// Knowledge-base policy allowing collection access
    pub kb_collection_policy: String,
    /// Knowledge-base policy allowing reads of every tenant's bucket
    pub kb_bucket_policy: String,
    /// Agent execution role
    pub agent_role: String,
    /// Agent policy allowing the foundation model
    pub agent_model_policy: String,
    /// Agent policy allowing retrieval from every tenant's knowledge base
    pub agent_retrieval_policy: String,
}

impl TenantNames {
    /// Derive every name for `tenant_id`
    ///
    /// # Arguments
    /// * `tenant_id` - Lowercase ASCII letters, digits and `-`
    /// * `region` - Region the resources are created in
    /// * `account_id` - Account the resources are created in
    ///
    /// # Returns
    /// * `Ok(TenantNames)` - All derived names
    /// * `Err(ProvisionError::InvalidTenant)` - The id cannot appear in a bucket
    ///   name, or makes the bucket name too long
    pub fn derive(tenant_id: &str, region: &str, account_id: &str) -> Result<Self> {
        validate_tenant_id(tenant_id)?;

        let t = tenant_id;
        let suffix = format!("{}-{}", region, account_id);
        let agent = format!("financial-analyst-{}-agents", t);
        let bucket = format!("{}-{}", agent, suffix);
        if bucket.len() > MAX_BUCKET_NAME_LEN {
            return Err(ProvisionError::InvalidTenant(format!(
                "'{}' makes the bucket name {} characters long; at most {} are allowed",
                tenant_id,
                bucket.len(),
                MAX_BUCKET_NAME_LEN
            )));
        }

        Ok(Self {
            tenant_id: t.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            bucket,
            document_prefix: format!("kb_documents-{}", t),
            collection: format!("bd-kbc-{}-{}", t, suffix),
            vector_index: VECTOR_INDEX_NAME.to_string(),
            knowledge_base: format!("financial-docs-kb-{}-{}", t, suffix),
            data_source: format!("financial-docs-kb-docs-{}-{}", t, suffix),
            agent_alias: format!("financial-analyst-{}-alias", t),
            agent,
            kb_role: KB_ROLE_NAME.to_string(),
            kb_model_policy: format!("bd-kb-bedrock-allow-{}", suffix),
            kb_collection_policy: format!("bd-kb-aoss-allow-{}", suffix),
            kb_bucket_policy: format!("bd-kb-s3-allow-{}", suffix),
            agent_role: AGENT_ROLE_NAME.to_string(),
            agent_model_policy: format!("bda-bedrock-allow-{}", suffix),
            agent_retrieval_policy: format!("bda-kb-allow-{}", suffix),
            suffix,
        })
    }

    /// ARN of the document bucket
    pub fn bucket_arn(&self) -> String {
        format!("arn:aws:s3:::{}", self.bucket)
    }

    /// Object key a local file is uploaded under
    pub fn document_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.document_prefix, file_name)
    }

    /// ARN of a foundation model in this region
    pub fn foundation_model_arn(&self, model_id: &str) -> String {
        format!(
            "arn:aws:bedrock:{}::foundation-model/{}",
            self.region, model_id
        )
    }
}

fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    if tenant_id.is_empty() {
        return Err(ProvisionError::InvalidTenant(
            "tenant id cannot be empty".to_string(),
        ));
    }
    if let Some(c) = tenant_id
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(ProvisionError::InvalidTenant(format!(
            "'{}' contains '{}'; only lowercase letters, digits and '-' are allowed",
            tenant_id, c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_names() {
        let names = TenantNames::derive("acme", "us-east-1", "123456789012").unwrap();

        assert_eq!(names.suffix, "us-east-1-123456789012");
        assert_eq!(
            names.bucket,
            "financial-analyst-acme-agents-us-east-1-123456789012"
        );
        assert_eq!(names.document_prefix, "kb_documents-acme");
        assert_eq!(names.collection, "bd-kbc-acme-us-east-1-123456789012");
        assert_eq!(
            names.knowledge_base,
            "financial-docs-kb-acme-us-east-1-123456789012"
        );
        assert_eq!(
            names.data_source,
            "financial-docs-kb-docs-acme-us-east-1-123456789012"
        );
        assert_eq!(names.agent, "financial-analyst-acme-agents");
        assert_eq!(names.agent_alias, "financial-analyst-acme-alias");
        assert_eq!(names.agent_role, AGENT_ROLE_NAME);
        assert_eq!(names.kb_model_policy, "bd-kb-bedrock-allow-us-east-1-123456789012");
        assert_eq!(
            names.agent_retrieval_policy,
            "bda-kb-allow-us-east-1-123456789012"
        );
    }

    #[test]
    fn test_derived_helpers() {
        let names = TenantNames::derive("acme", "us-east-1", "1").unwrap();
        assert_eq!(
            names.bucket_arn(),
            "arn:aws:s3:::financial-analyst-acme-agents-us-east-1-1"
        );
        assert_eq!(names.document_key("report.pdf"), "kb_documents-acme/report.pdf");
        assert_eq!(
            names.foundation_model_arn("amazon.titan-embed-text-v1"),
            "arn:aws:bedrock:us-east-1::foundation-model/amazon.titan-embed-text-v1"
        );
    }

    #[test]
    fn test_tenants_do_not_share_scoped_names() {
        let acme = TenantNames::derive("acme", "us-east-1", "1").unwrap();
        let beta = TenantNames::derive("beta", "us-east-1", "1").unwrap();

        assert_ne!(acme.bucket, beta.bucket);
        assert_ne!(acme.collection, beta.collection);
        assert_eq!(acme.agent_role, beta.agent_role);
        assert_eq!(acme.agent_retrieval_policy, beta.agent_retrieval_policy);
        assert_eq!(acme.kb_bucket_policy, beta.kb_bucket_policy);
    }

    #[test]
    fn test_invalid_tenant_ids() {
        for id in ["", "Acme", "acme corp", "acme_1", "acmé"] {
            assert!(
                matches!(
                    TenantNames::derive(id, "us-east-1", "1"),
                    Err(ProvisionError::InvalidTenant(_))
                ),
                "{:?} should be rejected",
                id
            );
        }
        assert!(TenantNames::derive("acme-2", "us-east-1", "1").is_ok());
    }

    #[test]
    fn test_tenant_id_length_bounded_by_bucket_name() {
        // 18 + 8 + 22 characters of fixed parts leave 15 for the tenant id
        let longest = "a".repeat(15);
        let names = TenantNames::derive(&longest, "us-east-1", "123456789012").unwrap();
        assert_eq!(names.bucket.len(), MAX_BUCKET_NAME_LEN);

        let too_long = "a".repeat(16);
        assert!(matches!(
            TenantNames::derive(&too_long, "us-east-1", "123456789012"),
            Err(ProvisionError::InvalidTenant(msg)) if msg.contains("64 characters")
        ));
    }
}
