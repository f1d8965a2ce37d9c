//! Policy documents and request bodies
//!
//! Pure builders: every input is an explicit parameter and every output is
//! an immutable structured value. Documents are rendered to JSON only when
//! they cross the capability boundary, through [`render`].

use crate::cloud::{
    ChunkingConfiguration, DataSourceConfiguration, FieldMapping, FixedSizeChunking,
    OpensearchServerlessConfiguration, S3Configuration, StorageConfiguration,
};
use crate::error::Result;
use crate::tenant::TenantNames;
use serde::Serialize;
use serde_json::json;

const POLICY_VERSION: &str = "2012-10-17";

/// IAM policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version
    pub version: &'static str,
    /// Statements
    pub statement: Vec<Statement>,
}

/// One IAM policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Statement id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<&'static str>,
    /// Always `Allow`
    pub effect: &'static str,
    /// Trusted principal (trust policies only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<ServicePrincipal>,
    /// Allowed actions
    pub action: Vec<&'static str>,
    /// Resources the actions apply to
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<String>,
    /// Extra conditions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

impl Statement {
    fn allow(action: Vec<&'static str>, resource: Vec<String>) -> Self {
        Self {
            sid: None,
            effect: "Allow",
            principal: None,
            action,
            resource,
            condition: None,
        }
    }
}

/// Service principal of a trust policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServicePrincipal {
    /// Service allowed to assume the role
    pub service: &'static str,
}

fn document(statement: Statement) -> PolicyDocument {
    PolicyDocument {
        version: POLICY_VERSION,
        statement: vec![statement],
    }
}

/// Trust policy letting the model service assume a role
pub fn assume_role_policy() -> PolicyDocument {
    document(Statement {
        principal: Some(ServicePrincipal {
            service: "bedrock.amazonaws.com",
        }),
        ..Statement::allow(vec!["sts:AssumeRole"], Vec::new())
    })
}

/// Knowledge-base permission to invoke the embedding model
pub fn kb_foundation_model_policy(names: &TenantNames, embedding_model: &str) -> PolicyDocument {
    document(Statement {
        sid: Some("AmazonBedrockAgentBedrockFoundationModelPolicy"),
        ..Statement::allow(
            vec!["bedrock:InvokeModel"],
            vec![names.foundation_model_arn(embedding_model)],
        )
    })
}

/// Knowledge-base permission to use the account's collections
pub fn kb_collection_access_policy(names: &TenantNames) -> PolicyDocument {
    document(Statement::allow(
        vec!["aoss:APIAccessAll"],
        vec![format!(
            "arn:aws:aoss:{}:{}:collection/*",
            names.region, names.account_id
        )],
    ))
}

/// Knowledge-base permission to read the document bucket
pub fn kb_bucket_access_policy(names: &TenantNames) -> PolicyDocument {
    document(Statement {
        sid: Some("AllowKBAccessDocuments"),
        condition: Some(json!({
            "StringEquals": { "aws:ResourceAccount": names.account_id }
        })),
        ..Statement::allow(
            vec!["s3:GetObject", "s3:ListBucket"],
            vec![format!("{}/*", names.bucket_arn()), names.bucket_arn()],
        )
    })
}

/// Agent permission to invoke its foundation model
pub fn agent_model_invoke_policy(names: &TenantNames, foundation_model: &str) -> PolicyDocument {
    document(Statement {
        sid: Some("AmazonBedrockAgentBedrockFoundationModelPolicy"),
        ..Statement::allow(
            vec!["bedrock:InvokeModel"],
            vec![names.foundation_model_arn(foundation_model)],
        )
    })
}

/// Agent permission to retrieve from one knowledge base
pub fn kb_retrieval_policy(knowledge_base_arn: &str) -> PolicyDocument {
    document(Statement::allow(
        vec!["bedrock:Retrieve"],
        vec![knowledge_base_arn.to_string()],
    ))
}

/// Resource rule of a collection security or access policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionRule {
    /// `collection`, `dashboard` or `index`
    #[serde(rename = "ResourceType")]
    pub resource_type: &'static str,
    /// Resource patterns
    #[serde(rename = "Resource")]
    pub resource: Vec<String>,
    /// Granted permissions (access policies only)
    #[serde(rename = "Permission", skip_serializing_if = "Vec::is_empty")]
    pub permission: Vec<&'static str>,
}

impl CollectionRule {
    fn new(resource_type: &'static str, resource: String) -> Self {
        Self {
            resource_type,
            resource: vec![resource],
            permission: Vec::new(),
        }
    }
}

/// Collection encryption policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptionPolicy {
    /// Covered collections
    #[serde(rename = "Rules")]
    pub rules: Vec<CollectionRule>,
    /// Encrypt with a provider-owned key
    #[serde(rename = "AWSOwnedKey")]
    pub aws_owned_key: bool,
}

/// One entry of a collection network policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkPolicyRule {
    /// Covered resources
    #[serde(rename = "Rules")]
    pub rules: Vec<CollectionRule>,
    /// Allow access from the public internet
    #[serde(rename = "AllowFromPublic")]
    pub allow_from_public: bool,
}

/// One entry of a collection data access policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataAccessRule {
    /// Granted permissions per resource
    #[serde(rename = "Rules")]
    pub rules: Vec<CollectionRule>,
    /// Principals the permissions are granted to
    #[serde(rename = "Principal")]
    pub principal: Vec<String>,
    /// Free text
    #[serde(rename = "Description")]
    pub description: String,
}

/// Encryption policy covering the tenant's collection
pub fn encryption_policy(names: &TenantNames) -> EncryptionPolicy {
    EncryptionPolicy {
        rules: vec![CollectionRule::new(
            "collection",
            format!("collection/{}", names.collection),
        )],
        aws_owned_key: true,
    }
}

/// Network policy opening the tenant's collection and dashboard
pub fn network_policy(names: &TenantNames) -> Vec<NetworkPolicyRule> {
    let resource = format!("collection/{}", names.collection);
    vec![NetworkPolicyRule {
        rules: vec![
            CollectionRule::new("dashboard", resource.clone()),
            CollectionRule::new("collection", resource),
        ],
        allow_from_public: true,
    }]
}

/// Data access policy for the tenant's collection and its indexes
///
/// # Arguments
/// * `names` - Tenant names
/// * `kb_role_arn` - Knowledge-base execution role, resolved beforehand
/// * `caller_arn` - Identity running the pipeline, resolved beforehand
/// * `admin_role` - Role whose assumed sessions also get access
pub fn data_access_policy(
    names: &TenantNames,
    kb_role_arn: &str,
    caller_arn: &str,
    admin_role: &str,
) -> Vec<DataAccessRule> {
    vec![DataAccessRule {
        rules: vec![
            CollectionRule {
                permission: vec![
                    "aoss:DescribeCollectionItems",
                    "aoss:CreateCollectionItems",
                    "aoss:UpdateCollectionItems",
                    "aoss:DeleteCollectionItems",
                ],
                ..CollectionRule::new("collection", format!("collection/{}", names.collection))
            },
            CollectionRule {
                permission: vec![
                    "aoss:CreateIndex",
                    "aoss:DeleteIndex",
                    "aoss:UpdateIndex",
                    "aoss:DescribeIndex",
                    "aoss:ReadDocument",
                    "aoss:WriteDocument",
                ],
                ..CollectionRule::new("index", format!("index/{}/*", names.collection))
            },
        ],
        principal: vec![
            kb_role_arn.to_string(),
            format!(
                "arn:aws:sts::{}:assumed-role/{}/*",
                names.account_id, admin_role
            ),
            caller_arn.to_string(),
        ],
        description: String::new(),
    }]
}

/// Vector store binding of the tenant's knowledge base
pub fn storage_configuration(names: &TenantNames, collection_arn: &str) -> StorageConfiguration {
    StorageConfiguration {
        storage_type: "OPENSEARCH_SERVERLESS".to_string(),
        opensearch_serverless_configuration: OpensearchServerlessConfiguration {
            collection_arn: collection_arn.to_string(),
            vector_index_name: names.vector_index.clone(),
            field_mapping: FieldMapping {
                metadata_field: crate::tenant::METADATA_FIELD.to_string(),
                text_field: crate::tenant::TEXT_FIELD.to_string(),
                vector_field: crate::tenant::VECTOR_FIELD.to_string(),
            },
        },
    }
}

/// Bucket location of the tenant's documents
pub fn data_source_configuration(names: &TenantNames) -> DataSourceConfiguration {
    DataSourceConfiguration {
        source_type: "S3".to_string(),
        s3_configuration: S3Configuration {
            bucket_arn: names.bucket_arn(),
            inclusion_prefixes: vec![names.document_prefix.clone()],
        },
    }
}

/// Fixed-size chunking, 512 tokens with 20% overlap
pub fn chunking_configuration() -> ChunkingConfiguration {
    ChunkingConfiguration {
        chunking_strategy: "FIXED_SIZE".to_string(),
        fixed_size_chunking_configuration: FixedSizeChunking {
            max_tokens: 512,
            overlap_percentage: 20,
        },
    }
}

/// Index settings and mappings for the knowledge-base vector index
pub fn vector_index_body() -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        crate::tenant::VECTOR_FIELD.to_string(),
        json!({
            "type": "knn_vector",
            "dimension": 1536,
            "method": { "name": "hnsw", "engine": "faiss" }
        }),
    );
    properties.insert(crate::tenant::TEXT_FIELD.to_string(), json!({ "type": "text" }));
    properties.insert(crate::tenant::METADATA_FIELD.to_string(), json!({ "type": "text" }));

    json!({
        "settings": {
            "index.knn": true,
            "number_of_shards": 1,
            "knn.algo_param.ef_search": 512,
            "number_of_replicas": 0
        },
        "mappings": { "properties": properties }
    })
}

/// Render a document to the JSON the provider expects
pub fn render<T: Serialize>(document: &T) -> Result<String> {
    Ok(serde_json::to_string(document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn names() -> TenantNames {
        TenantNames::derive("acme", "us-east-1", "123456789012").unwrap()
    }

    fn as_json<T: Serialize>(doc: &T) -> Value {
        serde_json::from_str(&render(doc).unwrap()).unwrap()
    }

    #[test]
    fn test_assume_role_policy_shape() {
        let json = as_json(&assume_role_policy());
        assert_eq!(json["Version"], "2012-10-17");
        let statement = &json["Statement"][0];
        assert_eq!(statement["Principal"]["Service"], "bedrock.amazonaws.com");
        assert_eq!(statement["Action"][0], "sts:AssumeRole");
        assert!(statement.get("Resource").is_none());
    }

    #[test]
    fn test_bucket_policy_has_account_condition() {
        let json = as_json(&kb_bucket_access_policy(&names()));
        let statement = &json["Statement"][0];
        assert_eq!(
            statement["Condition"]["StringEquals"]["aws:ResourceAccount"],
            "123456789012"
        );
        assert_eq!(
            statement["Resource"][1],
            "arn:aws:s3:::financial-analyst-acme-agents-us-east-1-123456789012"
        );
    }

    #[test]
    fn test_retrieval_policy_targets_knowledge_base() {
        let json = as_json(&kb_retrieval_policy("arn:aws:bedrock:us-east-1:1:knowledge-base/KB"));
        assert_eq!(json["Statement"][0]["Action"][0], "bedrock:Retrieve");
        assert_eq!(
            json["Statement"][0]["Resource"][0],
            "arn:aws:bedrock:us-east-1:1:knowledge-base/KB"
        );
    }

    #[test]
    fn test_data_access_policy_principals() {
        let json = as_json(&data_access_policy(
            &names(),
            "arn:aws:iam::123456789012:role/kb",
            "arn:aws:sts::123456789012:assumed-role/Admin/me",
            "Admin",
        ));
        let principals = json[0]["Principal"].as_array().unwrap();
        assert_eq!(principals.len(), 3);
        assert_eq!(principals[0], "arn:aws:iam::123456789012:role/kb");
        assert_eq!(principals[1], "arn:aws:sts::123456789012:assumed-role/Admin/*");
        assert_eq!(
            json[0]["Rules"][1]["Resource"][0],
            "index/bd-kbc-acme-us-east-1-123456789012/*"
        );
        assert_eq!(json[0]["Rules"][1]["Permission"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_network_policy_allows_public_access() {
        let json = as_json(&network_policy(&names()));
        assert_eq!(json[0]["AllowFromPublic"], true);
        assert_eq!(json[0]["Rules"][0]["ResourceType"], "dashboard");
        assert!(json[0]["Rules"][0].get("Permission").is_none());
    }

    #[test]
    fn test_encryption_policy_uses_owned_key() {
        let json = as_json(&encryption_policy(&names()));
        assert_eq!(json["AWSOwnedKey"], true);
        assert_eq!(
            json["Rules"][0]["Resource"][0],
            "collection/bd-kbc-acme-us-east-1-123456789012"
        );
    }

    #[test]
    fn test_storage_configuration_wire_names() {
        let json = serde_json::to_value(storage_configuration(&names(), "arn:c")).unwrap();
        assert_eq!(json["type"], "OPENSEARCH_SERVERLESS");
        let binding = &json["opensearchServerlessConfiguration"];
        assert_eq!(binding["collectionArn"], "arn:c");
        assert_eq!(binding["vectorIndexName"], "financial-knowledge-base-index");
        assert_eq!(binding["fieldMapping"]["vectorField"], "financial-knowledge-base-vector");
    }

    #[test]
    fn test_data_source_configuration() {
        let json = serde_json::to_value(data_source_configuration(&names())).unwrap();
        assert_eq!(json["type"], "S3");
        assert_eq!(json["s3Configuration"]["inclusionPrefixes"][0], "kb_documents-acme");

        let chunking = serde_json::to_value(chunking_configuration()).unwrap();
        assert_eq!(chunking["fixedSizeChunkingConfiguration"]["maxTokens"], 512);
        assert_eq!(chunking["fixedSizeChunkingConfiguration"]["overlapPercentage"], 20);
    }

    #[test]
    fn test_vector_index_body() {
        let body = vector_index_body();
        assert_eq!(body["settings"]["index.knn"], true);
        assert_eq!(body["settings"]["number_of_replicas"], 0);
        let vector = &body["mappings"]["properties"]["financial-knowledge-base-vector"];
        assert_eq!(vector["dimension"], 1536);
        assert_eq!(vector["method"]["engine"], "faiss");
    }

    #[test]
    fn test_render_is_stable() {
        let a = render(&kb_collection_access_policy(&names())).unwrap();
        let b = render(&kb_collection_access_policy(&names())).unwrap();
        assert_eq!(a, b);
    }
}
