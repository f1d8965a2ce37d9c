//! Terminal and JSON rendering for the CLI

use anyhow::Result;
use finagent_provisioner::policy::{self, DataAccessRule, EncryptionPolicy, NetworkPolicyRule, PolicyDocument};
use finagent_provisioner::{Config, Invocation, ProvisioningReport, TenantNames};
use serde::Serialize;

/// Everything a tenant would get, before any call is made
#[derive(Serialize)]
pub struct Plan<'a> {
    names: &'a TenantNames,
    policies: Vec<NamedPolicy>,
    encryption_policy: EncryptionPolicy,
    network_policy: Vec<NetworkPolicyRule>,
    data_access_policy: Vec<DataAccessRule>,
    vector_index: serde_json::Value,
}

#[derive(Serialize)]
struct NamedPolicy {
    role: String,
    name: String,
    document: PolicyDocument,
}

impl<'a> Plan<'a> {
    pub fn new(names: &'a TenantNames, config: &Config) -> Self {
        let kb_role_arn = format!("arn:aws:iam::{}:role/{}", names.account_id, names.kb_role);
        let kb_arn = format!(
            "arn:aws:bedrock:{}:{}:knowledge-base/<knowledge-base-id>",
            names.region, names.account_id
        );
        let caller_arn = format!(
            "arn:aws:iam::{}:role/{}",
            names.account_id, config.cloud.admin_role
        );

        let named = |role: &str, name: &str, document: PolicyDocument| NamedPolicy {
            role: role.to_string(),
            name: name.to_string(),
            document,
        };
        let policies = vec![
            named(
                &names.kb_role,
                &names.kb_model_policy,
                policy::kb_foundation_model_policy(names, &config.models.embedding_model),
            ),
            named(
                &names.kb_role,
                &names.kb_collection_policy,
                policy::kb_collection_access_policy(names),
            ),
            named(
                &names.kb_role,
                &names.kb_bucket_policy,
                policy::kb_bucket_access_policy(names),
            ),
            named(
                &names.agent_role,
                &names.agent_model_policy,
                policy::agent_model_invoke_policy(names, &config.models.foundation_model),
            ),
            named(
                &names.agent_role,
                &names.agent_retrieval_policy,
                policy::kb_retrieval_policy(&kb_arn),
            ),
        ];

        Self {
            names,
            policies,
            encryption_policy: policy::encryption_policy(names),
            network_policy: policy::network_policy(names),
            data_access_policy: policy::data_access_policy(
                names,
                &kb_role_arn,
                &caller_arn,
                &config.cloud.admin_role,
            ),
            vector_index: policy::vector_index_body(),
        }
    }
}

pub fn print_plan(plan: &Plan<'_>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }

    let names = plan.names;
    println!("Tenant {}", names.tenant_id);
    for (label, value) in [
        ("bucket", &names.bucket),
        ("document prefix", &names.document_prefix),
        ("collection", &names.collection),
        ("vector index", &names.vector_index),
        ("knowledge base", &names.knowledge_base),
        ("data source", &names.data_source),
        ("knowledge base role", &names.kb_role),
        ("agent role", &names.agent_role),
        ("agent", &names.agent),
        ("agent alias", &names.agent_alias),
    ] {
        println!("  {:<20} {}", label, value);
    }

    println!();
    for named in &plan.policies {
        println!("Policy {} (attached to {})", named.name, named.role);
        println!("{}", serde_json::to_string_pretty(&named.document)?);
    }
    println!("Data access policy {}", names.collection);
    println!("{}", serde_json::to_string_pretty(&plan.data_access_policy)?);
    Ok(())
}

pub fn print_report(
    run: usize,
    report: &ProvisioningReport,
    mutating_calls: usize,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let elapsed = report.finished_at - report.started_at;
    println!(
        "Run {} for tenant {} finished in {} ms ({} mutating calls)",
        run,
        report.tenant,
        elapsed.num_milliseconds(),
        mutating_calls
    );
    for resource in &report.resources {
        let state = if resource.created { "created" } else { "exists" };
        let id = resource
            .id
            .as_deref()
            .or(resource.arn.as_deref())
            .unwrap_or("-");
        println!("  [{:<7}] {:<32} {} ({})", state, resource.kind.label(), resource.name, id);
    }
    println!(
        "  documents: {} uploaded, {} already present",
        report.documents.uploaded.len(),
        report.documents.skipped.len()
    );
    if let Some(job) = &report.ingestion_job_id {
        println!("  ingestion job: {}", job);
    }
    if let Some(invocation) = &report.invocation {
        println!();
        println!("Session {}", invocation.session_id);
        println!("{}", invocation.answer);
    }
    println!();
    Ok(())
}

pub fn print_answer(question: &str, invocation: &Invocation, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(invocation)?);
    } else {
        println!("> {}", question);
        println!("{}", invocation.answer);
        println!();
    }
    Ok(())
}
