//! End-to-end pipeline tests against the simulated cloud
//!
//! These tests verify:
//! 1. A first run creates every resource under its deterministic name
//! 2. An identical second run only performs existence checks
//! 3. Stages respect their dependency order
//! 4. Tenants are provisioned independently, same-tenant runs are serialised
//! 5. Account-wide policies keep every tenant's resources
//! 6. Failures propagate unchanged, nothing is committed, and a re-run recovers

use finagent_provisioner::cloud::memory::{InMemoryCloud, SimulationProfile};
use finagent_provisioner::cloud::{CloudError, ResourceKind};
use finagent_provisioner::config::TimingConfig;
use finagent_provisioner::{CloudClients, Config, Orchestrator, ProvisionError, TenantNames};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

const REGION: &str = "us-east-1";
const ACCOUNT: &str = "123456789012";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> Config {
    Config {
        timing: TimingConfig::immediate(),
        ..Config::default()
    }
}

/// Directory holding a single `report.pdf`
fn documents() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("report.pdf"), b"%PDF-1.4 annual report").unwrap();
    dir
}

async fn orchestrator(profile: SimulationProfile) -> (Arc<InMemoryCloud>, Orchestrator) {
    init_tracing();
    let cloud = Arc::new(InMemoryCloud::with_profile(REGION, ACCOUNT, profile));
    let orchestrator = Orchestrator::connect(CloudClients::from_provider(cloud.clone()), test_config())
        .await
        .unwrap();
    (cloud, orchestrator)
}

async fn default_policy_document(cloud: &InMemoryCloud, name: &str) -> String {
    cloud
        .policy_versions(name)
        .await
        .into_iter()
        .find(|v| v.is_default)
        .map(|v| v.document)
        .unwrap_or_else(|| panic!("policy {} has no default version", name))
}

fn position(calls: &[finagent_provisioner::cloud::memory::CallRecord], operation: &str) -> usize {
    calls
        .iter()
        .position(|c| c.operation == operation)
        .unwrap_or_else(|| panic!("{} was never called", operation))
}

#[tokio::test]
async fn test_first_run_creates_named_resources() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    let docs = documents();

    let report = orchestrator
        .provision_and_invoke("acme", docs.path())
        .await
        .unwrap();

    let named = |kind: ResourceKind| {
        report
            .resources
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.name.clone())
            .unwrap()
    };
    assert_eq!(
        named(ResourceKind::Bucket),
        "financial-analyst-acme-agents-us-east-1-123456789012"
    );
    assert_eq!(
        named(ResourceKind::Collection),
        "bd-kbc-acme-us-east-1-123456789012"
    );
    assert_eq!(named(ResourceKind::VectorIndex), "financial-knowledge-base-index");
    assert_eq!(
        named(ResourceKind::KnowledgeBase),
        "financial-docs-kb-acme-us-east-1-123456789012"
    );
    assert_eq!(named(ResourceKind::Agent), "financial-analyst-acme-agents");
    assert_eq!(named(ResourceKind::AgentAlias), "financial-analyst-acme-alias");
    assert!(report
        .resources
        .iter()
        .any(|r| r.kind == ResourceKind::IamRole
            && r.name == "AmazonBedrockExecutionRoleForAgents_financial_docs"));

    assert_eq!(
        cloud
            .object_keys("financial-analyst-acme-agents-us-east-1-123456789012")
            .await,
        vec!["kb_documents-acme/report.pdf".to_string()]
    );
    assert_eq!(report.documents.uploaded, vec!["kb_documents-acme/report.pdf".to_string()]);
    assert!(report.ingestion_job_id.is_some());
    assert!(report.resources.iter().all(|r| r.created));

    let answer = report.answer();
    assert!(answer.starts_with("financial-analyst-acme-agents answered"));
    assert!(answer.ends_with("How much did the company make last year"));

    let committed = orchestrator.registry().snapshot("acme").await.unwrap();
    assert_eq!(committed, report.resolved);
    assert!(committed.agent_alias_id.is_some());
}

#[tokio::test]
async fn test_second_run_only_checks_existence() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    let docs = documents();

    let first = orchestrator
        .provision_and_invoke("acme", docs.path())
        .await
        .unwrap();
    cloud.clear_calls().await;
    let second = orchestrator
        .provision_and_invoke("acme", docs.path())
        .await
        .unwrap();

    assert_eq!(cloud.mutating_calls().await, Vec::new());
    assert!(second.is_noop());
    assert!(second.ingestion_job_id.is_none());
    assert_eq!(second.resolved, first.resolved);
    assert_eq!(second.answer(), first.answer());
}

#[tokio::test]
async fn test_new_document_triggers_ingestion_only() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    let docs = documents();
    orchestrator.provision("acme", docs.path()).await.unwrap();

    std::fs::write(docs.path().join("q3.pdf"), b"%PDF-1.4 quarterly").unwrap();
    cloud.clear_calls().await;
    let report = orchestrator.provision("acme", docs.path()).await.unwrap();

    let mutating: Vec<&str> = cloud
        .mutating_calls()
        .await
        .iter()
        .map(|c| c.operation)
        .collect();
    assert_eq!(mutating, vec!["put_object", "start_ingestion_job"]);
    assert_eq!(report.documents.skipped, vec!["kb_documents-acme/report.pdf".to_string()]);
    assert!(report.invocation.is_none());
}

#[tokio::test]
async fn test_stages_respect_dependencies() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile {
        polls_until_ready: 3,
        ..SimulationProfile::default()
    })
    .await;
    let docs = documents();

    orchestrator.provision_and_ask("acme", docs.path()).await.unwrap();

    let calls = cloud.calls().await;
    assert!(position(&calls, "create_bucket") < position(&calls, "put_object"));
    assert!(position(&calls, "create_role") < position(&calls, "create_access_policy"));
    assert!(position(&calls, "create_collection") < position(&calls, "create_index"));
    assert!(position(&calls, "create_index") < position(&calls, "create_knowledge_base"));
    assert!(position(&calls, "create_knowledge_base") < position(&calls, "create_data_source"));
    assert!(position(&calls, "start_ingestion_job") < position(&calls, "create_agent"));
    assert!(position(&calls, "associate_knowledge_base") < position(&calls, "prepare_agent"));
    assert!(position(&calls, "prepare_agent") < position(&calls, "create_agent_alias"));
    assert!(position(&calls, "create_agent_alias") < position(&calls, "invoke_agent"));
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    let (acme_docs, beta_docs) = (documents(), documents());

    let (acme, beta) = tokio::join!(
        orchestrator.provision_and_invoke("acme", acme_docs.path()),
        orchestrator.provision_and_invoke("beta", beta_docs.path()),
    );
    let (acme, beta) = (acme.unwrap(), beta.unwrap());

    assert_ne!(acme.resolved.knowledge_base_id, beta.resolved.knowledge_base_id);
    assert_ne!(acme.resolved.agent_id, beta.resolved.agent_id);
    assert_ne!(acme.resolved.collection_arn, beta.resolved.collection_arn);
    assert!(acme.answer().contains(acme.resolved.knowledge_base_id.as_deref().unwrap()));
    assert!(!acme.answer().contains(beta.resolved.knowledge_base_id.as_deref().unwrap()));
    assert!(beta.answer().starts_with("financial-analyst-beta-agents"));

    let names = TenantNames::derive("acme", REGION, ACCOUNT).unwrap();
    let bucket_policy = default_policy_document(&cloud, &names.kb_bucket_policy).await;
    assert!(bucket_policy.contains("financial-analyst-acme-agents-us-east-1-123456789012"));
    assert!(bucket_policy.contains("financial-analyst-beta-agents-us-east-1-123456789012"));

    let mut collections = cloud.collection_names().await;
    collections.sort();
    assert_eq!(
        collections,
        vec![
            "bd-kbc-acme-us-east-1-123456789012".to_string(),
            "bd-kbc-beta-us-east-1-123456789012".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_other_tenant_does_not_disturb_rerun() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    let (acme_docs, beta_docs) = (documents(), documents());

    let acme = orchestrator.provision("acme", acme_docs.path()).await.unwrap();
    let beta = orchestrator.provision("beta", beta_docs.path()).await.unwrap();
    cloud.clear_calls().await;
    let again = orchestrator.provision("acme", acme_docs.path()).await.unwrap();

    assert_eq!(cloud.mutating_calls().await, Vec::new());
    assert!(again.is_noop());

    let names = TenantNames::derive("acme", REGION, ACCOUNT).unwrap();
    let bucket_policy = default_policy_document(&cloud, &names.kb_bucket_policy).await;
    assert!(bucket_policy.contains("financial-analyst-acme-agents-us-east-1-123456789012"));
    assert!(bucket_policy.contains("financial-analyst-beta-agents-us-east-1-123456789012"));

    let retrieval_policy = default_policy_document(&cloud, &names.agent_retrieval_policy).await;
    for report in [&acme, &beta] {
        assert!(retrieval_policy.contains(report.resolved.knowledge_base_arn.as_deref().unwrap()));
    }
}

#[tokio::test]
async fn test_agent_role_attachments_do_not_grow_with_tenants() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    let docs = documents();

    for n in 0..12 {
        orchestrator
            .provision(&format!("tenant-{}", n), docs.path())
            .await
            .unwrap();
    }

    let names = TenantNames::derive("tenant-0", REGION, ACCOUNT).unwrap();
    assert_eq!(cloud.attached_policies(&names.agent_role).await.len(), 2);
    assert_eq!(cloud.attached_policies(&names.kb_role).await.len(), 3);
}

#[tokio::test]
async fn test_same_tenant_runs_are_serialised() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    let docs = documents();

    let (first, second) = tokio::join!(
        orchestrator.provision("acme", docs.path()),
        orchestrator.provision("acme", docs.path()),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.resolved, second.resolved);
    let creates = cloud
        .calls()
        .await
        .iter()
        .filter(|c| c.operation == "create_agent")
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn test_follow_up_question_uses_committed_alias() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    let docs = documents();
    orchestrator.provision("acme", docs.path()).await.unwrap();
    cloud.clear_calls().await;

    let invocation = orchestrator
        .ask("acme", "What was the operating margin?", Some("session-7"))
        .await
        .unwrap();

    assert_eq!(invocation.session_id, "session-7");
    assert!(invocation.answer.ends_with("What was the operating margin?"));
    let operations: Vec<&str> = cloud.calls().await.iter().map(|c| c.operation).collect();
    assert_eq!(operations, vec!["invoke_agent"]);
}

#[tokio::test]
async fn test_terminal_failure_stops_pipeline() {
    let mut profile = SimulationProfile::default();
    profile.failing.insert(ResourceKind::KnowledgeBase);
    let (cloud, orchestrator) = orchestrator(profile).await;
    let docs = documents();

    let err = orchestrator
        .provision_and_ask("acme", docs.path())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::TerminalFailure {
            kind: ResourceKind::KnowledgeBase,
            ..
        }
    ));
    assert!(err.user_message().starts_with("Failed to provision and invoke the agent: "));
    let calls = cloud.calls().await;
    assert!(!calls.iter().any(|c| c.operation == "create_data_source"));
    assert!(!calls.iter().any(|c| c.operation == "create_agent"));
    assert_eq!(
        orchestrator.registry().snapshot("acme").await,
        Some(Default::default())
    );
}

#[tokio::test]
async fn test_cloud_error_passes_through_unchanged() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    let docs = documents();
    cloud
        .inject_error(
            "create_agent",
            CloudError::AccessDenied("not authorized to perform bedrock:CreateAgent".to_string()),
        )
        .await;

    let err = orchestrator
        .provision("acme", docs.path())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        CloudError::AccessDenied("not authorized to perform bedrock:CreateAgent".to_string())
            .to_string()
    );
    assert!(matches!(err, ProvisionError::Cloud(CloudError::AccessDenied(_))));

    // The failed step is retried on the next run and everything before it is reused
    cloud.clear_calls().await;
    let report = orchestrator.provision("acme", docs.path()).await.unwrap();
    let created: Vec<ResourceKind> = report.created().map(|r| r.kind).collect();
    assert_eq!(
        created,
        vec![
            ResourceKind::Agent,
            ResourceKind::AgentKnowledgeBase,
            ResourceKind::AgentAlias
        ]
    );
}

#[tokio::test]
async fn test_rerun_starts_ingestion_after_failed_start() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    let docs = documents();
    cloud
        .inject_error("start_ingestion_job", CloudError::Throttled("rate".to_string()))
        .await;

    let err = orchestrator
        .provision("acme", docs.path())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Cloud(CloudError::Throttled(_))));

    cloud.clear_calls().await;
    let report = orchestrator.provision("acme", docs.path()).await.unwrap();

    assert!(report.ingestion_job_id.is_some());
    let starts = cloud
        .calls()
        .await
        .iter()
        .filter(|c| c.operation == "start_ingestion_job")
        .count();
    assert_eq!(starts, 1);
    assert_eq!(report.documents.skipped, vec!["kb_documents-acme/report.pdf".to_string()]);
}

#[tokio::test]
async fn test_missing_documents_fail_before_cloud_resources() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;

    let err = orchestrator
        .provision("acme", Path::new("/nonexistent/finagent/documents"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Documents(_)));
    assert!(!cloud.calls().await.iter().any(|c| c.operation == "create_collection"));
}

#[tokio::test]
async fn test_invalid_tenant_rejected() {
    let (cloud, orchestrator) = orchestrator(SimulationProfile::default()).await;
    cloud.clear_calls().await;
    let docs = documents();

    for tenant in ["Acme Corp", "a-tenant-id-too-long-for-a-bucket"] {
        let err = orchestrator.provision(tenant, docs.path()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidTenant(_)), "{}", tenant);
    }
    assert!(cloud.calls().await.is_empty());
}
