//! finagent - command-line front-end for the financial agent provisioner
//!
//! `plan` shows what a tenant would get, `simulate` runs the full pipeline
//! against the in-memory cloud.

mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use finagent_provisioner::cloud::memory::{InMemoryCloud, SimulationProfile};
use finagent_provisioner::config::TimingConfig;
use finagent_provisioner::{CloudClients, Config, Orchestrator, TenantNames};
use std::path::PathBuf;
use std::sync::Arc;

/// Provision and query per-tenant financial document agents
#[derive(Parser)]
#[command(name = "finagent")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a tenant's resource names and policy documents
    Plan(PlanArgs),

    /// Run the whole pipeline against the simulated cloud
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct PlanArgs {
    /// Tenant id (lowercase letters, digits and '-')
    tenant: String,

    /// Region resources are created in
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Account id resources are created in
    #[arg(long, default_value = "123456789012")]
    account: String,
}

#[derive(Args)]
struct SimulateArgs {
    /// Tenant id (lowercase letters, digits and '-')
    tenant: String,

    /// Document file or directory to upload
    #[arg(short, long)]
    documents: PathBuf,

    /// Account id of the simulated cloud
    #[arg(long, default_value = "123456789012")]
    account: String,

    /// Status reads before a simulated resource becomes ready
    #[arg(long, default_value_t = 1)]
    polls: u32,

    /// Keep the configured poll intervals and propagation delays
    #[arg(long)]
    real_timing: bool,

    /// Provision twice to show that the second run only checks existence
    #[arg(long)]
    twice: bool,

    /// Follow-up questions asked in the verification session
    #[arg(short, long = "ask")]
    questions: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "finagent_provisioner=debug,finagent=debug,info"
    } else {
        "finagent_provisioner=info,finagent=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Plan(args) => plan(args, cli.json),
        Commands::Simulate(args) => simulate(args, cli.json).await,
    }
}

fn plan(args: PlanArgs, json: bool) -> Result<()> {
    let config = Config::from_env()?;
    let names = TenantNames::derive(&args.tenant, &args.region, &args.account)?;
    output::print_plan(&output::Plan::new(&names, &config), json)
}

async fn simulate(args: SimulateArgs, json: bool) -> Result<()> {
    let mut config = Config::from_env()?;
    if !args.real_timing {
        config.timing = TimingConfig::immediate();
    }

    let profile = SimulationProfile {
        polls_until_ready: args.polls,
        ..SimulationProfile::default()
    };
    let cloud = Arc::new(InMemoryCloud::with_profile(
        &config.cloud.region,
        &args.account,
        profile,
    ));
    let orchestrator = Orchestrator::connect(CloudClients::from_provider(cloud.clone()), config)
        .await
        .context("Failed to connect to the simulated cloud")?;

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling the provisioning run");
            cancel.cancel();
        }
    });

    let runs = if args.twice { 2 } else { 1 };
    for run in 1..=runs {
        let report = orchestrator
            .provision_and_invoke(&args.tenant, &args.documents)
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()))?;
        let mutating = cloud.mutating_calls().await.len();
        output::print_report(run, &report, mutating, json)?;
        cloud.clear_calls().await;

        if run == runs {
            let session = report.invocation.as_ref().map(|i| i.session_id.clone());
            for question in &args.questions {
                let invocation = orchestrator
                    .ask(&args.tenant, question, session.as_deref())
                    .await
                    .map_err(|e| anyhow::anyhow!(e.user_message()))?;
                output::print_answer(question, &invocation, json)?;
            }
        }
    }

    Ok(())
}
