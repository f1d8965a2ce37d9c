//! Provisioner configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults. Defaults reproduce the delays and model choices the
//! provisioning flow was tuned against; tests shrink the timing section to
//! zero through [`TimingConfig::immediate`].

use crate::error::ProvisionError;
use crate::poll::PollPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Provisioner configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Region and account-level settings
    pub cloud: CloudConfig,
    /// Model selection
    pub models: ModelConfig,
    /// Poll and propagation delays
    pub timing: TimingConfig,
    /// Agent invocation settings
    pub invocation: InvocationConfig,
    /// Ingestion settings
    pub ingestion: IngestionConfig,
}

/// Region and account-level settings
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Region every resource is created in
    pub region: String,
    /// Name of the administrator role granted collection data access
    pub admin_role: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            admin_role: "Admin".to_string(),
        }
    }
}

/// Model selection
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Embedding model used by the knowledge base
    pub embedding_model: String,
    /// Foundation model backing the agent
    pub foundation_model: String,
    /// Agent session idle timeout in seconds
    pub idle_session_ttl_secs: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding_model: "amazon.titan-embed-text-v1".to_string(),
            foundation_model: "anthropic.claude-3-sonnet-20240229-v1:0".to_string(),
            idle_session_ttl_secs: 1800,
        }
    }
}

/// Fixed waits that absorb the provider's eventual consistency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleDelays {
    /// After a role is created or a policy attached
    pub after_role_change: Duration,
    /// After the collection is active, before the index is created
    pub before_index: Duration,
    /// Before the knowledge base is created
    pub before_knowledge_base: Duration,
    /// Before the data source is created
    pub before_data_source: Duration,
    /// Before and after the alias is created
    pub around_alias: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            after_role_change: Duration::from_secs(10),
            before_index: Duration::from_secs(45),
            before_knowledge_base: Duration::from_secs(45),
            before_data_source: Duration::from_secs(45),
            around_alias: Duration::from_secs(30),
        }
    }
}

impl SettleDelays {
    /// No waiting at all
    pub fn none() -> Self {
        Self {
            after_role_change: Duration::ZERO,
            before_index: Duration::ZERO,
            before_knowledge_base: Duration::ZERO,
            before_data_source: Duration::ZERO,
            around_alias: Duration::ZERO,
        }
    }

    /// Scale every delay by `percent` (100 keeps them unchanged)
    pub fn scaled(&self, percent: u32) -> Self {
        let scale = |d: Duration| d * percent / 100;
        Self {
            after_role_change: scale(self.after_role_change),
            before_index: scale(self.before_index),
            before_knowledge_base: scale(self.before_knowledge_base),
            before_data_source: scale(self.before_data_source),
            around_alias: scale(self.around_alias),
        }
    }
}

/// Poll and propagation delays
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// First wait between two status reads
    pub poll_initial_interval: Duration,
    /// Upper bound for the backoff interval
    pub poll_max_interval: Duration,
    /// Backoff growth factor
    pub poll_multiplier: f64,
    /// Total time a single wait may take
    pub poll_deadline: Duration,
    /// Fixed propagation delays
    pub settle: SettleDelays,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_initial_interval: Duration::from_secs(5),
            poll_max_interval: Duration::from_secs(30),
            poll_multiplier: 2.0,
            poll_deadline: Duration::from_secs(900),
            settle: SettleDelays::default(),
        }
    }
}

impl TimingConfig {
    /// Millisecond polls and no propagation delays
    ///
    /// Used against the simulated provider, which has no eventual
    /// consistency to wait out.
    pub fn immediate() -> Self {
        Self {
            poll_initial_interval: Duration::from_millis(1),
            poll_max_interval: Duration::from_millis(5),
            poll_multiplier: 2.0,
            poll_deadline: Duration::from_secs(5),
            settle: SettleDelays::none(),
        }
    }

    /// Poll policy built from this configuration
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_interval: self.poll_initial_interval,
            max_interval: self.poll_max_interval,
            multiplier: self.poll_multiplier,
            deadline: self.poll_deadline,
        }
    }
}

/// How chunk events of an agent response become the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkAssembly {
    /// Only the last chunk received is the answer
    #[default]
    LastChunk,
    /// Chunks are appended in arrival order
    Concatenate,
}

impl FromStr for ChunkAssembly {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last" | "last_chunk" => Ok(ChunkAssembly::LastChunk),
            "concat" | "concatenate" => Ok(ChunkAssembly::Concatenate),
            other => Err(ProvisionError::InvalidConfig(format!(
                "unknown chunk assembly mode '{}'",
                other
            ))),
        }
    }
}

/// Agent invocation settings
#[derive(Debug, Clone)]
pub struct InvocationConfig {
    /// Question asked once the agent is provisioned
    pub verification_question: String,
    /// How answer chunks are assembled
    pub chunk_assembly: ChunkAssembly,
    /// Ask the agent for trace events
    pub enable_trace: bool,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            verification_question: "How much did the company make last year".to_string(),
            chunk_assembly: ChunkAssembly::LastChunk,
            enable_trace: true,
        }
    }
}

/// Ingestion settings
#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    /// Poll the ingestion job to completion before creating the agent
    pub wait_for_completion: bool,
}

/// Parse an environment variable, ignoring values that do not parse
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables with defaults
    ///
    /// Unparseable numeric values fall back to their default; an unknown
    /// chunk assembly mode is reported as an error.
    pub fn from_env() -> Result<Self, ProvisionError> {
        let mut config = Config::default();

        if let Ok(region) = env::var("AWS_REGION") {
            config.cloud.region = region;
        }
        if let Ok(role) = env::var("FINAGENT_ADMIN_ROLE") {
            config.cloud.admin_role = role;
        }
        if let Ok(model) = env::var("FINAGENT_EMBEDDING_MODEL") {
            config.models.embedding_model = model;
        }
        if let Ok(model) = env::var("FINAGENT_FOUNDATION_MODEL") {
            config.models.foundation_model = model;
        }

        if let Some(secs) = env_parse::<u64>("FINAGENT_POLL_INITIAL_SECS") {
            config.timing.poll_initial_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("FINAGENT_POLL_MAX_SECS") {
            config.timing.poll_max_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("FINAGENT_POLL_DEADLINE_SECS") {
            config.timing.poll_deadline = Duration::from_secs(secs);
        }
        if let Some(percent) = env_parse::<u32>("FINAGENT_SETTLE_SECS_SCALE") {
            config.timing.settle = config.timing.settle.scaled(percent);
        }

        if let Ok(question) = env::var("FINAGENT_VERIFICATION_QUESTION") {
            config.invocation.verification_question = question;
        }
        if let Ok(mode) = env::var("FINAGENT_CHUNK_ASSEMBLY") {
            config.invocation.chunk_assembly = mode.parse()?;
        }
        if let Some(wait) = env_parse::<bool>("FINAGENT_WAIT_FOR_INGESTION") {
            config.ingestion.wait_for_completion = wait;
        }

        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let invalid = |msg: &str| Err(ProvisionError::InvalidConfig(msg.to_string()));

        if self.cloud.region.trim().is_empty() {
            return invalid("region cannot be empty");
        }
        if self.models.embedding_model.trim().is_empty() {
            return invalid("embedding model cannot be empty");
        }
        if self.models.foundation_model.trim().is_empty() {
            return invalid("foundation model cannot be empty");
        }
        if self.timing.poll_initial_interval.is_zero() {
            return invalid("poll interval must be > 0");
        }
        if self.timing.poll_max_interval < self.timing.poll_initial_interval {
            return invalid("maximum poll interval must not be below the initial interval");
        }
        if self.timing.poll_multiplier < 1.0 {
            return invalid("poll multiplier must be >= 1.0");
        }
        if self.timing.poll_deadline.is_zero() {
            return invalid("poll deadline must be > 0");
        }
        if self.invocation.verification_question.trim().is_empty() {
            return invalid("verification question cannot be empty");
        }
        Ok(())
    }
}
