//! Agent invocation
//!
//! Sends one question to a published alias and assembles the answer from the
//! event stream. `chunk` events carry answer bytes, `trace` events are logged
//! and dropped, and any other event aborts the call. Chunk bytes are
//! collected as they arrive and decoded once the stream ends, so a character
//! split across two chunks survives concatenation.

use crate::cloud::{AgentEvent, AgentRuntimeApi, InvokeRequest};
use crate::config::{ChunkAssembly, InvocationConfig};
use crate::error::{ProvisionError, Result};
use futures_util::StreamExt;
use serde::Serialize;
use uuid::Uuid;

/// Answer of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    /// Session the question was asked in
    pub session_id: String,
    /// Assembled answer text
    pub answer: String,
}

/// Invokes an agent alias and assembles the streamed answer
pub struct Invoker<'a> {
    runtime: &'a dyn AgentRuntimeApi,
    config: &'a InvocationConfig,
}

impl<'a> Invoker<'a> {
    /// Create an invoker
    pub fn new(runtime: &'a dyn AgentRuntimeApi, config: &'a InvocationConfig) -> Self {
        Self { runtime, config }
    }

    /// Ask `text` and return the assembled answer
    ///
    /// # Arguments
    /// * `text` - User question
    /// * `agent_id` - Agent to invoke
    /// * `alias_id` - Published alias of the agent
    /// * `session_id` - Existing session, or `None` to start a new one
    ///
    /// # Returns
    /// * `Ok(Invocation)` - Session id and answer; the answer is empty when
    ///   the stream carried no chunk
    /// * `Err(ProvisionError)` - Provider error, an unexpected event, or an
    ///   answer that is not valid UTF-8
    pub async fn invoke(
        &self,
        text: &str,
        agent_id: &str,
        alias_id: &str,
        session_id: Option<&str>,
    ) -> Result<Invocation> {
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let request = InvokeRequest {
            agent_id: agent_id.to_string(),
            agent_alias_id: alias_id.to_string(),
            session_id: session_id.clone(),
            input_text: text.to_string(),
            enable_trace: self.config.enable_trace,
            end_session: false,
        };

        tracing::info!(agent = %agent_id, alias = %alias_id, session = %session_id, "Invoking agent");
        let mut events = self.runtime.invoke_agent(&request).await?;

        let mut answer: Vec<u8> = Vec::new();
        let mut chunks = 0usize;
        while let Some(event) = events.next().await {
            match event? {
                AgentEvent::Chunk(bytes) => {
                    chunks += 1;
                    match self.config.chunk_assembly {
                        ChunkAssembly::LastChunk => answer = bytes,
                        ChunkAssembly::Concatenate => answer.extend_from_slice(&bytes),
                    }
                }
                AgentEvent::Trace(trace) => {
                    tracing::debug!(session = %session_id, trace = %trace, "Agent trace");
                }
                AgentEvent::Other { tag, payload } => {
                    tracing::error!(session = %session_id, tag = %tag, payload = %payload, "Unexpected event in agent stream");
                    return Err(ProvisionError::UnexpectedStreamEvent(tag));
                }
            }
        }

        if chunks == 0 {
            tracing::warn!(session = %session_id, "Agent stream ended without an answer chunk");
        } else {
            tracing::info!(session = %session_id, chunks = chunks, "Agent answered");
        }

        let answer = String::from_utf8(answer).map_err(|e| {
            tracing::error!(session = %session_id, error = %e, "Agent answer is not valid UTF-8");
            ProvisionError::from(e)
        })?;
        Ok(Invocation { session_id, answer })
    }
}
