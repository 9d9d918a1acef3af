//! Completion-engine boundary.
//!
//! The engine owns model calling, XML tool-call parsing, and tool
//! execution; this crate only drives it one turn at a time and
//! classifies what comes back.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::catalog::ToolCatalog;
use crate::error::{AgentRunError, Result};
use crate::types::{Chunk, ThreadId};

/// Ordered, finite chunk sequence produced by one turn.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>;

/// Tool-choice directive passed to the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

/// How the engine runs multiple tool calls from a single turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionStrategy {
    Sequential,
    #[default]
    Parallel,
}

/// Ephemeral system-message addendum for one turn. Never persisted to
/// the thread; delivered as a user-visible message rather than merged
/// into the system prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EphemeralAddendum {
    pub content: String,
}

/// Options for one completion turn.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub tool_choice: ToolChoice,
    /// At most this many XML-style tool invocations are accepted per
    /// turn.
    pub max_xml_tool_calls: u32,
    pub execution_strategy: ToolExecutionStrategy,
    pub addendum: Option<EphemeralAddendum>,
}

impl TurnOptions {
    /// Standard options for a model: zero temperature, auto tool
    /// choice, one XML tool call, parallel execution, and the
    /// model-tier output ceiling.
    pub fn for_model(model: impl Into<String>) -> Self {
        let model = model.into();
        let max_output_tokens = max_output_tokens(&model);
        Self {
            model,
            temperature: 0.0,
            max_output_tokens,
            tool_choice: ToolChoice::Auto,
            max_xml_tool_calls: 1,
            execution_strategy: ToolExecutionStrategy::Parallel,
            addendum: None,
        }
    }

    pub fn with_addendum(mut self, addendum: Option<EphemeralAddendum>) -> Self {
        self.addendum = addendum;
        self
    }
}

/// What one turn produced: a live stream, or a refusal the engine
/// returned instead of a stream (a non-streaming error object).
pub enum TurnOutput {
    Stream(ChunkStream),
    Refusal(Chunk),
}

impl TurnOutput {
    /// Wrap an already-collected chunk sequence (tests, replays).
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self::Stream(Box::pin(futures::stream::iter(
            chunks.into_iter().map(Ok),
        )))
    }

    /// Wrap a sequence of stream items including mid-stream errors.
    pub fn from_items(items: Vec<std::result::Result<Chunk, AgentRunError>>) -> Self {
        Self::Stream(Box::pin(futures::stream::iter(items)))
    }
}

/// One turn of the external completion engine.
#[async_trait]
pub trait CompletionEngine: Send + Sync {
    /// Run a single completion-and-tool-execution turn over the
    /// thread's message log.
    ///
    /// # Errors
    ///
    /// Fails when the turn cannot be started at all; failures after
    /// streaming begins surface inside the stream instead.
    async fn run_turn(
        &self,
        thread_id: ThreadId,
        system_prompt: &str,
        catalog: &ToolCatalog,
        options: TurnOptions,
    ) -> Result<TurnOutput>;
}

/// Model-tier → max-output-token ceiling. Unrecognized models get no
/// explicit ceiling.
pub fn max_output_tokens(model: &str) -> Option<u32> {
    let model = model.to_lowercase();
    if model.contains("sonnet") {
        Some(8192)
    } else if model.contains("gpt-4") {
        Some(4096)
    } else if model.contains("gemini-2.5-pro") {
        Some(64000)
    } else if model.contains("kimi-k2") {
        Some(8192)
    } else {
        None
    }
}
