//! Shared test helpers: a scripted completion engine and store
//! seeding utilities.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use agentrun::catalog::ToolCatalog;
use agentrun::config::RunnerConfig;
use agentrun::engine::{CompletionEngine, TurnOptions, TurnOutput};
use agentrun::error::{AgentRunError, Result};
use agentrun::run::Runner;
use agentrun::substrate::{InMemoryRunStore, InMemorySubstrate, StaticBillingGate};
use agentrun::types::{
    AccountId, Chunk, ChunkMetadata, MessageType, StatusChunk, StatusKind, ThreadId,
    ThreadMessage,
};
use uuid::Uuid;

type TurnScript = Vec<std::result::Result<Chunk, AgentRunError>>;

/// Completion engine that replays queued turn scripts.
///
/// Each `run_turn` call pops the next queued script; when the queue is
/// empty it produces a plain non-terminating assistant chunk, so a
/// run keeps iterating until something else ends it.
pub struct ScriptedEngine {
    turns: Mutex<VecDeque<TurnScript>>,
    calls: AtomicUsize,
    turn_delay: Option<Duration>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            turn_delay: None,
        }
    }

    /// Sleep this long inside every turn, giving cancellation tests a
    /// window to land a STOP mid-run.
    pub fn with_turn_delay(mut self, delay: Duration) -> Self {
        self.turn_delay = Some(delay);
        self
    }

    /// Queue one turn's chunk sequence.
    pub fn queue_turn(&self, chunks: Vec<Chunk>) {
        self.queue_items(chunks.into_iter().map(Ok).collect());
    }

    /// Queue one turn including mid-stream errors.
    pub fn queue_items(&self, items: TurnScript) {
        self.turns.lock().unwrap().push_back(items);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionEngine for ScriptedEngine {
    async fn run_turn(
        &self,
        _thread_id: ThreadId,
        _system_prompt: &str,
        _catalog: &ToolCatalog,
        _options: TurnOptions,
    ) -> Result<TurnOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.turn_delay {
            tokio::time::sleep(delay).await;
        }
        let items = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Ok(Chunk::assistant("Still working on it."))]);
        Ok(TurnOutput::from_items(items))
    }
}

/// Status chunk carrying the explicit termination flag, as the
/// engine's tool path emits after a terminating tool ran.
pub fn terminating_status(tool: &str) -> Chunk {
    Chunk::Status(StatusChunk {
        status: StatusKind::Running,
        message: None,
        function_name: Some(tool.to_string()),
        xml_tag_name: None,
        metadata: ChunkMetadata::terminating(),
    })
}

/// Store seeded with one thread owned by a fresh account, holding a
/// single user message.
pub async fn seeded_store() -> (Arc<InMemoryRunStore>, ThreadId, AccountId) {
    let store = Arc::new(InMemoryRunStore::new());
    let thread_id = Uuid::new_v4();
    let account_id = Uuid::new_v4();
    store.register_thread(thread_id, account_id).await;
    store
        .append_message(ThreadMessage::new(
            thread_id,
            MessageType::User,
            serde_json::json!({ "content": "hello" }),
        ))
        .await;
    (store, thread_id, account_id)
}

/// Runner over in-memory collaborators with an always-allowing
/// billing gate.
pub fn test_runner(
    config: RunnerConfig,
    store: Arc<InMemoryRunStore>,
    engine: Arc<ScriptedEngine>,
    substrate: Arc<InMemorySubstrate>,
) -> Runner {
    Runner::new(
        config,
        store,
        Arc::new(StaticBillingGate::allowing()),
        engine,
        substrate.clone(),
        substrate,
    )
}

/// Standard test config: fixed instance id, small iteration cap.
pub fn test_config() -> RunnerConfig {
    RunnerConfig::default()
        .with_instance_id("worker-test")
        .with_max_iterations(5)
}
