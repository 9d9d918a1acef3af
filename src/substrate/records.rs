//! Durable record store and billing collaborator surfaces.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::{
    AccountId, Chunk, MessageType, RunId, RunRecord, RunStatus, ThreadId, ThreadMessage,
};

/// Durable run records plus the thread message log they hang off.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Resolve the account that owns a thread.
    async fn account_for_thread(&self, thread_id: ThreadId) -> Result<Option<AccountId>>;

    /// Most recently persisted user/assistant/tool message for a
    /// thread. System messages are not part of the answered check.
    async fn latest_message(&self, thread_id: ThreadId) -> Result<Option<ThreadMessage>>;

    async fn insert_run(&self, record: RunRecord) -> Result<()>;

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>>;

    /// Ids of runs for `account_id` with status running, started at or
    /// after `since`.
    async fn running_runs_since(
        &self,
        account_id: AccountId,
        since: DateTime<Utc>,
    ) -> Result<Vec<RunId>>;

    /// Record the loop's current iteration count. Best-effort; callers
    /// log rather than propagate failures.
    async fn record_iteration(&self, run_id: RunId, iteration: u32) -> Result<()>;

    /// Write a terminal status, error, and accumulated output.
    ///
    /// Idempotent: writing onto an already-terminal record is a no-op
    /// and returns `false`. Returns `true` when this call performed
    /// the transition. An unknown run id is also a no-op; a stop can
    /// target a run no store node has seen yet.
    async fn finish_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        error: Option<String>,
        responses: Vec<Chunk>,
    ) -> Result<bool>;
}

/// Decision returned by the billing collaborator.
#[derive(Debug, Clone, Default)]
pub struct BillingDecision {
    pub allowed: bool,
    pub message: Option<String>,
    pub subscription: Option<serde_json::Value>,
}

impl BillingDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            message: None,
            subscription: None,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: Some(message.into()),
            subscription: None,
        }
    }
}

/// Billing state gate, consulted at run start and before every
/// iteration (plan caps can be hit mid-run).
#[async_trait]
pub trait BillingGate: Send + Sync {
    async fn check(&self, account_id: AccountId) -> Result<BillingDecision>;
}

/// Billing gate that always returns a fixed decision. Suitable for
/// local deployments and tests.
#[derive(Debug, Clone)]
pub struct StaticBillingGate {
    decision: BillingDecision,
}

impl StaticBillingGate {
    pub fn allowing() -> Self {
        Self {
            decision: BillingDecision::allowed(),
        }
    }

    pub fn denying(message: impl Into<String>) -> Self {
        Self {
            decision: BillingDecision::denied(message),
        }
    }
}

#[async_trait]
impl BillingGate for StaticBillingGate {
    async fn check(&self, _account_id: AccountId) -> Result<BillingDecision> {
        Ok(self.decision.clone())
    }
}

#[derive(Debug, Default)]
struct RunStoreState {
    threads: HashMap<ThreadId, AccountId>,
    messages: Vec<ThreadMessage>,
    runs: HashMap<RunId, RunRecord>,
}

/// In-memory [`RunStore`] for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    state: RwLock<RunStoreState>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a thread with its owning account.
    pub async fn register_thread(&self, thread_id: ThreadId, account_id: AccountId) {
        self.state.write().await.threads.insert(thread_id, account_id);
    }

    /// Append a message to the thread log.
    pub async fn append_message(&self, message: ThreadMessage) {
        self.state.write().await.messages.push(message);
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn account_for_thread(&self, thread_id: ThreadId) -> Result<Option<AccountId>> {
        Ok(self.state.read().await.threads.get(&thread_id).copied())
    }

    async fn latest_message(&self, thread_id: ThreadId) -> Result<Option<ThreadMessage>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id && m.message_type != MessageType::System)
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn insert_run(&self, record: RunRecord) -> Result<()> {
        self.state.write().await.runs.insert(record.id, record);
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        Ok(self.state.read().await.runs.get(&run_id).cloned())
    }

    async fn running_runs_since(
        &self,
        account_id: AccountId,
        since: DateTime<Utc>,
    ) -> Result<Vec<RunId>> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .values()
            .filter(|r| {
                r.account_id == account_id
                    && r.status == RunStatus::Running
                    && r.started_at >= since
            })
            .map(|r| r.id)
            .collect())
    }

    async fn record_iteration(&self, run_id: RunId, iteration: u32) -> Result<()> {
        if let Some(record) = self.state.write().await.runs.get_mut(&run_id) {
            record.iteration_count = iteration;
        }
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        error: Option<String>,
        responses: Vec<Chunk>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(record) = state.runs.get_mut(&run_id) else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }
        record.status = status;
        record.error = error;
        record.responses = responses;
        record.finished_at = Some(Utc::now());
        Ok(true)
    }
}
