//! Tests of the distributed cancellation subsystem against a live
//! run loop.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use agentrun::control::{
    global_control_channel, instance_control_channel, liveness_key, response_buffer_key,
    stop_run, STOP_SIGNAL,
};
use agentrun::error::{AgentRunError, Result};
use agentrun::run::RunRequest;
use agentrun::substrate::{ControlBus, InMemorySubstrate, KeyValueStore, RunStore};
use agentrun::types::{
    AccountId, AgentProfile, Chunk, RunId, RunRecord, RunStatus, ThreadId, ThreadMessage,
};
use pretty_assertions::assert_eq;
use uuid::Uuid;

use common::{seeded_store, terminating_status, test_config, test_runner, ScriptedEngine};

/// Store whose terminal write always fails.
struct UnwritableStore;

#[async_trait]
impl RunStore for UnwritableStore {
    async fn account_for_thread(&self, _thread_id: ThreadId) -> Result<Option<AccountId>> {
        Ok(None)
    }

    async fn latest_message(&self, _thread_id: ThreadId) -> Result<Option<ThreadMessage>> {
        Ok(None)
    }

    async fn insert_run(&self, _record: RunRecord) -> Result<()> {
        Ok(())
    }

    async fn get_run(&self, _run_id: RunId) -> Result<Option<RunRecord>> {
        Ok(None)
    }

    async fn running_runs_since(
        &self,
        _account_id: AccountId,
        _since: DateTime<Utc>,
    ) -> Result<Vec<RunId>> {
        Ok(Vec::new())
    }

    async fn record_iteration(&self, _run_id: RunId, _iteration: u32) -> Result<()> {
        Ok(())
    }

    async fn finish_run(
        &self,
        _run_id: RunId,
        _status: RunStatus,
        _error: Option<String>,
        _responses: Vec<Chunk>,
    ) -> Result<bool> {
        Err(AgentRunError::store("write refused"))
    }
}

#[tokio::test]
async fn stop_fans_out_even_when_persistence_fails() {
    let substrate = InMemorySubstrate::new();
    let run_id = Uuid::new_v4();

    let mut global = substrate
        .subscribe(&global_control_channel(run_id))
        .await
        .unwrap();
    let mut scoped = substrate
        .subscribe(&instance_control_channel(run_id, "worker-a"))
        .await
        .unwrap();
    substrate
        .set(&liveness_key("worker-a", run_id), "running", None)
        .await
        .unwrap();
    substrate
        .list_push(
            &response_buffer_key(run_id),
            serde_json::to_string(&Chunk::assistant("partial")).unwrap(),
        )
        .await
        .unwrap();

    let status = stop_run(&UnwritableStore, &substrate, &substrate, run_id, None).await;

    assert_eq!(status, RunStatus::Stopped);
    assert_eq!(global.try_recv().as_deref(), Some(STOP_SIGNAL));
    assert_eq!(scoped.try_recv().as_deref(), Some(STOP_SIGNAL));
    assert!(substrate
        .list_all(&response_buffer_key(run_id))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn stop_reaches_every_registered_instance() {
    let substrate = InMemorySubstrate::new();
    let store = UnwritableStore;
    let run_id = Uuid::new_v4();

    let mut subscriptions = Vec::new();
    for instance in ["worker-a", "worker-b"] {
        subscriptions.push(
            substrate
                .subscribe(&instance_control_channel(run_id, instance))
                .await
                .unwrap(),
        );
        substrate
            .set(&liveness_key(instance, run_id), "running", None)
            .await
            .unwrap();
    }
    // A liveness key for a different run is left untouched.
    let other_run = Uuid::new_v4();
    let mut other = substrate
        .subscribe(&instance_control_channel(other_run, "worker-a"))
        .await
        .unwrap();
    substrate
        .set(&liveness_key("worker-a", other_run), "running", None)
        .await
        .unwrap();

    stop_run(&store, &substrate, &substrate, run_id, None).await;

    for mut subscription in subscriptions {
        assert_eq!(subscription.try_recv().as_deref(), Some(STOP_SIGNAL));
    }
    assert_eq!(other.try_recv(), None);
}

#[tokio::test]
async fn stop_ends_a_live_run_cooperatively() {
    let (store, thread_id, _) = seeded_store().await;
    // Slow, never-terminating turns leave a window for the STOP.
    let engine = Arc::new(ScriptedEngine::new().with_turn_delay(Duration::from_millis(20)));
    let substrate = Arc::new(InMemorySubstrate::new());
    let config = test_config().with_max_iterations(100);
    let runner = test_runner(config, store.clone(), engine.clone(), substrate.clone());

    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let run_id = handle.run_id();

    // Let at least one turn start, then stop from "another process".
    tokio::time::sleep(Duration::from_millis(30)).await;
    stop_run(
        store.as_ref(),
        substrate.as_ref(),
        substrate.as_ref(),
        run_id,
        None,
    )
    .await;

    let result = handle.wait().await;
    assert_eq!(result.status, RunStatus::Stopped);
    assert!(engine.call_count() >= 1);
    assert!(result.iterations < 100);

    let record = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Stopped);
}

#[tokio::test]
async fn stop_after_natural_completion_is_a_noop() {
    let (store, thread_id, _) = seeded_store().await;
    let engine = Arc::new(ScriptedEngine::new());
    engine.queue_turn(vec![terminating_status("complete")]);
    let substrate = Arc::new(InMemorySubstrate::new());
    let runner = test_runner(test_config(), store.clone(), engine, substrate.clone());

    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let run_id = handle.run_id();
    let result = handle.wait().await;
    assert_eq!(result.status, RunStatus::Completed);

    // A late stop must not rewrite the terminal status.
    stop_run(
        store.as_ref(),
        substrate.as_ref(),
        substrate.as_ref(),
        run_id,
        Some("late request".to_string()),
    )
    .await;

    let record = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.error, None);
}
