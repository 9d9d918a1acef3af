//! End-to-end tests of the run loop controller.

mod common;

use std::sync::Arc;

use agentrun::config::RunnerConfig;
use agentrun::error::AgentRunError;
use agentrun::run::RunRequest;
use agentrun::substrate::{InMemorySubstrate, KeyValueStore, RunStore, StaticBillingGate};
use agentrun::types::{
    AgentProfile, Chunk, MessageType, RunRecord, RunStatus, StatusKind, ThreadMessage,
};
use pretty_assertions::assert_eq;
use uuid::Uuid;

use common::{seeded_store, terminating_status, test_config, test_runner, ScriptedEngine};

fn is_status(chunk: &Chunk, kind: StatusKind) -> bool {
    matches!(chunk, Chunk::Status(status) if status.status == kind)
}

#[tokio::test]
async fn terminating_tool_completes_the_run() {
    let (store, thread_id, _) = seeded_store().await;
    let engine = Arc::new(ScriptedEngine::new());
    engine.queue_turn(vec![
        Chunk::assistant("I need more detail from you."),
        terminating_status("ask"),
    ]);
    let substrate = Arc::new(InMemorySubstrate::new());
    let runner = test_runner(test_config(), store.clone(), engine.clone(), substrate);

    let mut handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let run_id = handle.run_id();

    let mut chunks = Vec::new();
    while let Some(chunk) = handle.next_chunk().await {
        chunks.push(chunk);
    }
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.last_tool.as_deref(), Some("ask"));
    assert_eq!(engine.call_count(), 1);

    // One terminal status chunk, after the forwarded turn output.
    assert_eq!(chunks.len(), 3);
    assert!(is_status(&chunks[2], StatusKind::Completed));

    let record = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.responses.len(), 3);
}

#[tokio::test]
async fn sentinel_text_terminates_without_metadata() {
    let (store, thread_id, _) = seeded_store().await;
    let engine = Arc::new(ScriptedEngine::new());
    engine.queue_turn(vec![Chunk::assistant(
        "All done. <complete>Task finished.</complete>",
    )]);
    let substrate = Arc::new(InMemorySubstrate::new());
    let runner = test_runner(test_config(), store, engine.clone(), substrate);

    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.last_tool.as_deref(), Some("complete"));
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn ask_in_first_turn_ends_a_five_iteration_budget_early() {
    let (store, thread_id, _) = seeded_store().await;
    let engine = Arc::new(ScriptedEngine::new());
    engine.queue_turn(vec![Chunk::assistant(
        "Which environment should I deploy to? <ask>staging or production?</ask>",
    )]);
    let substrate = Arc::new(InMemorySubstrate::new());
    let runner = test_runner(
        test_config().with_max_iterations(5),
        store,
        engine.clone(),
        substrate,
    );

    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.last_tool.as_deref(), Some("ask"));
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn iteration_cap_bounds_the_loop() {
    let (store, thread_id, _) = seeded_store().await;
    // No scripted turns: every turn is non-terminating.
    let engine = Arc::new(ScriptedEngine::new());
    let substrate = Arc::new(InMemorySubstrate::new());
    let config = test_config().with_max_iterations(3);
    let runner = test_runner(config, store, engine.clone(), substrate);

    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.iterations, 3);
    assert_eq!(engine.call_count(), 3);
}

#[tokio::test]
async fn answered_thread_completes_without_an_engine_call() {
    let (store, thread_id, _) = seeded_store().await;
    store
        .append_message(ThreadMessage::new(
            thread_id,
            MessageType::Assistant,
            serde_json::json!({ "content": "already answered" }),
        ))
        .await;
    let engine = Arc::new(ScriptedEngine::new());
    let substrate = Arc::new(InMemorySubstrate::new());
    let runner = test_runner(test_config(), store, engine.clone(), substrate);

    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn error_status_chunk_fails_the_run() {
    let (store, thread_id, _) = seeded_store().await;
    let engine = Arc::new(ScriptedEngine::new());
    engine.queue_turn(vec![
        Chunk::assistant("Attempting the task."),
        Chunk::error_status("tool sandbox crashed"),
    ]);
    let substrate = Arc::new(InMemorySubstrate::new());
    let runner = test_runner(test_config(), store.clone(), engine, substrate);

    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let run_id = handle.run_id();
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("tool sandbox crashed"));

    let record = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("tool sandbox crashed"));
}

#[tokio::test]
async fn mid_stream_transport_error_fails_the_run() {
    let (store, thread_id, _) = seeded_store().await;
    let engine = Arc::new(ScriptedEngine::new());
    engine.queue_items(vec![
        Ok(Chunk::assistant("partial out")),
        Err(AgentRunError::Transport("connection reset".to_string())),
    ]);
    let substrate = Arc::new(InMemorySubstrate::new());
    let runner = test_runner(test_config(), store, engine, substrate);

    let mut handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let mut chunks = Vec::new();
    while let Some(chunk) = handle.next_chunk().await {
        chunks.push(chunk);
    }
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Failed);
    // The transport failure surfaces to the consumer as an error
    // status chunk before the terminal one.
    assert!(chunks.iter().any(|c| c.is_error_status()));
}

#[tokio::test]
async fn billing_denial_stops_before_any_turn() {
    let (store, thread_id, _) = seeded_store().await;
    let engine = Arc::new(ScriptedEngine::new());
    let substrate = Arc::new(InMemorySubstrate::new());
    let runner = agentrun::run::Runner::new(
        test_config(),
        store,
        Arc::new(StaticBillingGate::denying("Monthly limit reached")),
        engine.clone(),
        substrate.clone(),
        substrate,
    );

    let mut handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let mut chunks = Vec::new();
    while let Some(chunk) = handle.next_chunk().await {
        chunks.push(chunk);
    }
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Stopped);
    assert_eq!(engine.call_count(), 0);
    assert_eq!(chunks.len(), 1);
    match &chunks[0] {
        Chunk::Status(status) => {
            assert_eq!(status.status, StatusKind::Stopped);
            assert_eq!(
                status.message.as_deref(),
                Some("Billing limit reached: Monthly limit reached")
            );
        }
        other => panic!("expected a status chunk, got {other:?}"),
    }
}

#[tokio::test]
async fn sole_run_is_admitted_at_cap_one() {
    let (store, thread_id, _) = seeded_store().await;
    let engine = Arc::new(ScriptedEngine::new());
    engine.queue_turn(vec![terminating_status("complete")]);
    let substrate = Arc::new(InMemorySubstrate::new());
    let config = test_config().with_max_parallel_runs(1);
    let runner = test_runner(config, store, engine.clone(), substrate);

    // The run's own record must not count against the cap.
    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn run_under_cap_is_admitted_alongside_existing_runs() {
    let (store, thread_id, account_id) = seeded_store().await;
    // Two other runs already running: a third fits under a cap of 3.
    for _ in 0..2 {
        store
            .insert_run(RunRecord::new(Uuid::new_v4(), Uuid::new_v4(), account_id))
            .await
            .unwrap();
    }
    let engine = Arc::new(ScriptedEngine::new());
    engine.queue_turn(vec![terminating_status("complete")]);
    let substrate = Arc::new(InMemorySubstrate::new());
    let config = test_config().with_max_parallel_runs(3);
    let runner = test_runner(config, store, engine.clone(), substrate);

    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn concurrency_cap_denies_the_next_run() {
    let (store, thread_id, account_id) = seeded_store().await;
    // Three runs already running inside the window.
    for _ in 0..3 {
        store
            .insert_run(RunRecord::new(Uuid::new_v4(), Uuid::new_v4(), account_id))
            .await
            .unwrap();
    }
    let engine = Arc::new(ScriptedEngine::new());
    let substrate = Arc::new(InMemorySubstrate::new());
    let config = RunnerConfig::default()
        .with_instance_id("worker-test")
        .with_max_parallel_runs(3);
    let runner = test_runner(config, store, engine.clone(), substrate);

    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Stopped);
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn unknown_thread_fails_setup() {
    let (store, _, _) = seeded_store().await;
    let engine = Arc::new(ScriptedEngine::new());
    let substrate = Arc::new(InMemorySubstrate::new());
    let runner = test_runner(test_config(), store, engine.clone(), substrate);

    // Thread never registered with an account.
    let handle = runner.start(RunRequest::new(Uuid::new_v4(), AgentProfile::default()));
    let result = handle.wait().await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.unwrap().contains("no account for thread"));
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn response_buffer_is_deleted_at_terminal() {
    let (store, thread_id, _) = seeded_store().await;
    let engine = Arc::new(ScriptedEngine::new());
    engine.queue_turn(vec![terminating_status("complete")]);
    let substrate = Arc::new(InMemorySubstrate::new());
    let runner = test_runner(test_config(), store, engine, substrate.clone());

    let handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
    let run_id = handle.run_id();
    let result = handle.wait().await;
    assert_eq!(result.status, RunStatus::Completed);

    let buffer_key = agentrun::control::response_buffer_key(run_id);
    assert!(substrate.list_all(&buffer_key).await.unwrap().is_empty());
    // Liveness key removed as well.
    let liveness = agentrun::control::liveness_key("worker-test", run_id);
    assert_eq!(substrate.get(&liveness).await.unwrap(), None);
}
