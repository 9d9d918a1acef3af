//! The run loop controller: Setup, Iterating, and terminal states.
//!
//! `Runner::start` spawns one task per run and hands back a
//! `RunHandle` carrying the live chunk stream and the final
//! `RunResult`. Everything after spawn is reported through the
//! handle; the loop itself never panics a caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::catalog::{CatalogBuilder, ExternalToolProvider, ToolCatalog};
use crate::config::RunnerConfig;
use crate::control::{response_buffer_key, RunRegistration};
use crate::engine::{CompletionEngine, EphemeralAddendum, TurnOptions};
use crate::error::{AgentRunError, Result};
use crate::interpreter::{classify_turn, ChunkSink};
use crate::substrate::{BillingGate, ControlBus, KeyValueStore, RunStore};
use crate::types::{
    AgentProfile, Chunk, RunId, RunRecord, RunStatus, StatusKind, ThreadId,
};

/// Model used when the profile does not pin one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4";

/// System prompt used when the profile carries none.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a capable autonomous agent. Work through the \
     user's request step by step, invoking tools where they help, and signal completion \
     with the complete tool when the task is done or the ask tool when you need input.";

/// Turn addendum injected while a profile is being edited in builder
/// mode. Takes precedence over the profile's own system prompt.
const BUILDER_MODE_INSTRUCTIONS: &str = "You are currently helping the user configure this \
     agent. Focus on refining the agent's instructions, tools, and behavior rather than \
     performing the agent's task itself.";

/// Request payload to start a run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: RunId,
    pub thread_id: ThreadId,
    pub model: String,
    pub profile: AgentProfile,
}

impl RunRequest {
    /// New request with a fresh run id; the model comes from the
    /// profile, falling back to [`DEFAULT_MODEL`].
    pub fn new(thread_id: ThreadId, profile: AgentProfile) -> Self {
        let model = profile
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self {
            run_id: Uuid::new_v4(),
            thread_id,
            model,
            profile,
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Iterations started before the run ended.
    pub iterations: u32,
    /// Name of the tool that ended the run, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tool: Option<String>,
    #[serde(default)]
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn completed(iterations: u32, last_tool: Option<String>) -> Self {
        Self {
            status: RunStatus::Completed,
            error: None,
            iterations,
            last_tool,
            finished_at: Utc::now(),
        }
    }

    pub fn stopped(iterations: u32) -> Self {
        Self {
            status: RunStatus::Stopped,
            error: None,
            iterations,
            last_tool: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(iterations: u32, error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(error.into()),
            iterations,
            last_tool: None,
            finished_at: Utc::now(),
        }
    }
}

/// Handle for an in-flight run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    chunks: mpsc::UnboundedReceiver<Chunk>,
    result_rx: oneshot::Receiver<RunResult>,
}

impl RunHandle {
    fn new(
        run_id: RunId,
    ) -> (
        Self,
        mpsc::UnboundedSender<Chunk>,
        oneshot::Sender<RunResult>,
    ) {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        (
            Self {
                run_id,
                chunks: chunk_rx,
                result_rx,
            },
            chunk_tx,
            result_tx,
        )
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Next forwarded chunk; `None` once the run's stream has ended.
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        self.chunks.recv().await
    }

    /// Drain remaining chunks and wait for the final result.
    pub async fn wait(mut self) -> RunResult {
        // Keep the channel drained so the loop is never blocked on a
        // full buffer (unbounded today, but the contract stands).
        self.chunks.close();
        self.result_rx
            .await
            .unwrap_or_else(|_| RunResult::failed(0, "run task ended without reporting a result"))
    }
}

/// Builds the per-run system prompt from the profile and catalog.
#[async_trait]
pub trait PromptBuilder: Send + Sync {
    async fn build(&self, profile: &AgentProfile, catalog: &ToolCatalog) -> Result<String>;
}

/// Prompt builder used when the host supplies none: profile prompt
/// (or the stock one) plus the catalog's tool listing.
pub struct DefaultPromptBuilder;

#[async_trait]
impl PromptBuilder for DefaultPromptBuilder {
    async fn build(&self, profile: &AgentProfile, catalog: &ToolCatalog) -> Result<String> {
        let mut prompt = profile
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        if !catalog.is_empty() {
            prompt.push_str("\n\n# Available tools\n");
            for summary in catalog.prompt_summary() {
                prompt.push_str(&format!(
                    "- {}: {} (parameters: {})\n",
                    summary.name,
                    summary.description,
                    summary.parameter_names.join(", "),
                ));
            }
        }
        let instructions = catalog.prompt_instructions();
        if !instructions.is_empty() {
            prompt.push_str("\n");
            prompt.push_str(instructions);
        }
        Ok(prompt)
    }
}

/// Forwarding destination for one run's chunks: substrate response
/// buffer plus the handle's local channel.
///
/// A buffer write failure is logged and does not interrupt delivery
/// to the local consumer; a closed local channel (handle dropped or
/// waiting on the result only) is not an error either.
struct OutputChannel {
    buffer_key: String,
    kv: Arc<dyn KeyValueStore>,
    tx: mpsc::UnboundedSender<Chunk>,
}

#[async_trait]
impl ChunkSink for OutputChannel {
    async fn emit(&self, chunk: Chunk) -> Result<()> {
        let serialized = serde_json::to_string(&chunk)?;
        if let Err(err) = self.kv.list_push(&self.buffer_key, serialized).await {
            warn!(key = %self.buffer_key, error = %err, "failed to append chunk to response buffer");
        }
        let _ = self.tx.send(chunk);
        Ok(())
    }
}

/// Executes runs: one spawned task per `start`.
pub struct Runner {
    config: RunnerConfig,
    store: Arc<dyn RunStore>,
    bus: Arc<dyn ControlBus>,
    kv: Arc<dyn KeyValueStore>,
    engine: Arc<dyn CompletionEngine>,
    prompts: Arc<dyn PromptBuilder>,
    admission: Arc<AdmissionController>,
    external_tools: Option<Arc<dyn ExternalToolProvider>>,
    data_providers_available: bool,
}

impl Runner {
    pub fn new(
        config: RunnerConfig,
        store: Arc<dyn RunStore>,
        billing: Arc<dyn BillingGate>,
        engine: Arc<dyn CompletionEngine>,
        bus: Arc<dyn ControlBus>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(&config, store.clone(), billing));
        Self {
            config,
            store,
            bus,
            kv,
            engine,
            prompts: Arc::new(DefaultPromptBuilder),
            admission,
            external_tools: None,
            data_providers_available: false,
        }
    }

    pub fn with_prompt_builder(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_external_tools(mut self, provider: Arc<dyn ExternalToolProvider>) -> Self {
        self.external_tools = Some(provider);
        self
    }

    pub fn with_data_providers(mut self, available: bool) -> Self {
        self.data_providers_available = available;
        self
    }

    /// Spawn the run. Setup failures are reported through the handle
    /// as a Failed result, never as a panic.
    pub fn start(&self, request: RunRequest) -> RunHandle {
        let (handle, chunk_tx, result_tx) = RunHandle::new(request.run_id);
        let execution = RunExecution {
            config: self.config.clone(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            kv: self.kv.clone(),
            engine: self.engine.clone(),
            prompts: self.prompts.clone(),
            admission: self.admission.clone(),
            external_tools: self.external_tools.clone(),
            data_providers_available: self.data_providers_available,
        };

        tokio::spawn(async move {
            info!(
                run_id = %request.run_id,
                thread_id = %request.thread_id,
                model = %request.model,
                "run started"
            );
            let result = execution.run(request, chunk_tx).await;
            info!(
                status = %result.status,
                iterations = result.iterations,
                "run finished"
            );
            let _ = result_tx.send(result);
        });

        handle
    }
}

/// Everything one spawned run task owns.
struct RunExecution {
    config: RunnerConfig,
    store: Arc<dyn RunStore>,
    bus: Arc<dyn ControlBus>,
    kv: Arc<dyn KeyValueStore>,
    engine: Arc<dyn CompletionEngine>,
    prompts: Arc<dyn PromptBuilder>,
    admission: Arc<AdmissionController>,
    external_tools: Option<Arc<dyn ExternalToolProvider>>,
    data_providers_available: bool,
}

/// Why the iteration loop ended.
enum LoopOutcome {
    /// Termination signal, resume-safety hit, or iteration cap.
    Completed { last_tool: Option<String> },
    /// Cooperative STOP or an admission denial (with its message).
    Stopped { message: String },
    Failed { error: String },
}

impl RunExecution {
    async fn run(self, request: RunRequest, chunk_tx: mpsc::UnboundedSender<Chunk>) -> RunResult {
        let run_id = request.run_id;

        // Setup state. Failures here are fatal and never enter the
        // iteration loop.
        let setup = match self.setup(&request, chunk_tx.clone()).await {
            Ok(setup) => setup,
            Err(err) => {
                error!(%run_id, error = %err, "run setup failed");
                let message = err.to_string();
                let _ = chunk_tx.send(Chunk::error_status(message.clone()));
                // Best-effort terminal write; the record may not exist
                // yet when account resolution was the failure.
                if let Err(store_err) = self
                    .store
                    .finish_run(run_id, RunStatus::Failed, Some(message.clone()), Vec::new())
                    .await
                {
                    warn!(%run_id, error = %store_err, "failed to persist setup failure");
                }
                return RunResult::failed(0, message);
            }
        };

        let SetupState {
            account_id,
            catalog,
            system_prompt,
            mut registration,
            sink,
        } = setup;

        let mut iteration: u32 = 0;
        let outcome = self
            .iterate(
                &request,
                account_id,
                &catalog,
                &system_prompt,
                &mut registration,
                &sink,
                &mut iteration,
            )
            .await;

        self.finish(run_id, account_id, registration, &sink, iteration, outcome)
            .await
    }

    async fn setup(
        &self,
        request: &RunRequest,
        chunk_tx: mpsc::UnboundedSender<Chunk>,
    ) -> Result<SetupState> {
        let run_id = request.run_id;

        let account_id = self
            .store
            .account_for_thread(request.thread_id)
            .await
            .map_err(|err| AgentRunError::setup(format!("account lookup failed: {err}")))?
            .ok_or_else(|| {
                AgentRunError::setup(format!("no account for thread {}", request.thread_id))
            })?;

        self.store
            .insert_run(RunRecord::new(run_id, request.thread_id, account_id))
            .await
            .map_err(|err| AgentRunError::setup(format!("run record insert failed: {err}")))?;

        // The catalog and prompt are immutable for the whole run.
        let catalog = CatalogBuilder::new(&request.profile)
            .with_data_providers(self.data_providers_available)
            .build(self.external_tools.as_deref())
            .await?;
        debug!(%run_id, tools = catalog.len(), "tool catalog built");

        let system_prompt = self.prompts.build(&request.profile, &catalog).await?;

        let registration = RunRegistration::register(
            self.bus.as_ref(),
            self.kv.clone(),
            run_id,
            &self.config.instance_id,
            self.config.liveness_key_ttl,
        )
        .await?;

        let sink = OutputChannel {
            buffer_key: response_buffer_key(run_id),
            kv: self.kv.clone(),
            tx: chunk_tx,
        };

        Ok(SetupState {
            account_id,
            catalog,
            system_prompt,
            registration,
            sink,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn iterate(
        &self,
        request: &RunRequest,
        account_id: crate::types::AccountId,
        catalog: &ToolCatalog,
        system_prompt: &str,
        registration: &mut RunRegistration,
        sink: &OutputChannel,
        iteration: &mut u32,
    ) -> LoopOutcome {
        let run_id = request.run_id;

        while *iteration < self.config.max_iterations {
            *iteration += 1;
            debug!(%run_id, iteration = *iteration, "starting iteration");
            if let Err(err) = self.store.record_iteration(run_id, *iteration).await {
                warn!(%run_id, error = %err, "failed to record iteration count");
            }

            if registration.stop_requested() {
                return LoopOutcome::Stopped {
                    message: "Agent run stopped by request".to_string(),
                };
            }

            let billing = self.admission.check_billing(account_id).await;
            if !billing.allowed {
                let message = match billing.message {
                    Some(message) => format!("Billing limit reached: {message}"),
                    None => "Billing limit reached".to_string(),
                };
                return LoopOutcome::Stopped { message };
            }
            let concurrency = self.admission.check_concurrency(account_id, run_id).await;
            if !concurrency.allowed {
                return LoopOutcome::Stopped {
                    message: format!(
                        "Too many agent runs in parallel ({} already running)",
                        concurrency.running_count
                    ),
                };
            }

            // Resume safety: if the thread already ends on an
            // assistant message there is nothing to respond to.
            match self.store.latest_message(request.thread_id).await {
                Ok(Some(message)) if message.is_assistant() => {
                    debug!(%run_id, "latest thread message is from the assistant; nothing to do");
                    return LoopOutcome::Completed { last_tool: None };
                }
                Ok(_) => {}
                Err(err) => {
                    return LoopOutcome::Failed {
                        error: format!("failed to read latest thread message: {err}"),
                    };
                }
            }

            let options = TurnOptions::for_model(&request.model)
                .with_addendum(turn_addendum(&request.profile));

            let output = match self
                .engine
                .run_turn(request.thread_id, system_prompt, catalog, options)
                .await
            {
                Ok(output) => output,
                Err(err) => {
                    let message = err.to_string();
                    if let Err(emit_err) = sink.emit(Chunk::error_status(message.clone())).await {
                        warn!(%run_id, error = %emit_err, "failed to report engine error to consumer");
                    }
                    return LoopOutcome::Failed { error: message };
                }
            };

            let verdict = match classify_turn(output, sink).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    return LoopOutcome::Failed {
                        error: format!("failed to forward turn output: {err}"),
                    };
                }
            };

            if verdict.error_detected {
                return LoopOutcome::Failed {
                    error: verdict
                        .error_message
                        .unwrap_or_else(|| "completion engine reported an error".to_string()),
                };
            }
            if verdict.termination_detected {
                debug!(%run_id, last_tool = ?verdict.last_tool, "termination signal received");
                return LoopOutcome::Completed {
                    last_tool: verdict.last_tool,
                };
            }

            // A STOP delivered while the turn streamed takes effect
            // before the next engine call.
            if registration.stop_requested() {
                return LoopOutcome::Stopped {
                    message: "Agent run stopped by request".to_string(),
                };
            }
        }

        debug!(%run_id, cap = self.config.max_iterations, "iteration cap reached");
        LoopOutcome::Completed { last_tool: None }
    }

    /// Terminal state: one final status chunk, idempotent record
    /// write, substrate cleanup. Everything here is best-effort.
    async fn finish(
        &self,
        run_id: RunId,
        account_id: crate::types::AccountId,
        registration: RunRegistration,
        sink: &OutputChannel,
        iterations: u32,
        outcome: LoopOutcome,
    ) -> RunResult {
        let (final_chunk, result) = match outcome {
            LoopOutcome::Completed { last_tool } => (
                Chunk::status(StatusKind::Completed, "Agent run completed successfully"),
                RunResult::completed(iterations, last_tool),
            ),
            LoopOutcome::Stopped { message } => (
                Chunk::status(StatusKind::Stopped, message),
                RunResult::stopped(iterations),
            ),
            LoopOutcome::Failed { error } => (
                Chunk::status(StatusKind::Failed, error.clone()),
                RunResult::failed(iterations, error),
            ),
        };

        if let Err(err) = sink.emit(final_chunk).await {
            warn!(%run_id, error = %err, "failed to emit final status chunk");
        }

        let responses = match self.kv.list_all(&sink.buffer_key).await {
            Ok(raw) => raw
                .iter()
                .filter_map(|item| serde_json::from_str::<Chunk>(item).ok())
                .collect(),
            Err(err) => {
                warn!(%run_id, error = %err, "failed to read response buffer at terminal");
                Vec::new()
            }
        };

        match self
            .store
            .finish_run(run_id, result.status, result.error.clone(), responses)
            .await
        {
            Ok(true) => debug!(%run_id, status = %result.status, "terminal record persisted"),
            Ok(false) => debug!(%run_id, "run already terminal; a stop request won the race"),
            Err(err) => error!(%run_id, error = %err, "failed to persist terminal record"),
        }

        if let Err(err) = self.kv.delete(&sink.buffer_key).await {
            warn!(%run_id, error = %err, "failed to delete response buffer");
        }
        registration.deregister().await;
        self.admission.invalidate(account_id).await;

        result
    }
}

struct SetupState {
    account_id: crate::types::AccountId,
    catalog: ToolCatalog,
    system_prompt: String,
    registration: RunRegistration,
    sink: OutputChannel,
}

/// Ephemeral per-turn addendum. Builder-mode instructions win over
/// the profile's own prompt; neither is persisted to the thread.
fn turn_addendum(profile: &AgentProfile) -> Option<EphemeralAddendum> {
    if profile.builder_mode {
        return Some(EphemeralAddendum {
            content: BUILDER_MODE_INSTRUCTIONS.to_string(),
        });
    }
    profile.system_prompt.as_ref().map(|prompt| EphemeralAddendum {
        content: prompt.clone(),
    })
}
