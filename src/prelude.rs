//! Convenience re-exports for common use.

pub use crate::config::RunnerConfig;
pub use crate::control::stop_run;
pub use crate::engine::{CompletionEngine, TurnOptions, TurnOutput};
pub use crate::error::{AgentRunError, Result};
pub use crate::run::{RunHandle, RunRequest, RunResult, Runner};
pub use crate::substrate::{BillingGate, ControlBus, KeyValueStore, RunStore};
pub use crate::types::{
    AgentProfile, Chunk, RunId, RunRecord, RunStatus, StatusKind, ThreadId, ThreadMessage,
};
