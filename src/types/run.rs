//! Run records and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chunk::Chunk;
use super::{AccountId, RunId, ThreadId};

/// Run lifecycle status.
///
/// Persisted externally as `running | completed | stopped | failed`.
/// Transitions are monotonic: `Running` may move to any terminal
/// state; terminal states accept no further writes.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

impl RunStatus {
    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Durable record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub thread_id: ThreadId,
    pub account_id: AccountId,
    pub status: RunStatus,
    #[serde(default)]
    pub iteration_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Accumulated output, appended in arrival order. This is the
    /// durable record of what the run produced.
    #[serde(default)]
    pub responses: Vec<Chunk>,
}

impl RunRecord {
    /// Create a fresh record in the `Running` state.
    pub fn new(id: RunId, thread_id: ThreadId, account_id: AccountId) -> Self {
        Self {
            id,
            thread_id,
            account_id,
            status: RunStatus::Running,
            iteration_count: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            responses: Vec::new(),
        }
    }
}
