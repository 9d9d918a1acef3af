//! Core data types: runs, chunks, thread messages, agent profiles.

pub mod chunk;
pub mod message;
pub mod profile;
pub mod run;

pub use chunk::{AssistantChunk, Chunk, ChunkMetadata, StatusChunk, StatusKind, ToolChunk};
pub use message::{MessageType, ThreadMessage};
pub use profile::{AgentProfile, ExternalToolConfig, ToolEnablement};
pub use run::{RunRecord, RunStatus};

use uuid::Uuid;

/// Unique run identifier.
pub type RunId = Uuid;

/// Identifier of the message log a run operates over.
pub type ThreadId = Uuid;

/// Owning account identifier.
pub type AccountId = Uuid;
