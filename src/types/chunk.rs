//! Output chunks: the tagged stream elements a turn produces.

use serde::{Deserialize, Serialize};

/// Optional metadata attached to any chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// Explicit termination flag: the invoked tool signalled that the
    /// run should end after this turn.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub agent_should_terminate: bool,
}

impl ChunkMetadata {
    pub fn is_empty(&self) -> bool {
        !self.agent_should_terminate
    }

    /// Metadata carrying the termination flag.
    pub fn terminating() -> Self {
        Self {
            agent_should_terminate: true,
        }
    }
}

/// Status embedded in a status chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Running,
    Completed,
    Stopped,
    Failed,
    /// The current turn hit an error; the run ends failed.
    Error,
}

/// Status-type chunk payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChunk {
    pub status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Name of the tool whose invocation produced this status, when
    /// the tool-calling path reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// XML tag name of the invoked tool, for the XML-calling path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_tag_name: Option<String>,
    #[serde(default, skip_serializing_if = "ChunkMetadata::is_empty")]
    pub metadata: ChunkMetadata,
}

/// Assistant-type chunk payload (streamed model text).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantChunk {
    pub content: String,
    #[serde(default, skip_serializing_if = "ChunkMetadata::is_empty")]
    pub metadata: ChunkMetadata,
}

/// Tool-type chunk payload (a tool execution result).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "ChunkMetadata::is_empty")]
    pub metadata: ChunkMetadata,
}

/// One element of a run's output stream.
///
/// Chunks are append-only and ordered; their accumulation is the
/// durable record of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chunk {
    Status(StatusChunk),
    Assistant(AssistantChunk),
    Tool(ToolChunk),
    Error { message: String },
}

impl Chunk {
    /// A status chunk with just a kind and message.
    pub fn status(status: StatusKind, message: impl Into<String>) -> Self {
        Self::Status(StatusChunk {
            status,
            message: Some(message.into()),
            function_name: None,
            xml_tag_name: None,
            metadata: ChunkMetadata::default(),
        })
    }

    /// An assistant text chunk.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(AssistantChunk {
            content: content.into(),
            metadata: ChunkMetadata::default(),
        })
    }

    /// An error status chunk, as the completion engine emits them.
    pub fn error_status(message: impl Into<String>) -> Self {
        Self::status(StatusKind::Error, message)
    }

    /// Whether this is a status chunk carrying error status.
    pub fn is_error_status(&self) -> bool {
        matches!(
            self,
            Chunk::Status(StatusChunk {
                status: StatusKind::Error,
                ..
            })
        )
    }
}
