//! Streaming response interpreter.
//!
//! A pass-through classifier over the chunk sequence of one turn.
//! Every chunk is forwarded to the sink exactly once, in arrival
//! order, with no buffering delay; the verdict accumulates on the
//! side and never gates delivery.

pub mod sentinel;

pub use sentinel::{detect_sentinel, is_sentinel_tool};

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::engine::TurnOutput;
use crate::error::Result;
use crate::types::{Chunk, StatusChunk};

/// Destination for forwarded chunks. Implementations append to the
/// run's output buffer and hand the chunk to the live consumer.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn emit(&self, chunk: Chunk) -> Result<()>;
}

/// What one turn's stream told us.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnVerdict {
    pub error_detected: bool,
    pub termination_detected: bool,
    /// Name of the terminating tool, from metadata or the sentinel
    /// scan.
    pub last_tool: Option<String>,
    /// Message accompanying a detected error, when one was carried.
    pub error_message: Option<String>,
}

impl TurnVerdict {
    fn record_error(&mut self, message: Option<String>) {
        self.error_detected = true;
        if self.error_message.is_none() {
            self.error_message = message;
        }
    }

    fn record_termination(&mut self, tool: Option<String>) {
        self.termination_detected = true;
        if let Some(tool) = tool {
            self.last_tool = Some(tool);
        }
    }
}

/// Classify one status chunk into the verdict.
fn classify_status(status: &StatusChunk, verdict: &mut TurnVerdict) {
    if status.status == crate::types::StatusKind::Error {
        verdict.record_error(status.message.clone());
        return;
    }
    if status.metadata.agent_should_terminate {
        let tool = status
            .function_name
            .clone()
            .or_else(|| status.xml_tag_name.clone());
        verdict.record_termination(tool);
    }
}

/// Drive one turn's output through the sink, classifying as it goes.
///
/// Rules, applied per chunk in arrival order:
/// - an error-status chunk sets the error flag but is still forwarded;
/// - a status chunk whose metadata carries the termination flag sets
///   the termination flag and records the terminating tool;
/// - assistant text is scanned for sentinel closing markers as a
///   redundant termination channel;
/// - a refusal (the engine returned an error object instead of a
///   stream) is forwarded and ends the turn as errored;
/// - a stream-item error is reported as an error chunk and stops
///   consumption.
pub async fn classify_turn(output: TurnOutput, sink: &dyn ChunkSink) -> Result<TurnVerdict> {
    let mut verdict = TurnVerdict::default();

    let mut stream = match output {
        TurnOutput::Refusal(chunk) => {
            warn!("completion engine returned an error object instead of a stream");
            let message = match &chunk {
                Chunk::Status(status) => status.message.clone(),
                Chunk::Error { message } => Some(message.clone()),
                _ => None,
            };
            verdict.record_error(message);
            sink.emit(chunk).await?;
            return Ok(verdict);
        }
        TurnOutput::Stream(stream) => stream,
    };

    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                // Transport failure mid-stream: report it as a chunk
                // so the consumer sees why the turn ended, then stop.
                let message = format!("Error during response streaming: {err}");
                verdict.record_error(Some(message.clone()));
                sink.emit(Chunk::error_status(message)).await?;
                break;
            }
        };

        match &chunk {
            Chunk::Status(status) => classify_status(status, &mut verdict),
            Chunk::Assistant(assistant) => {
                if let Some(tool) = detect_sentinel(&assistant.content) {
                    verdict.record_termination(Some(tool.to_string()));
                }
            }
            Chunk::Error { message } => {
                verdict.record_error(Some(message.clone()));
            }
            Chunk::Tool(_) => {}
        }

        sink.emit(chunk).await?;
    }

    debug!(
        error = verdict.error_detected,
        termination = verdict.termination_detected,
        last_tool = verdict.last_tool.as_deref().unwrap_or(""),
        "turn classified"
    );
    Ok(verdict)
}
