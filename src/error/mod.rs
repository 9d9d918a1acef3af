//! Error types for agentrun.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentRunError>;

/// Primary error type for all agentrun operations.
#[derive(Error, Debug)]
pub enum AgentRunError {
    /// Run setup could not complete (unresolvable account, missing
    /// profile data). Raised before the iteration loop starts.
    #[error("Setup error: {0}")]
    Setup(String),

    /// The completion engine signalled an error inside its output,
    /// either as a non-stream error object or an error status chunk.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Failure while consuming the completion engine's stream
    /// (connection drop, decode failure mid-stream).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Durable record store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Pub/sub or key-value substrate failure.
    #[error("Substrate error: {0}")]
    Substrate(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl AgentRunError {
    /// Create a setup error.
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup(message.into())
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a substrate error.
    pub fn substrate(message: impl Into<String>) -> Self {
        Self::Substrate(message.into())
    }

    /// Whether this error is fatal before the loop ever starts.
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_))
    }

    /// Whether this error terminates the current run as failed.
    ///
    /// Setup errors never reach the iterating state, so they surface
    /// to the caller rather than as a run outcome.
    pub fn fails_run(&self) -> bool {
        !self.is_setup()
    }
}
