//! agentrun: bounded, resumable, remotely-stoppable agent runs.
//!
//! Drives an external completion engine one turn at a time inside a
//! bounded loop, streams every chunk through unchanged while
//! classifying it on the side, and lets any process in the fleet stop
//! a run over a pub/sub + key-value substrate.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use agentrun::prelude::*;
//! use agentrun::substrate::{InMemoryRunStore, InMemorySubstrate, StaticBillingGate};
//!
//! # async fn example(engine: Arc<dyn agentrun::engine::CompletionEngine>) {
//! let substrate = Arc::new(InMemorySubstrate::new());
//! let runner = Runner::new(
//!     RunnerConfig::default(),
//!     Arc::new(InMemoryRunStore::new()),
//!     Arc::new(StaticBillingGate::allowing()),
//!     engine,
//!     substrate.clone(),
//!     substrate,
//! );
//!
//! let thread_id = uuid::Uuid::new_v4();
//! let mut handle = runner.start(RunRequest::new(thread_id, AgentProfile::default()));
//! while let Some(chunk) = handle.next_chunk().await {
//!     println!("{chunk:?}");
//! }
//! # }
//! ```

pub mod admission;
pub mod catalog;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod prelude;
pub mod run;
pub mod substrate;
pub mod types;
