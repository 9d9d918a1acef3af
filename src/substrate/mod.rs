//! Coordination substrate: pub/sub control channels, keyed storage,
//! and the durable record store.
//!
//! Worker processes share no in-process state. Everything a run needs
//! to coordinate with the rest of the fleet goes through these traits:
//!
//! - [`ControlBus`]: broadcast channels for stop signals. Delivery is
//!   at-most-once per currently subscribed listener and not durable.
//! - [`KeyValueStore`]: ephemeral keys (liveness registrations) and
//!   ordered lists (per-run response buffers).
//! - [`RunStore`]: durable run records and the thread message log.
//! - [`BillingGate`]: the billing collaborator's decision surface.
//!
//! [`InMemorySubstrate`] implements the first two and
//! [`InMemoryRunStore`] the third, for tests and single-process
//! deployments. Production deployments back these with a shared
//! pub/sub + key-value service and a database.

pub mod memory;
pub mod records;

pub use memory::InMemorySubstrate;
pub use records::{
    BillingDecision, BillingGate, InMemoryRunStore, RunStore, StaticBillingGate,
};

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// A live subscription to one control channel.
///
/// Messages published while no subscription exists are lost; that is
/// the contract, not a defect.
#[derive(Debug)]
pub struct ControlSubscription {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl ControlSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message on this channel.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Non-blocking poll, used at cooperative checkpoints.
    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

/// Broadcast primitive for control signals.
#[async_trait]
pub trait ControlBus: Send + Sync {
    /// Deliver `payload` to every current subscriber of `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a channel. The subscription ends when the returned
    /// handle is dropped.
    async fn subscribe(&self, channel: &str) -> Result<ControlSubscription>;
}

/// Keyed storage: ephemeral keys with optional expiry, plus ordered
/// string lists.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Enumerate keys matching a glob pattern (`*` matches any run of
    /// characters).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Append to the ordered list at `key`.
    async fn list_push(&self, key: &str, value: String) -> Result<()>;

    /// Read the full ordered list at `key`.
    async fn list_all(&self, key: &str) -> Result<Vec<String>>;
}

/// Minimal glob matcher for key enumeration: `*` matches any
/// (possibly empty) run of characters, everything else is literal.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    fn inner(pattern: &[u8], key: &[u8]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((b'*', rest)) => {
                (0..=key.len()).any(|skip| inner(rest, &key[skip..]))
            }
            Some((ch, rest)) => key.split_first().is_some_and(|(k, key_rest)| {
                k == ch && inner(rest, key_rest)
            }),
        }
    }
    inner(pattern.as_bytes(), key.as_bytes())
}
