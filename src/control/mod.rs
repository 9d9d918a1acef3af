//! Distributed cancellation: liveness registration, control
//! channels, and the stop fan-out protocol.
//!
//! Any process that knows a run id can stop it. The requester never
//! addresses worker processes directly: it publishes on the run's
//! global channel, then enumerates liveness keys and publishes on
//! each instance-scoped channel as a second delivery path. Workers
//! observe the signal cooperatively at loop checkpoints.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::Result;
use crate::substrate::{ControlBus, ControlSubscription, KeyValueStore, RunStore};
use crate::types::{Chunk, RunId, RunStatus};

/// The only payload control channels carry.
pub const STOP_SIGNAL: &str = "STOP";

/// Channel any requester can reach with just the run id.
pub fn global_control_channel(run_id: RunId) -> String {
    format!("run:{run_id}:control")
}

/// Channel scoped to one instance executing the run.
pub fn instance_control_channel(run_id: RunId, instance_id: &str) -> String {
    format!("run:{run_id}:control:{instance_id}")
}

/// Ephemeral key asserting "instance is currently executing run".
pub fn liveness_key(instance_id: &str, run_id: RunId) -> String {
    format!("active_run:{instance_id}:{run_id}")
}

/// Pattern matching every instance's liveness key for a run.
pub fn liveness_pattern(run_id: RunId) -> String {
    format!("active_run:*:{run_id}")
}

/// Key of the run's ordered output buffer.
pub fn response_buffer_key(run_id: RunId) -> String {
    format!("run:{run_id}:responses")
}

/// Extract the instance id from a liveness key.
fn instance_from_liveness_key(key: &str) -> Option<&str> {
    let parts: Vec<&str> = key.split(':').collect();
    match parts.as_slice() {
        ["active_run", instance_id, _run_id] => Some(instance_id),
        _ => None,
    }
}

/// A run's registration with the cancellation subsystem: the liveness
/// key plus subscriptions to both control channels.
///
/// Both subscriptions are taken before the liveness key is written,
/// so a requester that sees the key always has a reachable listener.
pub struct RunRegistration {
    run_id: RunId,
    instance_id: String,
    kv: Arc<dyn KeyValueStore>,
    global: ControlSubscription,
    scoped: ControlSubscription,
}

impl RunRegistration {
    pub async fn register(
        bus: &dyn ControlBus,
        kv: Arc<dyn KeyValueStore>,
        run_id: RunId,
        instance_id: &str,
        liveness_ttl: Duration,
    ) -> Result<Self> {
        let global = bus.subscribe(&global_control_channel(run_id)).await?;
        let scoped = bus
            .subscribe(&instance_control_channel(run_id, instance_id))
            .await?;

        // Liveness is advisory; a failed write only degrades the
        // instance-scoped delivery path, the global channel still
        // reaches us.
        if let Err(err) = kv
            .set(
                &liveness_key(instance_id, run_id),
                "running",
                Some(liveness_ttl),
            )
            .await
        {
            warn!(%run_id, instance_id, error = %err, "failed to write liveness key");
        }

        debug!(%run_id, instance_id, "run registered for cancellation");
        Ok(Self {
            run_id,
            instance_id: instance_id.to_string(),
            kv,
            global,
            scoped,
        })
    }

    /// Whether a STOP has been delivered on either channel. Drains
    /// pending messages; used at cooperative checkpoints.
    pub fn stop_requested(&mut self) -> bool {
        let mut stopped = false;
        while let Some(payload) = self.global.try_recv() {
            stopped |= payload == STOP_SIGNAL;
        }
        while let Some(payload) = self.scoped.try_recv() {
            stopped |= payload == STOP_SIGNAL;
        }
        stopped
    }

    /// Remove the liveness key. Subscriptions end when `self` drops.
    pub async fn deregister(self) {
        let key = liveness_key(&self.instance_id, self.run_id);
        if let Err(err) = self.kv.delete(&key).await {
            warn!(run_id = %self.run_id, error = %err, "failed to remove liveness key");
        }
    }
}

/// Stop a run from anywhere in the fleet.
///
/// Persists the final record, fans the STOP signal out to every
/// instance currently executing the run, and clears the response
/// buffer. Every step past status computation is best-effort: a
/// failed persistence write is logged and the fan-out still proceeds,
/// because workers left running uncontrolled are worse than a missed
/// status write. Safe to invoke repeatedly for the same run, and for
/// a run no instance is executing (the fan-out is a no-op).
///
/// Returns the final status it persisted (or attempted to).
pub async fn stop_run(
    store: &dyn RunStore,
    bus: &dyn ControlBus,
    kv: &dyn KeyValueStore,
    run_id: RunId,
    error_message: Option<String>,
) -> RunStatus {
    let final_status = if error_message.is_some() {
        RunStatus::Failed
    } else {
        RunStatus::Stopped
    };
    debug!(%run_id, status = %final_status, "stopping run");

    let buffer_key = response_buffer_key(run_id);
    let responses = match kv.list_all(&buffer_key).await {
        Ok(raw) => raw
            .iter()
            .filter_map(|item| match serde_json::from_str::<Chunk>(item) {
                Ok(chunk) => Some(chunk),
                Err(err) => {
                    warn!(%run_id, error = %err, "skipping undecodable buffered chunk");
                    None
                }
            })
            .collect(),
        Err(err) => {
            error!(%run_id, error = %err, "failed to read response buffer during stop");
            Vec::new()
        }
    };

    match store
        .finish_run(run_id, final_status, error_message, responses)
        .await
    {
        Ok(true) => debug!(%run_id, status = %final_status, "final status persisted"),
        Ok(false) => debug!(%run_id, "run already terminal; status write skipped"),
        // Not retried: cancellation must still propagate.
        Err(err) => error!(%run_id, error = %err, "failed to persist final run status"),
    }

    let global = global_control_channel(run_id);
    if let Err(err) = bus.publish(&global, STOP_SIGNAL).await {
        error!(%run_id, channel = %global, error = %err, "failed to publish STOP on global channel");
    }

    match kv.keys(&liveness_pattern(run_id)).await {
        Ok(keys) => {
            debug!(%run_id, instances = keys.len(), "fanning STOP out to active instances");
            for key in keys {
                let Some(instance_id) = instance_from_liveness_key(&key) else {
                    warn!(%run_id, key, "unexpected liveness key format");
                    continue;
                };
                let channel = instance_control_channel(run_id, instance_id);
                if let Err(err) = bus.publish(&channel, STOP_SIGNAL).await {
                    warn!(%run_id, channel = %channel, error = %err, "failed to publish STOP on instance channel");
                }
            }
        }
        Err(err) => {
            error!(%run_id, error = %err, "failed to enumerate active instances");
        }
    }

    if let Err(err) = kv.delete(&buffer_key).await {
        warn!(%run_id, error = %err, "failed to delete response buffer");
    }

    final_status
}
