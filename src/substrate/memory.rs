//! In-memory substrate for tests and single-process deployments.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{glob_match, ControlBus, ControlSubscription, KeyValueStore};
use crate::error::Result;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory pub/sub + key-value store.
///
/// Publish fans out to the subscribers registered at that moment;
/// dropped subscriptions are pruned on the next publish. Key expiry
/// is evaluated lazily on read.
#[derive(Debug, Default)]
pub struct InMemorySubstrate {
    channels: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
    keys: Mutex<HashMap<String, Entry>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on a channel (test observability).
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .await
            .get(channel)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }
}

#[async_trait]
impl ControlBus for InMemorySubstrate {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut channels = self.channels.lock().await;
        if let Some(subs) = channels.get_mut(channel) {
            subs.retain(|tx| tx.send(payload.to_string()).is_ok());
            if subs.is_empty() {
                channels.remove(channel);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<ControlSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(ControlSubscription::new(rx))
    }
}

#[async_trait]
impl KeyValueStore for InMemorySubstrate {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.keys.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut keys = self.keys.lock().await;
        match keys.get(key) {
            Some(entry) if entry.expired() => {
                keys.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.keys.lock().await.remove(key);
        self.lists.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = self.keys.lock().await;
        keys.retain(|_, entry| !entry.expired());
        Ok(keys
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn list_push(&self, key: &str, value: String) -> Result<()> {
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push(value);
        Ok(())
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .lists
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }
}
