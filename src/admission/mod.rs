//! Admission control: billing and per-account concurrency gates.
//!
//! Both checks run at run start and again before every iteration;
//! billing state can change under a long-running task. The running-id
//! list is cached per account with a short TTL to bound load on the
//! backing store. Any read failure fails open: enforcement here is a
//! soft limit, and availability of in-flight user work wins over
//! strict accounting. That is deliberate policy, not an oversight.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::RunnerConfig;
use crate::substrate::{BillingDecision, BillingGate, RunStore};
use crate::types::{AccountId, RunId};
use tracing::{debug, error};

/// Outcome of the concurrency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyDecision {
    pub allowed: bool,
    pub running_count: usize,
    pub running_ids: Vec<RunId>,
}

impl ConcurrencyDecision {
    fn open() -> Self {
        Self {
            allowed: true,
            running_count: 0,
            running_ids: Vec::new(),
        }
    }
}

struct CacheEntry {
    running_ids: Vec<RunId>,
    expires_at: Instant,
}

/// Billing + concurrency gate for run admission.
pub struct AdmissionController {
    store: Arc<dyn RunStore>,
    billing: Arc<dyn BillingGate>,
    max_parallel_runs: usize,
    window: chrono::Duration,
    cache_ttl: std::time::Duration,
    // Entry presence is the hit signal, so an empty running-id list
    // caches the same as any other.
    cache: RwLock<HashMap<AccountId, CacheEntry>>,
}

impl AdmissionController {
    pub fn new(
        config: &RunnerConfig,
        store: Arc<dyn RunStore>,
        billing: Arc<dyn BillingGate>,
    ) -> Self {
        Self {
            store,
            billing,
            max_parallel_runs: config.max_parallel_runs,
            window: config.concurrency_window,
            cache_ttl: config.admission_cache_ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Billing gate. Fails open on collaborator errors.
    pub async fn check_billing(&self, account_id: AccountId) -> BillingDecision {
        match self.billing.check(account_id).await {
            Ok(decision) => decision,
            Err(err) => {
                error!(%account_id, error = %err, "billing check failed; allowing run");
                BillingDecision::allowed()
            }
        }
    }

    /// Concurrency gate: count of running runs started within the
    /// trailing window versus the configured cap. The run being
    /// admitted already has its own `Running` record, so `current_run`
    /// is excluded from the count; a cap of N admits exactly N
    /// concurrent runs. Fails open on store errors.
    pub async fn check_concurrency(
        &self,
        account_id: AccountId,
        current_run: RunId,
    ) -> ConcurrencyDecision {
        let ids = if let Some(cached) = self.cached(account_id).await {
            debug!(%account_id, "admission cache hit");
            cached
        } else {
            let since = Utc::now() - self.window;
            match self.store.running_runs_since(account_id, since).await {
                Ok(ids) => {
                    self.cache.write().await.insert(
                        account_id,
                        CacheEntry {
                            running_ids: ids.clone(),
                            expires_at: Instant::now() + self.cache_ttl,
                        },
                    );
                    ids
                }
                Err(err) => {
                    error!(%account_id, error = %err, "concurrency check failed; allowing run");
                    return ConcurrencyDecision::open();
                }
            }
        };

        let running_ids: Vec<RunId> = ids.into_iter().filter(|id| *id != current_run).collect();
        ConcurrencyDecision {
            allowed: running_ids.len() < self.max_parallel_runs,
            running_count: running_ids.len(),
            running_ids,
        }
    }

    /// Drop the cached running-id list for an account (a run just
    /// reached a terminal state, the next check should see fresh
    /// counts).
    pub async fn invalidate(&self, account_id: AccountId) {
        self.cache.write().await.remove(&account_id);
    }

    async fn cached(&self, account_id: AccountId) -> Option<Vec<RunId>> {
        let cache = self.cache.read().await;
        let entry = cache.get(&account_id)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.running_ids.clone())
    }
}
