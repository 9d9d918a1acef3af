//! Runner configuration (code defaults, overridable from env).

use std::time::Duration;

/// Default iteration cap per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Default number of concurrently running runs allowed per account.
pub const DEFAULT_MAX_PARALLEL_RUNS: usize = 3;

/// Configuration shared by every run a worker process executes.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Identifier of this worker process instance. Scopes liveness
    /// keys and instance control channels.
    pub instance_id: String,
    /// Hard bound on completion-engine invocations per run.
    pub max_iterations: u32,
    /// Per-account cap on runs started within the trailing window.
    pub max_parallel_runs: usize,
    /// Trailing window the concurrency check counts runs in.
    pub concurrency_window: chrono::Duration,
    /// Time-to-live for cached admission decisions.
    pub admission_cache_ttl: Duration,
    /// Time-to-live for liveness keys; a crashed worker's keys
    /// expire rather than pinning the run forever.
    pub liveness_key_ttl: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_parallel_runs: DEFAULT_MAX_PARALLEL_RUNS,
            concurrency_window: chrono::Duration::hours(24),
            admission_cache_ttl: Duration::from_secs(30),
            liveness_key_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults. Reads `.env` first when present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();

        if let Ok(id) = std::env::var("AGENTRUN_INSTANCE_ID") {
            if !id.is_empty() {
                config.instance_id = id;
            }
        }
        if let Some(n) = env_parse::<u32>("AGENTRUN_MAX_ITERATIONS") {
            config.max_iterations = n;
        }
        if let Some(n) = env_parse::<usize>("AGENTRUN_MAX_PARALLEL_RUNS") {
            config.max_parallel_runs = n;
        }
        if let Some(secs) = env_parse::<u64>("AGENTRUN_ADMISSION_CACHE_TTL_SECS") {
            config.admission_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("AGENTRUN_LIVENESS_KEY_TTL_SECS") {
            config.liveness_key_ttl = Duration::from_secs(secs);
        }

        config
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_parallel_runs(mut self, cap: usize) -> Self {
        self.max_parallel_runs = cap;
        self
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}
