//! Runtime configuration for the aggregation server.
//!
//! All values have sensible defaults. Override via environment variables
//! or by constructing a custom `GradexConfig`.

use crate::types::Key;

/// Tuning and mode switches for the server core.
#[derive(Debug, Clone)]
pub struct GradexConfig {
    /// Log every push/pull request per key.
    pub key_log: bool,

    /// Run reducer operations inline from the handler instead of
    /// enqueueing to the engine.
    pub engine_blocking: bool,

    /// Synchronous training: merges are sealed by an N-push barrier.
    /// When false (async), pushes accumulate directly into the store.
    pub sync_mode: bool,

    /// Trace one key's buffer values through the engine stages.
    pub debug: bool,

    /// The key traced when `debug` is set.
    pub debug_key: Key,

    /// Number of engine shards, each with a dedicated worker strand.
    pub engine_threads: usize,

    /// Order shard queues by accumulated per-key workload instead of FIFO.
    pub enable_schedule: bool,

    /// Multiplier on the shard-assignment cost of keys with a registered
    /// compressor (compressed keys are more expensive per byte).
    pub lb_factor: f32,
}

impl Default for GradexConfig {
    fn default() -> Self {
        Self {
            key_log: false,
            engine_blocking: false,
            sync_mode: true,
            debug: false,
            debug_key: 0,
            engine_threads: 4,
            enable_schedule: false,
            lb_factor: 1.0,
        }
    }
}

impl GradexConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `PS_KEY_LOG`
    /// - `BYTEPS_SERVER_ENGINE_BLOCKING`
    /// - `BYTEPS_ENABLE_ASYNC`
    /// - `BYTEPS_SERVER_DEBUG` / `BYTEPS_SERVER_DEBUG_KEY`
    /// - `BYTEPS_SERVER_ENGINE_THREAD`
    /// - `BYTEPS_SERVER_ENABLE_SCHEDULE`
    /// - `BYTEPS_SERVER_LOAD_BALANCE_FACTOR`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(b) = env_bool("PS_KEY_LOG") {
            cfg.key_log = b;
        }
        if let Some(b) = env_bool("BYTEPS_SERVER_ENGINE_BLOCKING") {
            cfg.engine_blocking = b;
            if cfg.engine_blocking {
                tracing::info!("blocking mode of the server engine enabled");
            }
        }
        if let Some(b) = env_bool("BYTEPS_ENABLE_ASYNC") {
            cfg.sync_mode = !b;
            if !cfg.sync_mode {
                tracing::info!("asynchronous training enabled");
            }
        }
        if let Some(b) = env_bool("BYTEPS_SERVER_DEBUG") {
            cfg.debug = b;
        }
        if let Ok(v) = std::env::var("BYTEPS_SERVER_DEBUG_KEY") {
            if let Ok(k) = v.parse::<Key>() {
                cfg.debug_key = k;
            }
        }
        if cfg.debug {
            tracing::info!(key = cfg.debug_key, "debug mode enabled, tracing key");
        }
        if let Ok(v) = std::env::var("BYTEPS_SERVER_ENGINE_THREAD") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.engine_threads = n.max(1);
            }
        }
        tracing::info!(
            threads = cfg.engine_threads,
            "server engine thread count (raise BYTEPS_SERVER_ENGINE_THREAD for higher throughput)"
        );
        if let Some(b) = env_bool("BYTEPS_SERVER_ENABLE_SCHEDULE") {
            cfg.enable_schedule = b;
            if cfg.enable_schedule {
                tracing::info!("engine scheduling enabled");
            }
        }
        if let Ok(v) = std::env::var("BYTEPS_SERVER_LOAD_BALANCE_FACTOR") {
            if let Ok(f) = v.parse::<f32>() {
                cfg.lb_factor = f;
                tracing::info!(factor = f, "load balance factor");
            }
        }

        cfg
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let v = std::env::var(name).ok()?;
    match v.trim() {
        "1" | "true" | "TRUE" | "True" | "on" => Some(true),
        "0" | "false" | "FALSE" | "False" | "off" | "" => Some(false),
        other => other.parse::<i64>().ok().map(|n| n != 0),
    }
}
