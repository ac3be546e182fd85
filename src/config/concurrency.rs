use super::env_usize;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// C3 pool cap. Original-source `AutoScaler` default max (see
    /// SPEC_FULL.md §11).
    pub max_connections: usize,
    /// C3 pool floor the autoscaler will not shrink below.
    pub min_connections: usize,
    pub cache_size: usize,
    pub cache_ttl_seconds: u64,
    pub max_workers: usize,
    /// Bound on C5's batch queue (backpressure, §5).
    pub batch_queue_capacity: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_connections: 50,
            min_connections: 5,
            cache_size: 1000,
            cache_ttl_seconds: 300,
            max_workers: 8,
            batch_queue_capacity: 256,
            batch_size: 32,
            batch_timeout_ms: 500,
        }
    }
}

impl ConcurrencyConfig {
    pub fn apply_env(&mut self) {
        self.max_connections = env_usize("CONCURRENCY_MAX_CONNECTIONS", self.max_connections);
        self.min_connections = env_usize("CONCURRENCY_MIN_CONNECTIONS", self.min_connections);
        self.cache_size = env_usize("CONCURRENCY_CACHE_SIZE", self.cache_size);
        self.cache_ttl_seconds =
            env_usize("CONCURRENCY_CACHE_TTL", self.cache_ttl_seconds as usize) as u64;
        self.max_workers = env_usize("CONCURRENCY_MAX_WORKERS", self.max_workers);
        self.batch_queue_capacity =
            env_usize("CONCURRENCY_BATCH_QUEUE_CAPACITY", self.batch_queue_capacity);
        self.batch_size = env_usize("CONCURRENCY_BATCH_SIZE", self.batch_size);
        self.batch_timeout_ms =
            env_usize("CONCURRENCY_BATCH_TIMEOUT_MS", self.batch_timeout_ms as usize) as u64;
    }
}
