use super::{env_u64, env_usize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub max_retries: usize,
    pub retry_delay_base_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_base_ms: 200,
            timeout_seconds: 30,
        }
    }
}

impl ResilienceConfig {
    pub fn apply_env(&mut self) {
        self.max_retries = env_usize("RESILIENCE_MAX_RETRIES", self.max_retries);
        self.retry_delay_base_ms = env_u64("RESILIENCE_RETRY_DELAY_BASE_MS", self.retry_delay_base_ms);
        self.timeout_seconds = env_u64("RESILIENCE_TIMEOUT_SECONDS", self.timeout_seconds);
    }
}
