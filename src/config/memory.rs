use super::{env_bool, env_f64, env_usize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Default vector top-K pre-rerank (§6.5).
    pub retrieval_top_k: usize,
    /// Default post-rerank cap (§6.5).
    pub rerank_top_k: usize,
    /// Enable/disable the injection composition stage.
    pub fuser_enabled: bool,
    /// Compression is discarded below this quality score (§4.6 step 4).
    pub quality_threshold: f32,
    /// No expiry by default; §12 open-question decision.
    pub default_ttl_seconds: Option<i64>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retrieval_top_k: 20,
            rerank_top_k: 5,
            fuser_enabled: true,
            quality_threshold: 0.5,
            default_ttl_seconds: None,
        }
    }
}

impl MemoryConfig {
    pub fn apply_env(&mut self) {
        self.retrieval_top_k = env_usize("MEMORY_RETRIEVAL_TOP_K", self.retrieval_top_k);
        self.rerank_top_k = env_usize("MEMORY_RERANK_TOP_K", self.rerank_top_k);
        self.fuser_enabled = env_bool("MEMORY_FUSER_ENABLED", self.fuser_enabled);
        self.quality_threshold = env_f64("MEMORY_QUALITY_THRESHOLD", self.quality_threshold as f64) as f32;
        if let Ok(raw) = std::env::var("MEMORY_DEFAULT_TTL_SECONDS") {
            self.default_ttl_seconds = raw.parse().ok();
        }
    }
}
