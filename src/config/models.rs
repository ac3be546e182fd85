use super::env_string;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub default_embedding_model: String,
    pub default_rerank_model: String,
    pub default_light_model: String,
    pub default_heavy_model: String,
    /// Ordered list used by C1's task router; first available provider wins.
    pub provider_priority: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_embedding_model: "embed-primary".to_string(),
            default_rerank_model: "rerank-primary".to_string(),
            default_light_model: "chat-light".to_string(),
            default_heavy_model: "chat-heavy".to_string(),
            provider_priority: vec!["primary".to_string(), "secondary".to_string()],
        }
    }
}

impl ModelsConfig {
    pub fn apply_env(&mut self) {
        self.default_embedding_model =
            env_string("MODELS_DEFAULT_EMBEDDING_MODEL", &self.default_embedding_model);
        self.default_rerank_model =
            env_string("MODELS_DEFAULT_RERANK_MODEL", &self.default_rerank_model);
        self.default_light_model = env_string("MODELS_DEFAULT_LIGHT_MODEL", &self.default_light_model);
        self.default_heavy_model = env_string("MODELS_DEFAULT_HEAVY_MODEL", &self.default_heavy_model);
        if let Ok(raw) = std::env::var("MODELS_PROVIDER_PRIORITY") {
            self.provider_priority = raw.split(',').map(|s| s.trim().to_string()).collect();
        }
    }
}
