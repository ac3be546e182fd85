use super::env_string;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://memory.db".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn apply_env(&mut self) {
        self.url = env_string("DATABASE_URL", &self.url);
    }
}
