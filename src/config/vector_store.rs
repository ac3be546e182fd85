use super::{env_string, env_u64};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub url: String,
    pub collection_name: String,
    pub vector_size: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            collection_name: "memory_units_v1".to_string(),
            vector_size: 4096,
        }
    }
}

impl VectorStoreConfig {
    pub fn apply_env(&mut self) {
        self.url = env_string("VECTOR_STORE_URL", &self.url);
        self.collection_name = env_string("VECTOR_STORE_COLLECTION_NAME", &self.collection_name);
        self.vector_size = env_u64("VECTOR_STORE_VECTOR_SIZE", self.vector_size);
    }
}
