// src/config/mod.rs
//! Central configuration (§6.5). Composes one sub-config per concern, the
//! way the teacher's `config/mod.rs` composes `GeminiConfig`,
//! `MemoryConfig`, `ServerConfig`, etc. Unlike the teacher, no
//! `lazy_static!` process-wide singleton is kept here — the orchestrator
//! (C10) is the single owner of one `ServiceConfig` instance (§9).

mod concurrency;
mod database;
mod memory;
mod models;
mod project;
mod resilience;
mod vector_store;

pub use concurrency::ConcurrencyConfig;
pub use database::DatabaseConfig;
pub use memory::MemoryConfig;
pub use models::ModelsConfig;
pub use project::ProjectConfig;
pub use resilience::ResilienceConfig;
pub use vector_store::VectorStoreConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub project: ProjectConfig,
}

impl ServiceConfig {
    /// Load from an optional TOML file overlaid by environment variables;
    /// env values win (same precedence the teacher's `config/helpers.rs`
    /// documents).
    pub fn load(toml_path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut cfg = match toml_path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw).context("parsing config TOML")?
            }
            _ => Self::default(),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        self.vector_store.apply_env();
        self.database.apply_env();
        self.models.apply_env();
        self.memory.apply_env();
        self.concurrency.apply_env();
        self.resilience.apply_env();
        self.project.apply_env();
    }

    /// Fail-fast configuration checks run at orchestrator start (§4.10):
    /// a dimension mismatch here is a configuration error, not a runtime
    /// recoverable one.
    fn validate(&self) -> Result<()> {
        if self.vector_store.vector_size == 0 {
            anyhow::bail!("vector_store.vector_size must be non-zero");
        }
        if self.concurrency.max_connections == 0 {
            anyhow::bail!("concurrency.max_connections must be non-zero");
        }
        Ok(())
    }
}

pub(crate) fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
