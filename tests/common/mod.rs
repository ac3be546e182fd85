// tests/common/mod.rs
// Shared test harness: an orchestrator wired with a MockProvider, an
// in-memory SQLite pool, and a FakeVectorStore, mirroring the in-module
// test helpers each component already uses.

use memoryd::config::{ConcurrencyConfig, ServiceConfig};
use memoryd::gateway::providers::MockProvider;
use memoryd::permission::{InMemoryPermissionGate, PermissionLevel};
use memoryd::store::vector::FakeVectorStore;
use memoryd::{OrchestratorDeps, ServiceOrchestrator};
use std::sync::Arc;

pub fn test_config(vector_size: u64) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.vector_store.vector_size = vector_size;
    config.models.provider_priority = vec!["primary".to_string()];
    config.concurrency = ConcurrencyConfig {
        max_connections: 4,
        min_connections: 1,
        cache_size: 100,
        cache_ttl_seconds: 60,
        max_workers: 2,
        batch_queue_capacity: 16,
        batch_size: 4,
        batch_timeout_ms: 50,
    };
    config.project.system_principal = "system".to_string();
    config
}

pub fn scripted_provider(dim: usize, completion_json: &str) -> Arc<MockProvider> {
    let provider = Arc::new(MockProvider::new("primary", dim));
    provider.script_completion(completion_json);
    provider
}

/// `(user, project_id, level)` grants applied before startup so each test
/// only has to describe what access its scenario needs.
pub async fn start_orchestrator(
    config: ServiceConfig,
    provider: Arc<MockProvider>,
    grants: &[(&str, &str, PermissionLevel)],
) -> ServiceOrchestrator {
    let permission_gate = Arc::new(InMemoryPermissionGate::new(&config.project));
    for (user, project_id, level) in grants {
        permission_gate.grant(user, project_id, *level).await;
    }
    let deps = OrchestratorDeps {
        config,
        providers: vec![provider],
        vector_store: Arc::new(FakeVectorStore::new()),
        permission_gate,
    };
    ServiceOrchestrator::start(deps)
        .await
        .expect("test orchestrator should start against in-memory backends")
}
