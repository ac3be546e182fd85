// src/gateway/router.rs
//! Provider registry + task router (§4.1, §9). The registry maps each
//! model name to exactly one provider; the router picks a provider per
//! task using an ordered priority list, skipping unavailable providers,
//! and tracks the `ok -> degraded -> skipped_by_router` state machine
//! (§4.13) per provider.

use super::provider::{ModelProvider, ProviderHealth};
use crate::error::GatewayError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Consecutive-failure threshold before a provider is marked `degraded`.
const DEGRADE_THRESHOLD: u32 = 3;

struct TrackedProvider {
    provider: Arc<dyn ModelProvider>,
    consecutive_failures: AtomicU32,
}

pub struct ProviderRegistry {
    providers: HashMap<String, TrackedProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        let name = provider.name().to_string();
        self.providers.insert(
            name,
            TrackedProvider {
                provider,
                consecutive_failures: AtomicU32::new(0),
            },
        );
    }

    fn record_success(&self, name: &str) {
        if let Some(tracked) = self.providers.get(name) {
            let previous = tracked.consecutive_failures.swap(0, Ordering::SeqCst);
            if previous >= DEGRADE_THRESHOLD {
                info!(provider = name, "provider recovered: degraded -> ok");
            }
        }
    }

    fn record_failure(&self, name: &str) {
        if let Some(tracked) = self.providers.get(name) {
            let failures = tracked.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures == DEGRADE_THRESHOLD {
                warn!(provider = name, "provider marked degraded after {} consecutive failures", failures);
            }
        }
    }

    pub fn health_of(&self, name: &str) -> ProviderHealth {
        match self.providers.get(name) {
            None => ProviderHealth::SkippedByRouter,
            Some(tracked) => {
                if tracked.consecutive_failures.load(Ordering::SeqCst) >= DEGRADE_THRESHOLD {
                    ProviderHealth::Degraded
                } else {
                    ProviderHealth::Ok
                }
            }
        }
    }

    pub fn health_snapshot(&self) -> HashMap<String, ProviderHealth> {
        self.providers
            .keys()
            .map(|name| (name.clone(), self.health_of(name)))
            .collect()
    }

    fn is_degraded(&self, name: &str) -> bool {
        self.health_of(name) == ProviderHealth::Degraded
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn ModelProvider>> {
        self.providers.get(name).map(|t| &t.provider)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks a provider per task using config's ordered priority list, skipping
/// providers that are currently `degraded` or report themselves unavailable.
pub struct TaskRouter {
    priority: Vec<String>,
}

impl TaskRouter {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }

    pub async fn pick<'a>(
        &self,
        registry: &'a ProviderRegistry,
        task: &'static str,
    ) -> Result<&'a Arc<dyn ModelProvider>, GatewayError> {
        for name in &self.priority {
            if registry.is_degraded(name) {
                continue;
            }
            if let Some(provider) = registry.get(name) {
                if provider.is_available().await {
                    return Ok(provider);
                }
            }
        }
        // Fall back to a degraded provider rather than fail outright if
        // nothing healthy remains — a timed probe may bring it back.
        for name in &self.priority {
            if let Some(provider) = registry.get(name) {
                if provider.is_available().await {
                    return Ok(provider);
                }
            }
        }
        Err(GatewayError::AllProvidersUnavailable { task })
    }

    pub fn note_outcome(&self, registry: &ProviderRegistry, name: &str, success: bool) {
        if success {
            registry.record_success(name);
        } else {
            registry.record_failure(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::provider::{ChatMessage, CompletionParams, ProviderOutcome};
    use async_trait::async_trait;
    use std::time::Duration;

    struct AlwaysFails;
    struct AlwaysOk;

    #[async_trait]
    impl ModelProvider for AlwaysFails {
        fn name(&self) -> &str {
            "primary"
        }
        async fn embed(&self, _text: &str) -> Result<ProviderOutcome<Vec<f32>>, GatewayError> {
            Err(GatewayError::Transient {
                provider: "primary".into(),
                message: "down".into(),
            })
        }
        async fn rerank(
            &self,
            _query: &str,
            _docs: &[String],
            _top_k: usize,
        ) -> Result<ProviderOutcome<Vec<f32>>, GatewayError> {
            unimplemented!()
        }
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _params: &CompletionParams,
        ) -> Result<ProviderOutcome<String>, GatewayError> {
            unimplemented!()
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl ModelProvider for AlwaysOk {
        fn name(&self) -> &str {
            "secondary"
        }
        async fn embed(&self, _text: &str) -> Result<ProviderOutcome<Vec<f32>>, GatewayError> {
            Ok(ProviderOutcome {
                value: vec![0.0; 4],
                latency: Duration::from_millis(1),
                estimated_cost_usd: 0.0,
            })
        }
        async fn rerank(
            &self,
            _query: &str,
            _docs: &[String],
            _top_k: usize,
        ) -> Result<ProviderOutcome<Vec<f32>>, GatewayError> {
            unimplemented!()
        }
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _params: &CompletionParams,
        ) -> Result<ProviderOutcome<String>, GatewayError> {
            unimplemented!()
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn failover_after_degrade_threshold() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(AlwaysFails));
        registry.register(Arc::new(AlwaysOk));
        let router = TaskRouter::new(vec!["primary".to_string(), "secondary".to_string()]);

        for _ in 0..DEGRADE_THRESHOLD {
            let provider = router.pick(&registry, "embed").await.unwrap();
            assert_eq!(provider.name(), "primary");
            router.note_outcome(&registry, "primary", false);
        }

        assert_eq!(registry.health_of("primary"), ProviderHealth::Degraded);
        let provider = router.pick(&registry, "embed").await.unwrap();
        assert_eq!(provider.name(), "secondary");
    }
}
