// src/gateway/mod.rs
//! Model Gateway (C1, §4.1): a uniform request/response surface over N
//! remote providers for embedding, rerank, and chat completion.

pub mod provider;
pub mod providers;
mod retry;
mod router;

pub use provider::{ChatMessage, CompletionParams, ModelProvider, ProviderHealth, ProviderOutcome};
pub use router::{ProviderRegistry, TaskRouter};

use crate::config::{ModelsConfig, ResilienceConfig};
use crate::error::GatewayError;
use std::collections::HashMap;
use std::time::Instant;
use tracing::instrument;

pub struct ModelGateway {
    registry: ProviderRegistry,
    router: TaskRouter,
    resilience: ResilienceConfig,
    models: ModelsConfig,
    vector_size: usize,
}

/// Latency + estimated cost for a single gateway call, fed to the Request
/// Meter (C4) by the orchestrator.
pub struct GatewayCallStats {
    pub provider: String,
    pub latency_ms: u64,
    pub estimated_cost_usd: f64,
    pub success: bool,
}

impl ModelGateway {
    pub fn new(
        registry: ProviderRegistry,
        models: ModelsConfig,
        resilience: ResilienceConfig,
        vector_size: usize,
    ) -> Self {
        let router = TaskRouter::new(models.provider_priority.clone());
        Self {
            registry,
            router,
            resilience,
            models,
            vector_size,
        }
    }

    pub fn health_snapshot(&self) -> HashMap<String, ProviderHealth> {
        self.registry.health_snapshot()
    }

    /// §4.1: must return exactly `D` floats; dimension mismatch is a fatal
    /// configuration error, not a runtime recoverable one — never retried.
    #[instrument(skip(self, text))]
    pub async fn embed(&self, text: &str) -> Result<(Vec<f32>, GatewayCallStats), GatewayError> {
        let start = Instant::now();
        let provider = self.router.pick(&self.registry, "embed").await?;
        let name = provider.name().to_string();

        let result = retry::with_retry(&self.resilience, &name, || {
            let provider = provider.clone();
            async move { provider.embed(text).await }
        })
        .await;

        let success = result.is_ok();
        self.router.note_outcome(&self.registry, &name, success);

        let outcome = result?;
        if outcome.value.len() != self.vector_size {
            return Err(GatewayError::DimensionMismatch {
                expected: self.vector_size,
                got: outcome.value.len(),
            });
        }

        Ok((
            outcome.value,
            GatewayCallStats {
                provider: name,
                latency_ms: start.elapsed().as_millis() as u64,
                estimated_cost_usd: outcome.estimated_cost_usd,
                success,
            },
        ))
    }

    /// §4.1: scores align to `docs[]` input order; callers sort.
    #[instrument(skip(self, query, docs))]
    pub async fn rerank(
        &self,
        query: &str,
        docs: &[String],
        top_k: usize,
    ) -> Result<(Vec<f32>, GatewayCallStats), GatewayError> {
        let start = Instant::now();
        let provider = self.router.pick(&self.registry, "rerank").await?;
        let name = provider.name().to_string();

        let result = retry::with_retry(&self.resilience, &name, || {
            let provider = provider.clone();
            async move { provider.rerank(query, docs, top_k).await }
        })
        .await;

        let success = result.is_ok();
        self.router.note_outcome(&self.registry, &name, success);
        let outcome = result?;

        Ok((
            outcome.value,
            GatewayCallStats {
                provider: name,
                latency_ms: start.elapsed().as_millis() as u64,
                estimated_cost_usd: outcome.estimated_cost_usd,
                success,
            },
        ))
    }

    /// §4.6 step 2: heavy model for `global`/`decision`, light model for
    /// `conversation`/`archive`.
    #[instrument(skip(self, messages))]
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        use_heavy_model: bool,
    ) -> Result<(String, GatewayCallStats), GatewayError> {
        let start = Instant::now();
        let provider = self.router.pick(&self.registry, "complete").await?;
        let name = provider.name().to_string();
        let model = if use_heavy_model {
            self.models.default_heavy_model.clone()
        } else {
            self.models.default_light_model.clone()
        };
        let params = CompletionParams {
            model,
            max_tokens: None,
            temperature: Some(0.3),
        };

        let result = retry::with_retry(&self.resilience, &name, || {
            let provider = provider.clone();
            let params = params.clone();
            async move { provider.complete(messages, &params).await }
        })
        .await;

        let success = result.is_ok();
        self.router.note_outcome(&self.registry, &name, success);
        let outcome = result?;

        Ok((
            outcome.value,
            GatewayCallStats {
                provider: name,
                latency_ms: start.elapsed().as_millis() as u64,
                estimated_cost_usd: outcome.estimated_cost_usd,
                success,
            },
        ))
    }
}
