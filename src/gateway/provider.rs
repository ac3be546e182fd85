// src/gateway/provider.rs
//! The capability every provider implements (§4.1, §9 "dynamic dispatch of
//! providers"): a registry of named providers implementing a common trait,
//! routed from config, never from reflection.

use crate::error::GatewayError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ProviderOutcome<T> {
    pub value: T,
    pub latency: Duration,
    pub estimated_cost_usd: f64,
}

/// `{Embed, Rerank, Complete, IsAvailable}` — exactly the set §9 names.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<ProviderOutcome<Vec<f32>>, GatewayError>;

    async fn rerank(
        &self,
        query: &str,
        docs: &[String],
        top_k: usize,
    ) -> Result<ProviderOutcome<Vec<f32>>, GatewayError>;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<ProviderOutcome<String>, GatewayError>;

    async fn is_available(&self) -> bool;
}

/// Provider health state machine (§4.13): `ok -> degraded -> skipped_by_router`,
/// `degraded -> ok` on a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderHealth {
    Ok,
    Degraded,
    SkippedByRouter,
}
