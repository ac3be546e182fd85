// src/gateway/providers/http_provider.rs
//! Generic HTTP-backed provider. The core treats embedding/rerank/chat
//! providers as opaque remote collaborators (§1 Non-goals) — this client
//! speaks one small JSON contract (`POST {base_url}/{embed,rerank,complete}`)
//! that any such backend can be fronted with, the same way the teacher's
//! `OpenAIEmbeddings`/`GeminiEmbeddings` wrap a vendor endpoint behind the
//! same `reqwest::Client` + bearer-auth shape.

use crate::error::GatewayError;
use crate::gateway::provider::{ChatMessage, CompletionParams, ModelProvider, ProviderOutcome};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

pub struct HttpModelProvider {
    name: String,
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpModelProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn classify_status(&self, status: StatusCode, body: &str) -> GatewayError {
        if status.is_client_error() {
            GatewayError::Fatal {
                provider: self.name.clone(),
                message: format!("{}: {}", status, body),
            }
        } else {
            GatewayError::Transient {
                provider: self.name.clone(),
                message: format!("{}: {}", status, body),
            }
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    vector: Vec<f32>,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    docs: &'a [String],
    top_k: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

#[derive(Serialize)]
struct CompleteRequest<'a> {
    messages: &'a [ChatMessage],
    model: &'a str,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct CompleteResponse {
    text: String,
}

#[async_trait]
impl ModelProvider for HttpModelProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<ProviderOutcome<Vec<f32>>, GatewayError> {
        let start = Instant::now();
        let resp = self
            .client
            .post(format!("{}/embed", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| GatewayError::Transient {
                provider: self.name.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.classify_status(status, &body));
        }

        let parsed: EmbedResponse = resp.json().await.map_err(|e| GatewayError::MalformedResponse {
            provider: self.name.clone(),
            message: e.to_string(),
        })?;

        debug!(provider = %self.name, dim = parsed.vector.len(), "embed complete");
        Ok(ProviderOutcome {
            value: parsed.vector,
            latency: start.elapsed(),
            estimated_cost_usd: estimate_cost(text.len()),
        })
    }

    async fn rerank(
        &self,
        query: &str,
        docs: &[String],
        top_k: usize,
    ) -> Result<ProviderOutcome<Vec<f32>>, GatewayError> {
        let start = Instant::now();
        let resp = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&RerankRequest { query, docs, top_k })
            .send()
            .await
            .map_err(|e| GatewayError::Transient {
                provider: self.name.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.classify_status(status, &body));
        }

        let parsed: RerankResponse = resp.json().await.map_err(|e| GatewayError::MalformedResponse {
            provider: self.name.clone(),
            message: e.to_string(),
        })?;

        if parsed.scores.len() != docs.len() {
            return Err(GatewayError::RerankMisaligned {
                expected: docs.len(),
                got: parsed.scores.len(),
            });
        }

        Ok(ProviderOutcome {
            value: parsed.scores,
            latency: start.elapsed(),
            estimated_cost_usd: estimate_cost(query.len()),
        })
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<ProviderOutcome<String>, GatewayError> {
        let start = Instant::now();
        let resp = self
            .client
            .post(format!("{}/complete", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&CompleteRequest {
                messages,
                model: &params.model,
                max_tokens: params.max_tokens,
                temperature: params.temperature,
            })
            .send()
            .await
            .map_err(|e| GatewayError::Transient {
                provider: self.name.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.classify_status(status, &body));
        }

        let parsed: CompleteResponse = resp.json().await.map_err(|e| GatewayError::MalformedResponse {
            provider: self.name.clone(),
            message: e.to_string(),
        })?;

        let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        Ok(ProviderOutcome {
            value: parsed.text,
            latency: start.elapsed(),
            estimated_cost_usd: estimate_cost(total_chars),
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

fn estimate_cost(chars: usize) -> f64 {
    (chars as f64 / 4.0) * 0.000_002
}
