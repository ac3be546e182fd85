// src/gateway/providers/mock_provider.rs
//! Deterministic in-process provider for tests (and for local development
//! without a remote embedding/rerank/chat backend configured). Grounded on
//! the pack's pattern of stubbing remote collaborators behind the same
//! trait the real client implements (e.g. the teacher's `tests/mcp_integration.rs`
//! stubs an MCP server rather than hitting the network).

use crate::error::GatewayError;
use crate::gateway::provider::{ChatMessage, CompletionParams, ModelProvider, ProviderOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Deterministically hashes text into a `dim`-length unit vector so that
/// repeated calls with the same input produce the same embedding, and
/// semantically similar inputs (sharing substrings) produce nearby vectors
/// via a simple bag-of-trigrams hash.
pub struct MockProvider {
    name: String,
    dim: usize,
    available: AtomicBool,
    scripted_completion: Mutex<Option<String>>,
    scripted_rerank: Mutex<Option<Vec<f32>>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            dim,
            available: AtomicBool::new(true),
            scripted_completion: Mutex::new(None),
            scripted_rerank: Mutex::new(None),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Used by compressor tests to control the `Complete` output exactly.
    pub fn script_completion(&self, text: impl Into<String>) {
        *self.scripted_completion.lock() = Some(text.into());
    }

    /// Used by rerank-determinism tests (S6): force exact output scores.
    pub fn script_rerank(&self, scores: Vec<f32>) {
        *self.scripted_rerank.lock() = Some(scores);
    }

    fn embed_vector(&self, text: &str) -> Vec<f32> {
        let trigrams: Vec<String> = {
            let chars: Vec<char> = text.to_lowercase().chars().collect();
            if chars.len() < 3 {
                vec![text.to_lowercase()]
            } else {
                chars.windows(3).map(|w| w.iter().collect()).collect()
            }
        };

        let mut vector = vec![0.0f32; self.dim];
        for trigram in &trigrams {
            let mut hasher = DefaultHasher::new();
            trigram.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dim;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<ProviderOutcome<Vec<f32>>, GatewayError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(GatewayError::Transient {
                provider: self.name.clone(),
                message: "provider offline".into(),
            });
        }
        Ok(ProviderOutcome {
            value: self.embed_vector(text),
            latency: Duration::from_millis(1),
            estimated_cost_usd: 0.0,
        })
    }

    async fn rerank(
        &self,
        query: &str,
        docs: &[String],
        _top_k: usize,
    ) -> Result<ProviderOutcome<Vec<f32>>, GatewayError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(GatewayError::Transient {
                provider: self.name.clone(),
                message: "provider offline".into(),
            });
        }
        if let Some(scripted) = self.scripted_rerank.lock().clone() {
            if scripted.len() == docs.len() {
                return Ok(ProviderOutcome {
                    value: scripted,
                    latency: Duration::from_millis(1),
                    estimated_cost_usd: 0.0,
                });
            }
        }
        let q_vec = self.embed_vector(query);
        let scores = docs
            .iter()
            .map(|doc| cosine_similarity(&q_vec, &self.embed_vector(doc)))
            .collect();
        Ok(ProviderOutcome {
            value: scores,
            latency: Duration::from_millis(1),
            estimated_cost_usd: 0.0,
        })
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &CompletionParams,
    ) -> Result<ProviderOutcome<String>, GatewayError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(GatewayError::Transient {
                provider: self.name.clone(),
                message: "provider offline".into(),
            });
        }
        if let Some(scripted) = self.scripted_completion.lock().clone() {
            return Ok(ProviderOutcome {
                value: scripted,
                latency: Duration::from_millis(1),
                estimated_cost_usd: 0.0,
            });
        }
        let joined = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(ProviderOutcome {
            value: joined,
            latency: Duration::from_millis(1),
            estimated_cost_usd: 0.0,
        })
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
