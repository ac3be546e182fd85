// src/compressor/mod.rs
//! Semantic Compressor (C6, §4.6): turns a conversation into a candidate
//! `MemoryUnit` via the Model Gateway. Never writes — the Dual-Write
//! Store (C7) owns persistence.

use crate::domain::{new_id, normalize_keywords, Conversation, Message, MemoryUnit, UnitType};
use crate::error::GatewayError;
use crate::gateway::{ChatMessage, ModelGateway};
use crate::tokenizer::estimate_tokens;
use serde::Deserialize;
use thiserror::Error;
use tracing::{instrument, warn};

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("model output missing or malformed field: {0}")]
    MalformedOutput(String),
    #[error("quality score {score} below threshold {threshold}")]
    BelowThreshold { score: f32, threshold: f32 },
}

#[derive(Deserialize)]
struct CompressionOutput {
    title: String,
    summary: String,
    content: String,
    #[serde(default)]
    keywords: Vec<String>,
    quality_score: f32,
}

pub struct SemanticCompressor<'a> {
    gateway: &'a ModelGateway,
}

impl<'a> SemanticCompressor<'a> {
    pub fn new(gateway: &'a ModelGateway) -> Self {
        Self { gateway }
    }

    /// `Compress(conversation, unit_type, quality_threshold) -> MemoryUnit?`
    /// (§4.6). Returns `Ok(None)` only for the below-threshold discard
    /// case described by the operation signature; every other failure
    /// mode is an `Err` so callers can decide whether to retry with a
    /// different model tier (§4.6 step 3).
    #[instrument(skip(self, conversation, messages))]
    pub async fn compress(
        &self,
        conversation: &Conversation,
        messages: &[Message],
        unit_type: UnitType,
        quality_threshold: f32,
    ) -> Result<Option<MemoryUnit>, CompressError> {
        let prompt = flatten_messages(messages);
        let use_heavy_model = unit_type.uses_heavy_model();

        let (raw, _stats) = self.gateway.complete(&prompt, use_heavy_model).await?;
        let parsed = parse_output(&raw)?;

        if parsed.quality_score < quality_threshold {
            warn!(
                score = parsed.quality_score,
                threshold = quality_threshold,
                conversation_id = %conversation.id,
                "discarding compressed unit below quality threshold"
            );
            return Ok(None);
        }

        let keywords = normalize_keywords(parsed.keywords);
        let token_count = estimate_tokens(&parsed.content) + estimate_tokens(&parsed.summary);

        Ok(Some(MemoryUnit {
            id: new_id(),
            conversation_id: conversation.id.clone(),
            project_id: conversation.project_id.clone(),
            unit_type,
            title: parsed.title,
            summary: parsed.summary,
            content: parsed.content,
            keywords,
            relevance_score: 0.0,
            quality_score: parsed.quality_score,
            token_count: token_count as i64,
            created_at: chrono::Utc::now(),
            expires_at: None,
            is_active: true,
            metadata: serde_json::Value::Null,
        }))
    }
}

fn flatten_messages(messages: &[Message]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ChatMessage {
        role: "system".to_string(),
        content: COMPRESSION_INSTRUCTIONS.to_string(),
    });
    for message in messages {
        out.push(ChatMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        });
    }
    out
}

const COMPRESSION_INSTRUCTIONS: &str = r#"Summarize the conversation above into a durable memory unit. \
Respond with a single JSON object: \
{"title": string, "summary": string, "content": string, "keywords": [string], "quality_score": number in [0,1]}. \
No other text."#;

fn parse_output(raw: &str) -> Result<CompressionOutput, CompressError> {
    let json_slice = extract_json_object(raw)
        .ok_or_else(|| CompressError::MalformedOutput("no JSON object found in output".to_string()))?;
    serde_json::from_str(json_slice).map_err(|e| CompressError::MalformedOutput(e.to_string()))
}

/// Model output is sometimes wrapped in prose or a code fence; take the
/// first balanced `{...}` span.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    for (i, c) in raw[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
