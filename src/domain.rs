// src/domain.rs
//! Shared entities and invariants (§3.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationStatus {
    Pending,
    Compressed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Human,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::Human => "human",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(MessageRole::Human),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            "tool" => Some(MessageRole::Tool),
            _ => None,
        }
    }
}

/// Closed per §9 "Open questions": no `quick` variant, ever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    Conversation,
    Global,
    Archive,
    Decision,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Conversation => "conversation",
            UnitType::Global => "global",
            UnitType::Archive => "archive",
            UnitType::Decision => "decision",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(UnitType::Conversation),
            "global" => Some(UnitType::Global),
            "archive" => Some(UnitType::Archive),
            "decision" => Some(UnitType::Decision),
            _ => None,
        }
    }

    /// §4.6 step 2: model tier selection by unit type.
    pub fn uses_heavy_model(&self) -> bool {
        matches!(self, UnitType::Global | UnitType::Decision)
    }

    /// §4.9 step 3 reorder priority: global > conversation > archive.
    /// Decision is treated on par with global (both carry durable-decision
    /// weight); archive sorts last.
    pub fn injection_priority(&self) -> u8 {
        match self {
            UnitType::Global | UnitType::Decision => 2,
            UnitType::Conversation => 1,
            UnitType::Archive => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub project_id: String,
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub message_count: i64,
    pub token_count: i64,
    pub status: ConversationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sequence_number: i64,
    pub role: MessageRole,
    pub content: String,
    pub token_count: i64,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub content_hash: String,
}

impl Message {
    pub fn content_hash(content: &str) -> String {
        let normalized = content.trim();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUnit {
    pub id: String,
    pub conversation_id: String,
    pub project_id: String,
    pub unit_type: UnitType,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub relevance_score: f32,
    pub quality_score: f32,
    pub token_count: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub metadata: serde_json::Value,
}

impl MemoryUnit {
    /// Text embedded into the vector store: `content || ' ' || summary`
    /// per §4.7.1 step 6.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.content, self.summary)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// Normalizes a keyword list per §3.3: case-folded, deduplicated, no empty
/// strings, stable order (first occurrence wins).
pub fn normalize_keywords(raw: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for kw in raw {
        let normalized = kw.trim().to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
