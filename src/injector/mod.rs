// src/injector/mod.rs
//! Context Injector (C9, §4.9): selects, orders, renders, and budgets a
//! block of memories to prepend to a prompt.

use crate::cache::Cache;
use crate::domain::UnitType;
use crate::error::RetrieveError;
use crate::retriever::{MatchSource, RetrieveParams, RetrievedMemory, SemanticRetriever};
use crate::tokenizer::{estimate_tokens, truncate_to_token_budget};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionStrategy {
    Conservative,
    Balanced,
    Comprehensive,
}

#[derive(Debug, Clone, Copy)]
pub struct StrategyParams {
    pub max_memories: usize,
    pub token_budget: i64,
    pub min_score: f32,
}

impl InjectionStrategy {
    /// §4.9 + SPEC_FULL §11: figures adopted verbatim from the original's
    /// `context_injector.py` strategy table.
    pub fn params(self) -> StrategyParams {
        match self {
            InjectionStrategy::Conservative => StrategyParams {
                max_memories: 3,
                token_budget: 1000,
                min_score: 0.8,
            },
            InjectionStrategy::Balanced => StrategyParams {
                max_memories: 5,
                token_budget: 2000,
                min_score: 0.6,
            },
            InjectionStrategy::Comprehensive => StrategyParams {
                max_memories: 10,
                token_budget: 4000,
                min_score: 0.4,
            },
        }
    }

    /// §4.9: "if absent, choose by query length (short -> conservative;
    /// long -> comprehensive)".
    pub fn choose_by_query_len(query: &str) -> Self {
        let len = query.chars().count();
        if len < 40 {
            InjectionStrategy::Conservative
        } else if len < 160 {
            InjectionStrategy::Balanced
        } else {
            InjectionStrategy::Comprehensive
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Minimal,
    Standard,
    Detailed,
}

pub struct InjectParams<'a> {
    pub original_prompt: &'a str,
    pub query_text: Option<&'a str>,
    pub mode: Option<InjectionStrategy>,
    pub max_tokens: i64,
    pub project_id: Option<&'a str>,
    pub template: Template,
}

pub struct InjectOutcome {
    pub augmented_prompt: String,
    pub used_memories: Vec<RetrievedMemory>,
    pub tokens_used: i64,
}

pub struct ContextInjector<'a> {
    retriever: &'a SemanticRetriever<'a>,
    render_cache: &'a Cache<String>,
}

impl<'a> ContextInjector<'a> {
    pub fn new(retriever: &'a SemanticRetriever<'a>, render_cache: &'a Cache<String>) -> Self {
        Self {
            retriever,
            render_cache,
        }
    }

    pub async fn inject(&self, params: InjectParams<'_>) -> Result<InjectOutcome, RetrieveError> {
        let query = params.query_text.unwrap_or(params.original_prompt);
        let strategy = params
            .mode
            .unwrap_or_else(|| InjectionStrategy::choose_by_query_len(query));
        let mut strategy_params = strategy.params();
        if params.max_tokens > 0 {
            strategy_params.token_budget = strategy_params.token_budget.min(params.max_tokens);
        }

        let retrieved = self
            .retriever
            .retrieve(RetrieveParams {
                query,
                project_id: params.project_id,
                limit: strategy_params.max_memories * 2,
                min_score: strategy_params.min_score,
                hybrid: true,
                rerank: true,
                unit_types: None,
            })
            .await?;

        if retrieved.is_empty() {
            return Ok(InjectOutcome {
                augmented_prompt: params.original_prompt.to_string(),
                used_memories: Vec::new(),
                tokens_used: 0,
            });
        }

        let selected = select_diverse_budgeted(&retrieved, &strategy_params);
        if selected.is_empty() {
            return Ok(InjectOutcome {
                augmented_prompt: params.original_prompt.to_string(),
                used_memories: Vec::new(),
                tokens_used: 0,
            });
        }

        let reordered = reorder_by_priority(selected);

        let cache_key = render_cache_key(params.original_prompt, &reordered, params.template);
        if let Some(cached_block) = self.render_cache.get(&cache_key) {
            let tokens_used = estimate_tokens(&cached_block);
            return Ok(InjectOutcome {
                augmented_prompt: format!("{}\n\n{}", params.original_prompt, cached_block),
                used_memories: reordered,
                tokens_used,
            });
        }

        let (block, used_memories) = render_within_budget(&reordered, params.template, strategy_params.token_budget);
        self.render_cache.insert(cache_key, block.clone());

        let tokens_used = estimate_tokens(&block);
        Ok(InjectOutcome {
            augmented_prompt: format!("{}\n\n{}", params.original_prompt, block),
            used_memories,
            tokens_used,
        })
    }
}

/// §4.9 step 2: highest-score first, cap at `max_memories`, stop before
/// exceeding `token_budget` (always keep at least one), skip >70%
/// keyword overlap with what's already selected.
fn select_diverse_budgeted(
    retrieved: &[RetrievedMemory],
    params: &StrategyParams,
) -> Vec<RetrievedMemory> {
    let mut selected: Vec<RetrievedMemory> = Vec::new();
    let mut selected_keywords: HashSet<String> = HashSet::new();
    let mut tokens_so_far: i64 = 0;

    for candidate in retrieved {
        if selected.len() >= params.max_memories {
            break;
        }

        let candidate_tokens = candidate.unit.token_count;
        if !selected.is_empty() && tokens_so_far + candidate_tokens > params.token_budget {
            continue;
        }

        if !selected_keywords.is_empty() && !candidate.unit.keywords.is_empty() {
            let overlap = candidate
                .unit
                .keywords
                .iter()
                .filter(|k| selected_keywords.contains(*k))
                .count();
            let ratio = overlap as f32 / candidate.unit.keywords.len() as f32;
            if ratio > 0.7 {
                continue;
            }
        }

        tokens_so_far += candidate_tokens;
        selected_keywords.extend(candidate.unit.keywords.iter().cloned());
        selected.push(candidate.clone());
    }

    if selected.is_empty() {
        if let Some(first) = retrieved.first() {
            selected.push(first.clone());
        }
    }

    selected
}

/// §4.9 step 3: `global > conversation > archive` (decision shares
/// global's weight per the domain model's `injection_priority`).
fn reorder_by_priority(mut selected: Vec<RetrievedMemory>) -> Vec<RetrievedMemory> {
    selected.sort_by(|a, b| {
        b.unit
            .unit_type
            .injection_priority()
            .cmp(&a.unit.unit_type.injection_priority())
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
    });
    selected
}

fn render_within_budget(
    memories: &[RetrievedMemory],
    template: Template,
    token_budget: i64,
) -> (String, Vec<RetrievedMemory>) {
    let mut rendered = render_template(memories, template);
    if estimate_tokens(&rendered) <= token_budget {
        return (rendered, memories.to_vec());
    }

    // §4.9 step 5 first fallback: drop lower-scored memories, re-render
    // with `minimal`.
    let mut trimmed = memories.to_vec();
    while trimmed.len() > 1 {
        trimmed.pop();
        rendered = render_template(&trimmed, Template::Minimal);
        if estimate_tokens(&rendered) <= token_budget {
            return (rendered, trimmed);
        }
    }

    // Second fallback: word-truncate the rendered block proportionally.
    (truncate_to_token_budget(&rendered, token_budget), trimmed)
}

fn render_template(memories: &[RetrievedMemory], template: Template) -> String {
    match template {
        Template::Minimal => {
            let mut out = String::from("Relevant memories:\n");
            for memory in memories.iter().take(3) {
                out.push_str(&format!("- {}: {}\n", memory.unit.title, short_summary(&memory.unit.summary)));
            }
            out
        }
        Template::Standard => {
            let mut out = String::from("Relevant memories:\n");
            for memory in memories {
                out.push_str(&format!(
                    "- [{}] {} (relevance {:.2}, keywords: {})\n  {}\n",
                    memory.unit.created_at.format("%Y-%m-%d"),
                    memory.unit.title,
                    memory.score,
                    memory.unit.keywords.join(", "),
                    memory.unit.summary,
                ));
            }
            out
        }
        Template::Detailed => {
            let mut out = String::new();
            for unit_type in [UnitType::Global, UnitType::Decision, UnitType::Conversation, UnitType::Archive] {
                let group: Vec<&RetrievedMemory> =
                    memories.iter().filter(|m| m.unit.unit_type == unit_type).collect();
                if group.is_empty() {
                    continue;
                }
                out.push_str(&format!("## {}\n", unit_type.as_str()));
                for memory in group {
                    out.push_str(&format!(
                        "### {}\n{}\n\n",
                        memory.unit.title, memory.unit.content
                    ));
                }
            }
            out
        }
    }
}

fn short_summary(summary: &str) -> String {
    let mut out: String = summary.chars().take(120).collect();
    if summary.chars().count() > 120 {
        out.push('…');
    }
    out
}

fn render_cache_key(original_prompt: &str, memories: &[RetrievedMemory], template: Template) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(original_prompt.as_bytes());
    hasher.update([template as u8]);
    for memory in memories {
        hasher.update(memory.unit.id.as_bytes());
    }
    format!("inject:{:x}", hasher.finalize())
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Vector => "vector",
            MatchSource::Keyword => "keyword",
            MatchSource::Both => "both",
        }
    }
}
