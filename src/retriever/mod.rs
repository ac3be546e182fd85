// src/retriever/mod.rs
//! Semantic Retriever (C8, §4.8): hybrid vector + keyword search over
//! memory units, with rerank and a consistency-self-heal hydration step.

use crate::cache::Cache;
use crate::domain::{MemoryUnit, UnitType};
use crate::error::RetrieveError;
use crate::gateway::ModelGateway;
use crate::store::MemoryStore;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Vector,
    Keyword,
    Both,
}

#[derive(Debug, Clone)]
pub struct RetrievedMemory {
    pub unit: MemoryUnit,
    pub score: f32,
    pub match_source: MatchSource,
    pub matched_keywords: Vec<String>,
}

pub struct RetrieveParams<'a> {
    pub query: &'a str,
    pub project_id: Option<&'a str>,
    pub limit: usize,
    pub min_score: f32,
    pub hybrid: bool,
    pub rerank: bool,
    pub unit_types: Option<&'a [UnitType]>,
}

/// Fixed score assigned to a keyword-only hit before merging (§4.8 step 3)
/// — below typical vector cosine similarities for close matches, so a
/// strong vector hit always outranks a bare substring match.
const KEYWORD_ARM_SCORE: f32 = 0.35;

struct MergedCandidate {
    id: String,
    score: f32,
    match_source: MatchSource,
}

pub struct SemanticRetriever<'a> {
    gateway: &'a ModelGateway,
    store: &'a MemoryStore,
    result_cache: &'a Cache<Vec<RetrievedMemory>>,
}

impl<'a> SemanticRetriever<'a> {
    pub fn new(gateway: &'a ModelGateway, store: &'a MemoryStore, result_cache: &'a Cache<Vec<RetrievedMemory>>) -> Self {
        Self {
            gateway,
            store,
            result_cache,
        }
    }

    #[instrument(skip(self, params))]
    pub async fn retrieve(&self, params: RetrieveParams<'_>) -> Result<Vec<RetrievedMemory>, RetrieveError> {
        let cache_key = cache_key(&params);
        if let Some(hit) = self.result_cache.get(&cache_key) {
            return Ok(hit);
        }

        let k_vec = params.limit.saturating_mul(2).max(1);
        let (q_vec, _stats) = self.gateway.embed(params.query).await?;
        let vector_hits = self
            .store
            .vector_store_search(q_vec, k_vec, params.project_id)
            .await?;

        let mut merged: HashMap<String, MergedCandidate> = HashMap::new();
        for hit in vector_hits {
            merged.insert(
                hit.id.clone(),
                MergedCandidate {
                    id: hit.id,
                    score: hit.score,
                    match_source: MatchSource::Vector,
                },
            );
        }

        let mut keyword_matches: HashMap<String, Vec<String>> = HashMap::new();
        if params.hybrid {
            let hits = self
                .store
                .search_messages_like(params.query, params.project_id, k_vec as i64)
                .await?;
            // The keyword arm operates on messages; resolve to memory units
            // sharing the same conversation so scores merge on a common id
            // space (§4.8 step 4 merges "by memory_unit.id").
            let conversation_ids: Vec<String> =
                hits.iter().map(|h| h.message.conversation_id.clone()).collect();
            let candidate_units = self
                .store
                .get_memory_units_by_conversation_ids(&conversation_ids)
                .await?;
            for unit in &candidate_units {
                keyword_matches
                    .entry(unit.id.clone())
                    .or_default()
                    .push(params.query.to_string());
                merged
                    .entry(unit.id.clone())
                    .and_modify(|c| {
                        c.score = c.score.max(KEYWORD_ARM_SCORE);
                        c.match_source = MatchSource::Both;
                    })
                    .or_insert(MergedCandidate {
                        id: unit.id.clone(),
                        score: KEYWORD_ARM_SCORE,
                        match_source: MatchSource::Keyword,
                    });
            }
        }

        let mut candidates: Vec<MergedCandidate> = merged
            .into_values()
            .filter(|c| c.score >= params.min_score)
            .collect();

        if candidates.is_empty() {
            let empty = Vec::new();
            self.result_cache.insert(cache_key, empty.clone());
            return Ok(empty);
        }

        let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let mut units = self.store.get_memory_units_by_ids(&ids).await?;
        units.retain(|u| u.is_active);
        if let Some(types) = params.unit_types {
            units.retain(|u| types.contains(&u.unit_type));
        }
        let units_by_id: HashMap<String, MemoryUnit> = units.into_iter().map(|u| (u.id.clone(), u)).collect();
        candidates.retain(|c| units_by_id.contains_key(&c.id));

        if params.rerank && candidates.len() > 3 {
            let docs: Vec<String> = candidates
                .iter()
                .map(|c| {
                    let unit = &units_by_id[&c.id];
                    format!("{} {}", unit.summary, unit.content)
                })
                .collect();
            let (scores, _stats) = self.gateway.rerank(params.query, &docs, params.limit).await?;
            for (candidate, score) in candidates.iter_mut().zip(scores) {
                candidate.score = score;
            }
        }

        let mut results: Vec<RetrievedMemory> = candidates
            .into_iter()
            .filter_map(|c| {
                units_by_id.get(&c.id).map(|unit| RetrievedMemory {
                    unit: unit.clone(),
                    score: c.score,
                    match_source: c.match_source,
                    matched_keywords: keyword_matches.remove(&c.id).unwrap_or_default(),
                })
            })
            .collect();

        results.sort_by(|a, b| tie_break(a, b));
        results.truncate(params.limit);

        self.result_cache.insert(cache_key, results.clone());
        Ok(results)
    }
}

/// §4.8 tie-breaking: higher rerank/vector score > newer `created_at` >
/// lexicographic id.
fn tie_break(a: &RetrievedMemory, b: &RetrievedMemory) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.unit.created_at.cmp(&a.unit.created_at))
        .then_with(|| a.unit.id.cmp(&b.unit.id))
}

fn cache_key(params: &RetrieveParams<'_>) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(params.query.as_bytes());
    hasher.update(params.project_id.unwrap_or("").as_bytes());
    hasher.update(params.limit.to_le_bytes());
    hasher.update(params.min_score.to_le_bytes());
    format!("retrieve:{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_break_prefers_higher_score_then_newer_then_id() {
        let base = chrono::Utc::now();
        let mk = |id: &str, score: f32, created_at: chrono::DateTime<chrono::Utc>| RetrievedMemory {
            unit: MemoryUnit {
                id: id.to_string(),
                conversation_id: "c".to_string(),
                project_id: "p".to_string(),
                unit_type: UnitType::Conversation,
                title: "t".to_string(),
                summary: "s".to_string(),
                content: "c".to_string(),
                keywords: vec![],
                relevance_score: 0.0,
                quality_score: 0.8,
                token_count: 1,
                created_at,
                expires_at: None,
                is_active: true,
                metadata: serde_json::Value::Null,
            },
            score,
            match_source: MatchSource::Vector,
            matched_keywords: vec![],
        };
        let mut items = vec![mk("b", 0.5, base), mk("a", 0.5, base), mk("z", 0.9, base)];
        items.sort_by(tie_break);
        assert_eq!(items[0].unit.id, "z");
        assert_eq!(items[1].unit.id, "a");
        assert_eq!(items[2].unit.id, "b");
    }
}
