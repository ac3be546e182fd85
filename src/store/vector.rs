// src/store/vector.rs
//! The vector half of the Dual-Write Store (§4.7, §6.3): one collection,
//! fixed dimension `D`, cosine distance, denormalised payload for
//! filtering and hydration without a round-trip to the relational store.

use crate::config::VectorStoreConfig;
use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, vectors_config::Config as VectorsConfigOneOf, CreateCollection,
    Distance, FieldCondition, Filter, Match, PointId, PointStruct, SearchPoints, UpsertPoints,
    Value as QdrantValue, VectorParams, VectorsConfig,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    #[error("vector store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone)]
pub struct VectorPayload {
    pub project_id: String,
    pub unit_type: String,
    pub keywords: Vec<String>,
    pub created_at: i64,
    pub conversation_id: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
}

/// Seam the retriever (C8) and dual-write path (C7) depend on. A real
/// `QdrantVectorStore` and an in-memory `FakeVectorStore` both implement
/// it, mirroring how the teacher stubs remote collaborators behind a
/// trait in `advisory/session.rs`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        payload: VectorPayload,
    ) -> Result<(), VectorStoreError>;

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        project_filter: Option<&str>,
    ) -> Result<Vec<VectorHit>, VectorStoreError>;

    async fn delete(&self, id: &str) -> Result<(), VectorStoreError>;

    async fn is_healthy(&self) -> bool;
}

pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    vector_size: u64,
}

impl QdrantVectorStore {
    pub async fn connect(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(&config.url)
            .build()
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        let exists = client
            .collection_exists(&config.collection_name)
            .await
            .map_err(|e| VectorStoreError::Request(e.to_string()))?;

        if !exists {
            client
                .create_collection(CreateCollection {
                    collection_name: config.collection_name.clone(),
                    vectors_config: Some(VectorsConfig {
                        config: Some(VectorsConfigOneOf::Params(VectorParams {
                            size: config.vector_size,
                            distance: Distance::Cosine.into(),
                            ..Default::default()
                        })),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(|e| VectorStoreError::Request(e.to_string()))?;
        }

        Ok(Self {
            client,
            collection: config.collection_name.clone(),
            vector_size: config.vector_size,
        })
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        payload: VectorPayload,
    ) -> Result<(), VectorStoreError> {
        if vector.len() as u64 != self.vector_size {
            return Err(VectorStoreError::Request(format!(
                "vector dimension {} does not match collection dimension {}",
                vector.len(),
                self.vector_size
            )));
        }

        let mut payload_map: HashMap<String, QdrantValue> = HashMap::new();
        payload_map.insert("project_id".to_string(), payload.project_id.into());
        payload_map.insert("unit_type".to_string(), payload.unit_type.into());
        payload_map.insert(
            "keywords".to_string(),
            payload.keywords.into_iter().map(QdrantValue::from).collect::<Vec<_>>().into(),
        );
        payload_map.insert("created_at".to_string(), payload.created_at.into());
        payload_map.insert("conversation_id".to_string(), payload.conversation_id.into());
        payload_map.insert("title".to_string(), payload.title.into());

        let point = PointStruct::new(id.to_string(), vector, payload_map);

        self.client
            .upsert_points(UpsertPoints {
                collection_name: self.collection.clone(),
                points: vec![point],
                wait: Some(true),
                ..Default::default()
            })
            .await
            .map_err(|e| VectorStoreError::Request(e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        project_filter: Option<&str>,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        let filter = project_filter.map(|project_id| Filter {
            must: vec![FieldCondition {
                key: "project_id".to_string(),
                r#match: Some(Match {
                    match_value: Some(qdrant_client::qdrant::r#match::MatchValue::Keyword(
                        project_id.to_string(),
                    )),
                }),
                ..Default::default()
            }
            .into()],
            ..Default::default()
        });

        let response = self
            .client
            .search_points(SearchPoints {
                collection_name: self.collection.clone(),
                vector,
                limit: limit as u64,
                filter,
                with_payload: Some(false.into()),
                ..Default::default()
            })
            .await
            .map_err(|e| VectorStoreError::Request(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|scored| {
                let id = match scored.id?.point_id_options? {
                    PointIdOptions::Uuid(s) => s,
                    PointIdOptions::Num(n) => n.to_string(),
                };
                Some(VectorHit {
                    id,
                    score: scored.score,
                })
            })
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<(), VectorStoreError> {
        let point_id = PointId {
            point_id_options: Some(PointIdOptions::Uuid(id.to_string())),
        };
        self.client
            .delete_points(qdrant_client::qdrant::DeletePoints {
                collection_name: self.collection.clone(),
                points: Some(qdrant_client::qdrant::PointsSelector {
                    points_selector_one_of: Some(
                        qdrant_client::qdrant::points_selector::PointsSelectorOneOf::Points(
                            qdrant_client::qdrant::PointsIdsList {
                                ids: vec![point_id],
                            },
                        ),
                    ),
                }),
                wait: Some(true),
                ..Default::default()
            })
            .await
            .map_err(|e| VectorStoreError::Request(e.to_string()))?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}

/// Deterministic in-memory stand-in used by tests (and by the Fake
/// providers the compressor/gateway tests already use) — cosine search
/// over a `Mutex<HashMap>`, no network.
pub struct FakeVectorStore {
    points: parking_lot::Mutex<HashMap<String, (Vec<f32>, String)>>,
}

impl FakeVectorStore {
    pub fn new() -> Self {
        Self {
            points: parking_lot::Mutex::new(HashMap::new()),
        }
    }
}

impl Default for FakeVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        payload: VectorPayload,
    ) -> Result<(), VectorStoreError> {
        self.points
            .lock()
            .insert(id.to_string(), (vector, payload.project_id));
        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        project_filter: Option<&str>,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        let points = self.points.lock();
        let mut scored: Vec<VectorHit> = points
            .iter()
            .filter(|(_, (_, project_id))| {
                project_filter.map(|p| p == project_id).unwrap_or(true)
            })
            .map(|(id, (v, _))| VectorHit {
                id: id.clone(),
                score: cosine_similarity(&vector, v),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, id: &str) -> Result<(), VectorStoreError> {
        self.points.lock().remove(id);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
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

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(project_id: &str) -> VectorPayload {
        VectorPayload {
            project_id: project_id.to_string(),
            unit_type: "conversation".to_string(),
            keywords: vec!["a".to_string()],
            created_at: 0,
            conversation_id: "c1".to_string(),
            title: "t".to_string(),
        }
    }

    #[tokio::test]
    async fn fake_store_search_respects_project_filter() {
        let store = FakeVectorStore::new();
        store.upsert("a", vec![1.0, 0.0], payload("p1")).await.unwrap();
        store.upsert("b", vec![1.0, 0.0], payload("p2")).await.unwrap();
        let hits = store.search(vec![1.0, 0.0], 10, Some("p1")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn fake_store_delete_removes_point() {
        let store = FakeVectorStore::new();
        store.upsert("a", vec![1.0, 0.0], payload("p1")).await.unwrap();
        store.delete("a").await.unwrap();
        let hits = store.search(vec![1.0, 0.0], 10, None).await.unwrap();
        assert!(hits.is_empty());
    }
}
