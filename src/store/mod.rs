// src/store/mod.rs
//! Dual-Write Store (C7, §4.7): the relational store is the source of
//! truth, the vector store a derived index. A missing vector is
//! rebuilt from the row; a missing row cannot be rebuilt from a vector.

pub mod relational;
pub mod vector;

use crate::cache::Cache;
use crate::domain::{Conversation, ConversationStatus, MemoryUnit, Message, Project};
use crate::error::StoreError;
use crate::gateway::ModelGateway;
use crate::queue::{BatchProcessor, BatchQueue};
use crate::store::vector::{VectorPayload, VectorStore};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, instrument, warn};

/// Repair work enqueued on C5 when the vector half of a write fails
/// (§4.7.1 step 8): re-embed and re-upsert without re-inserting the
/// relational row.
pub struct VectorRepairTask {
    pub unit_id: String,
    pub embedding_text: String,
    pub project_id: String,
    pub unit_type: String,
    pub keywords: Vec<String>,
    pub created_at: i64,
    pub conversation_id: String,
    pub title: String,
}

pub struct VectorRepairProcessor {
    gateway: Arc<ModelGateway>,
    vector_store: Arc<dyn VectorStore>,
    relational: SqlitePool,
    admission: Arc<Semaphore>,
}

#[async_trait]
impl BatchProcessor<VectorRepairTask> for VectorRepairProcessor {
    async fn process_batch(&self, batch: Vec<VectorRepairTask>) {
        for task in batch {
            let _permit = self.admission.clone().acquire_owned().await;
            match self.gateway.embed(&task.embedding_text).await {
                Ok((vector, _stats)) => {
                    let payload = VectorPayload {
                        project_id: task.project_id,
                        unit_type: task.unit_type,
                        keywords: task.keywords,
                        created_at: task.created_at,
                        conversation_id: task.conversation_id,
                        title: task.title,
                    };
                    match self.vector_store.upsert(&task.unit_id, vector, payload).await {
                        Ok(()) => {
                            if let Err(e) =
                                relational::set_memory_unit_active(&self.relational, &task.unit_id, true).await
                            {
                                error!(unit_id = %task.unit_id, error = %e, "repair: failed to reactivate row");
                            } else {
                                info!(unit_id = %task.unit_id, "repaired vector, row reactivated");
                            }
                        }
                        Err(e) => warn!(unit_id = %task.unit_id, error = %e, "repair retry still failing"),
                    }
                }
                Err(e) => warn!(unit_id = %task.unit_id, error = %e, "repair: re-embed failed"),
            }
        }
    }
}

pub enum StoreOutcome {
    Stored,
    PartialFailure { unit_id: String },
}

pub struct MemoryStore {
    pool: SqlitePool,
    vector_store: Arc<dyn VectorStore>,
    gateway: Arc<ModelGateway>,
    repair_queue: BatchQueue<VectorRepairTask>,
    recent_conversations_cache: Cache<Vec<Conversation>>,
    messages_cache: Cache<Vec<Message>>,
    /// Admission gate shared with the Connection Pool (C3): the autoscaler
    /// (C11) resizing the pool changes how many of these a caller can hold
    /// at once (§4.11).
    admission: Arc<Semaphore>,
}

impl MemoryStore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        vector_store: Arc<dyn VectorStore>,
        gateway: Arc<ModelGateway>,
        batch_queue_capacity: usize,
        batch_size: usize,
        batch_timeout: Duration,
        cache_size: usize,
        cache_ttl: Duration,
        admission: Arc<Semaphore>,
    ) -> Self {
        let processor = Arc::new(VectorRepairProcessor {
            gateway: gateway.clone(),
            vector_store: vector_store.clone(),
            relational: pool.clone(),
            admission: admission.clone(),
        });
        let repair_queue = BatchQueue::spawn(batch_queue_capacity, batch_size, batch_timeout, processor);
        Self {
            pool,
            vector_store,
            gateway,
            repair_queue,
            recent_conversations_cache: Cache::new(cache_size, cache_ttl),
            messages_cache: Cache::new(cache_size, cache_ttl),
            admission,
        }
    }

    /// Holds one slot of the Connection Pool's admission gate for the
    /// duration of a relational operation, the seam C11's `resize()`
    /// actually changes the throughput of.
    async fn permit(&self) -> OwnedSemaphorePermit {
        self.admission
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed while the store is alive")
    }

    pub async fn initialize_schema(&self) -> Result<(), StoreError> {
        let _permit = self.permit().await;
        relational::initialize_schema(&self.pool).await?;
        Ok(())
    }

    pub async fn ensure_project(&self, project: &Project) -> Result<(), StoreError> {
        let _permit = self.permit().await;
        relational::insert_project(&self.pool, project).await?;
        Ok(())
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        let _permit = self.permit().await;
        Ok(relational::list_projects(&self.pool).await?)
    }

    /// §4.7.2 `StoreConversationBatch`: conversations + messages inserted
    /// in a single transaction, preserving `sequence_number`.
    #[instrument(skip(self, conversations))]
    pub async fn store_conversation_batch(
        &self,
        conversations: &[(Conversation, Vec<Message>)],
    ) -> Result<(), StoreError> {
        let _permit = self.permit().await;
        let mut tx = self.pool.begin().await?;
        for (conversation, messages) in conversations {
            relational::insert_conversation(&mut *tx, conversation).await?;
            for message in messages {
                relational::insert_message(&mut *tx, message).await?;
            }
        }
        tx.commit().await?;
        self.recent_conversations_cache.invalidate("recent");
        Ok(())
    }

    /// §4.7.1 `StoreMemoryUnit`: relational insert commits first; the
    /// vector write happens after, outside the transaction.
    #[instrument(skip(self, unit))]
    pub async fn store_memory_unit(&self, unit: &MemoryUnit) -> Result<StoreOutcome, StoreError> {
        let _permit = self.permit().await;
        let mut tx = self.pool.begin().await?;
        if !relational::conversation_exists(&mut *tx, &unit.conversation_id).await? {
            return Err(StoreError::ParentMissing {
                conversation_id: unit.conversation_id.clone(),
            });
        }
        relational::insert_memory_unit(&mut *tx, unit).await?;
        tx.commit().await?;

        let embedding_text = unit.embedding_text();
        let embed_result = self.gateway.embed(&embedding_text).await;

        let vector = match embed_result {
            Ok((vector, _stats)) => vector,
            Err(e) => {
                return self.fail_vector_write(unit, &embedding_text, e.to_string()).await;
            }
        };

        let payload = VectorPayload {
            project_id: unit.project_id.clone(),
            unit_type: unit.unit_type.as_str().to_string(),
            keywords: unit.keywords.clone(),
            created_at: unit.created_at.timestamp(),
            conversation_id: unit.conversation_id.clone(),
            title: unit.title.clone(),
        };

        if let Err(e) = self.vector_store.upsert(&unit.id, vector, payload).await {
            return self.fail_vector_write(unit, &embedding_text, e.to_string()).await;
        }

        relational::mark_conversation_compressed(&self.pool, &unit.conversation_id).await?;
        Ok(StoreOutcome::Stored)
    }

    async fn fail_vector_write(
        &self,
        unit: &MemoryUnit,
        embedding_text: &str,
        message: String,
    ) -> Result<StoreOutcome, StoreError> {
        warn!(unit_id = %unit.id, error = %message, "vector write failed, deactivating row and enqueueing repair");
        relational::set_memory_unit_active(&self.pool, &unit.id, false).await?;
        let task = VectorRepairTask {
            unit_id: unit.id.clone(),
            embedding_text: embedding_text.to_string(),
            project_id: unit.project_id.clone(),
            unit_type: unit.unit_type.as_str().to_string(),
            keywords: unit.keywords.clone(),
            created_at: unit.created_at.timestamp(),
            conversation_id: unit.conversation_id.clone(),
            title: unit.title.clone(),
        };
        if let Err(e) = self.repair_queue.try_submit(task) {
            error!(unit_id = %unit.id, error = %e, "repair queue full, unit will stay inactive until next manual repair");
        }
        Ok(StoreOutcome::PartialFailure {
            unit_id: unit.id.clone(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_recent_conversations(&self, limit: i64) -> Result<Vec<Conversation>, StoreError> {
        let key = format!("recent:{}", limit);
        if let Some(hit) = self.recent_conversations_cache.get(&key) {
            return Ok(hit);
        }
        let _permit = self.permit().await;
        let conversations = relational::get_recent_conversations(&self.pool, limit).await?;
        self.recent_conversations_cache.insert(key, conversations.clone());
        Ok(conversations)
    }

    #[instrument(skip(self))]
    pub async fn get_conversation_messages(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let key = format!("messages:{}:{}", conversation_id, limit);
        if let Some(hit) = self.messages_cache.get(&key) {
            return Ok(hit);
        }
        let _permit = self.permit().await;
        let messages = relational::get_conversation_messages(&self.pool, conversation_id, limit).await?;
        self.messages_cache.insert(key, messages.clone());
        Ok(messages)
    }

    pub async fn search_messages_like(
        &self,
        pattern: &str,
        project_filter: Option<&str>,
        limit: i64,
    ) -> Result<Vec<relational::MessageSearchHit>, StoreError> {
        let _permit = self.permit().await;
        Ok(relational::search_messages_like(&self.pool, pattern, project_filter, limit).await?)
    }

    pub async fn get_memory_units_by_ids(&self, ids: &[String]) -> Result<Vec<MemoryUnit>, StoreError> {
        let _permit = self.permit().await;
        Ok(relational::get_memory_units_by_ids(&self.pool, ids).await?)
    }

    pub async fn get_memory_units_by_conversation_ids(
        &self,
        conversation_ids: &[String],
    ) -> Result<Vec<MemoryUnit>, StoreError> {
        let _permit = self.permit().await;
        Ok(relational::get_memory_units_by_conversation_ids(&self.pool, conversation_ids).await?)
    }

    /// C8's vector-search seam onto C7's vector store handle (§4.8 step 2).
    pub async fn vector_store_search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        project_filter: Option<&str>,
    ) -> Result<Vec<vector::VectorHit>, StoreError> {
        self.vector_store
            .search(vector, limit, project_filter)
            .await
            .map_err(|e| StoreError::Vector(e.to_string()))
    }

    pub async fn get_memory_unit(&self, id: &str) -> Result<Option<MemoryUnit>, StoreError> {
        let _permit = self.permit().await;
        Ok(relational::get_memory_unit(&self.pool, id).await?)
    }

    /// Single-conversation lookup for the orchestrator's
    /// `get_conversation_messages` façade operation (§6.1).
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
        let _permit = self.permit().await;
        Ok(relational::get_conversation(&self.pool, conversation_id).await?)
    }

    pub async fn vector_store_is_healthy(&self) -> bool {
        self.vector_store.is_healthy().await
    }

    /// Sampled by the Perf Monitor (C11) as the C5 backlog reading.
    pub fn repair_queue_depth(&self) -> usize {
        self.repair_queue.queue_depth()
    }

    pub async fn shutdown(self) {
        self.repair_queue.shutdown().await;
    }
}
