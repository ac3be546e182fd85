// src/orchestrator/mod.rs
//! Service Orchestrator (C10, §4.10): owns the lifecycle of every other
//! component and exposes the façade operations the transport layer calls.
//! All façade operations are bracketed by the Request Meter (C4) and the
//! Permission Gate (C12), the way the teacher's `AppState` wraps tool
//! dispatch with budget + auth checks before ever touching a tool body.

use crate::cache::Cache;
use crate::compressor::SemanticCompressor;
use crate::config::ServiceConfig;
use crate::domain::{new_id, Conversation, ConversationStatus, Message, MessageRole, UnitType};
use crate::error::ServiceError;
use crate::gateway::{ModelGateway, ModelProvider, ProviderHealth, ProviderRegistry};
use crate::injector::{ContextInjector, InjectOutcome, InjectParams, InjectionStrategy, Template};
use crate::meter::RequestMeter;
use crate::monitor::{self, PerfMonitor, ScaleDecision, StaticSystemStats};
use crate::permission::{PermissionGate, PermissionLevel, PermissionRequest};
use crate::pool::ConnectionPool;
use crate::retriever::{RetrieveParams, RetrievedMemory, SemanticRetriever};
use crate::store::vector::VectorStore;
use crate::store::{MemoryStore, StoreOutcome};
use crate::tokenizer::estimate_tokens;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Everything the orchestrator needs to start that the caller (`main.rs`)
/// is responsible for constructing — real provider instances and the
/// project/permission policy are deployment choices, not the
/// orchestrator's concern.
pub struct OrchestratorDeps {
    pub config: ServiceConfig,
    pub providers: Vec<Arc<dyn ModelProvider>>,
    pub vector_store: Arc<dyn VectorStore>,
    pub permission_gate: Arc<dyn PermissionGate>,
}

struct Inner {
    config: ServiceConfig,
    pool: ConnectionPool,
    store: MemoryStore,
    gateway: Arc<ModelGateway>,
    permission_gate: Arc<dyn PermissionGate>,
    meter: RequestMeter,
    result_cache: Cache<Vec<RetrievedMemory>>,
    render_cache: Cache<String>,
    started_at: chrono::DateTime<chrono::Utc>,
}

pub struct ServiceOrchestrator {
    inner: Arc<Inner>,
    monitor_task: JoinHandle<()>,
}

impl ServiceOrchestrator {
    /// Start (§4.10): instantiate C1 providers fail-fast, open C3, init
    /// C7's schema, wire C2/C4/C11, start C11's periodic tick. C5's
    /// consumer is already spawned inside `MemoryStore::new`.
    pub async fn start(deps: OrchestratorDeps) -> Result<Self> {
        let OrchestratorDeps {
            config,
            providers,
            vector_store,
            permission_gate,
        } = deps;

        let available: HashSet<String> = providers.iter().map(|p| p.name().to_string()).collect();
        for name in &config.models.provider_priority {
            if !available.contains(name) {
                anyhow::bail!("configured provider '{name}' was not supplied at startup");
            }
        }

        let mut registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(provider);
        }

        let gateway = Arc::new(ModelGateway::new(
            registry,
            config.models.clone(),
            config.resilience.clone(),
            config.vector_store.vector_size as usize,
        ));

        // `embed` already raises `GatewayError::DimensionMismatch` against
        // `vector_size` internally; a real provider's output mismatching
        // the configured collection dimension must fail startup, not the
        // first request.
        gateway
            .embed("startup dimension probe")
            .await
            .context("startup embedding probe failed (check provider output dimension against vector_store.vector_size)")?;

        let pool = ConnectionPool::connect(&config.database, &config.concurrency)
            .await
            .context("opening relational connection pool")?;

        let store = MemoryStore::new(
            pool.sqlx_pool().clone(),
            vector_store,
            gateway.clone(),
            config.concurrency.batch_queue_capacity,
            config.concurrency.batch_size,
            Duration::from_millis(config.concurrency.batch_timeout_ms),
            config.concurrency.cache_size,
            Duration::from_secs(config.concurrency.cache_ttl_seconds),
            pool.admission(),
        );
        store.initialize_schema().await.context("initializing relational schema")?;

        let meter = RequestMeter::new();
        let result_cache = Cache::new(
            config.concurrency.cache_size,
            Duration::from_secs(config.concurrency.cache_ttl_seconds),
        );
        let render_cache = Cache::new(
            config.concurrency.cache_size,
            Duration::from_secs(config.concurrency.cache_ttl_seconds),
        );

        let perf_monitor = Arc::new(PerfMonitor::new(
            config.concurrency.min_connections,
            config.concurrency.max_connections,
            config.concurrency.max_connections,
        ));

        let inner = Arc::new(Inner {
            config,
            pool,
            store,
            gateway,
            permission_gate,
            meter,
            result_cache,
            render_cache,
            started_at: chrono::Utc::now(),
        });

        let monitor_task = {
            let tick_inner = inner.clone();
            monitor::spawn_periodic(perf_monitor, monitor::DEFAULT_TICK_PERIOD, move |m| {
                let meter_snapshot = tick_inner.meter.snapshot();
                let cache_stats = tick_inner.result_cache.stats();
                let pool_stats = tick_inner.pool.stats();
                let queue_depth = tick_inner.store.repair_queue_depth();
                if let Some(decision) = m.tick(&StaticSystemStats, meter_snapshot, cache_stats, pool_stats, queue_depth) {
                    match decision {
                        ScaleDecision::Up(target) => {
                            tick_inner.pool.resize(target as u32);
                            info!(target, "autoscaler grew the pool's admission target");
                        }
                        ScaleDecision::Down(target) => {
                            tick_inner.pool.resize(target as u32);
                            info!(target, "autoscaler shrank the pool's admission target");
                        }
                    }
                }
            })
        };

        Ok(Self { inner, monitor_task })
    }

    /// Stop (§4.10): cancel C11's periodic task and close C3. C5's
    /// consumer is a long-lived `Arc`-shared handle at this point (the
    /// orchestrator may be cloned across transport handlers), so a clean
    /// `BatchQueue::shutdown` drain — which needs ownership — is left to
    /// process exit; repair tasks are idempotent re-embeds, not a
    /// data-loss risk if interrupted mid-batch.
    pub async fn stop(&self) {
        self.monitor_task.abort();
        self.inner.pool.close().await;
    }

    async fn authorize(
        &self,
        user: &str,
        project_ids: Vec<String>,
        required_level: PermissionLevel,
        action: &str,
    ) -> Result<(), ServiceError> {
        self.inner
            .permission_gate
            .check_permissions(&PermissionRequest {
                user: user.to_string(),
                project_ids,
                required_level,
                action: action.to_string(),
            })
            .await?;
        Ok(())
    }

    /// `memory_store` / `/memory/store` (§6.1, §6.2): a single piece of
    /// content wrapped in a one-message conversation, compressed
    /// immediately as a `global` unit.
    pub async fn store_memory(
        &self,
        user: &str,
        project_id: &str,
        content: &str,
        metadata: serde_json::Value,
    ) -> Result<StoreMemoryOutcome, ServiceError> {
        let guard = self.inner.meter.start();
        let result = self.store_memory_inner(user, project_id, content, metadata).await;
        guard.finish(result.is_ok());
        result
    }

    async fn store_memory_inner(
        &self,
        user: &str,
        project_id: &str,
        content: &str,
        metadata: serde_json::Value,
    ) -> Result<StoreMemoryOutcome, ServiceError> {
        self.authorize(user, vec![project_id.to_string()], PermissionLevel::Write, "memory_store")
            .await?;

        if content.trim().is_empty() {
            return Err(ServiceError::InputInvalid("content must not be empty".to_string()));
        }

        let now = chrono::Utc::now();
        let tokens = estimate_tokens(content);
        let conversation = Conversation {
            id: new_id(),
            project_id: project_id.to_string(),
            title: None,
            started_at: now,
            last_activity_at: now,
            message_count: 1,
            token_count: tokens,
            status: ConversationStatus::Pending,
        };
        let message = Message {
            id: new_id(),
            conversation_id: conversation.id.clone(),
            sequence_number: 0,
            role: MessageRole::Human,
            content: content.to_string(),
            token_count: tokens,
            created_at: now,
            metadata,
            content_hash: Message::content_hash(content),
        };

        self.inner
            .store
            .store_conversation_batch(&[(conversation.clone(), vec![message.clone()])])
            .await?;

        let (unit_id, partial) = self
            .compress_and_store(&conversation, &[message], UnitType::Global)
            .await?;

        Ok(StoreMemoryOutcome {
            conversation_id: conversation.id,
            project_id: project_id.to_string(),
            unit_id,
            partial,
        })
    }

    /// `conversation_store` / `/conversation/store` (§6.1, §6.2): persists
    /// a full multi-turn conversation, then compresses it as a
    /// `conversation` unit.
    pub async fn store_conversation(
        &self,
        user: &str,
        project_id: &str,
        title: Option<String>,
        turns: Vec<(MessageRole, String)>,
    ) -> Result<StoreConversationOutcome, ServiceError> {
        let guard = self.inner.meter.start();
        let result = self.store_conversation_inner(user, project_id, title, turns).await;
        guard.finish(result.is_ok());
        result
    }

    async fn store_conversation_inner(
        &self,
        user: &str,
        project_id: &str,
        title: Option<String>,
        turns: Vec<(MessageRole, String)>,
    ) -> Result<StoreConversationOutcome, ServiceError> {
        self.authorize(user, vec![project_id.to_string()], PermissionLevel::Write, "conversation_store")
            .await?;

        if turns.is_empty() {
            return Err(ServiceError::InputInvalid("conversation must contain at least one message".to_string()));
        }

        let now = chrono::Utc::now();
        let conversation_id = new_id();
        let messages: Vec<Message> = turns
            .into_iter()
            .enumerate()
            .map(|(i, (role, content))| Message {
                id: new_id(),
                conversation_id: conversation_id.clone(),
                sequence_number: i as i64,
                role,
                token_count: estimate_tokens(&content),
                created_at: now,
                metadata: serde_json::Value::Null,
                content_hash: Message::content_hash(&content),
                content,
            })
            .collect();
        let token_count: i64 = messages.iter().map(|m| m.token_count).sum();

        let conversation = Conversation {
            id: conversation_id,
            project_id: project_id.to_string(),
            title,
            started_at: now,
            last_activity_at: now,
            message_count: messages.len() as i64,
            token_count,
            status: ConversationStatus::Pending,
        };

        self.inner
            .store
            .store_conversation_batch(&[(conversation.clone(), messages.clone())])
            .await?;

        let (unit_id, partial) = self
            .compress_and_store(&conversation, &messages, UnitType::Conversation)
            .await?;

        Ok(StoreConversationOutcome {
            conversation,
            unit_id,
            partial,
        })
    }

    /// §4.6 + §4.7: compress via C6, persist the resulting unit via C7.
    /// A below-threshold discard (`Ok(None)`) leaves the conversation
    /// `pending` rather than failing the whole store — the raw messages
    /// are already durable.
    async fn compress_and_store(
        &self,
        conversation: &Conversation,
        messages: &[Message],
        unit_type: UnitType,
    ) -> Result<(Option<String>, bool), ServiceError> {
        let compressor = SemanticCompressor::new(&self.inner.gateway);
        let unit = compressor
            .compress(conversation, messages, unit_type, self.inner.config.memory.quality_threshold)
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;

        let Some(unit) = unit else {
            return Ok((None, false));
        };

        let unit_id = unit.id.clone();
        let partial = matches!(
            self.inner.store.store_memory_unit(&unit).await?,
            StoreOutcome::PartialFailure { .. }
        );
        Ok((Some(unit_id), partial))
    }

    /// `memory_search` / `/memory/search` (§6.1, §6.2): delegates to C8.
    pub async fn search_memories(
        &self,
        user: &str,
        query: &str,
        project_id: Option<&str>,
        limit: usize,
        min_score: f32,
        hybrid: bool,
        rerank: bool,
    ) -> Result<Vec<RetrievedMemory>, ServiceError> {
        let guard = self.inner.meter.start();
        let result = self
            .search_memories_inner(user, query, project_id, limit, min_score, hybrid, rerank)
            .await;
        guard.finish(result.is_ok());
        result
    }

    async fn search_memories_inner(
        &self,
        user: &str,
        query: &str,
        project_id: Option<&str>,
        limit: usize,
        min_score: f32,
        hybrid: bool,
        rerank: bool,
    ) -> Result<Vec<RetrievedMemory>, ServiceError> {
        let project_ids = project_id.map(|p| vec![p.to_string()]).unwrap_or_default();
        self.authorize(user, project_ids, PermissionLevel::Read, "memory_search").await?;

        if query.trim().is_empty() {
            return Err(ServiceError::InputInvalid("query must not be empty".to_string()));
        }

        let retriever = SemanticRetriever::new(&self.inner.gateway, &self.inner.store, &self.inner.result_cache);
        let results = retriever
            .retrieve(RetrieveParams {
                query,
                project_id,
                limit,
                min_score,
                hybrid,
                rerank,
                unit_types: None,
            })
            .await?;
        Ok(results)
    }

    /// `memory_inject` / `/memory/inject` (§6.1, §6.2): delegates to C9.
    #[allow(clippy::too_many_arguments)]
    pub async fn inject_context(
        &self,
        user: &str,
        original_prompt: &str,
        query_text: Option<&str>,
        mode: Option<InjectionStrategy>,
        max_tokens: i64,
        project_id: Option<&str>,
        template: Template,
    ) -> Result<InjectOutcome, ServiceError> {
        let guard = self.inner.meter.start();
        let result = self
            .inject_context_inner(user, original_prompt, query_text, mode, max_tokens, project_id, template)
            .await;
        guard.finish(result.is_ok());
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn inject_context_inner(
        &self,
        user: &str,
        original_prompt: &str,
        query_text: Option<&str>,
        mode: Option<InjectionStrategy>,
        max_tokens: i64,
        project_id: Option<&str>,
        template: Template,
    ) -> Result<InjectOutcome, ServiceError> {
        let project_ids = project_id.map(|p| vec![p.to_string()]).unwrap_or_default();
        self.authorize(user, project_ids, PermissionLevel::Read, "memory_inject").await?;

        let retriever = SemanticRetriever::new(&self.inner.gateway, &self.inner.store, &self.inner.result_cache);
        let injector = ContextInjector::new(&retriever, &self.inner.render_cache);
        let outcome = injector
            .inject(InjectParams {
                original_prompt,
                query_text,
                mode,
                max_tokens,
                project_id,
                template,
            })
            .await?;
        Ok(outcome)
    }

    /// `get_recent_conversations` (§6.1). No project scope is given on the
    /// wire, so this reads across all projects — subject to the same
    /// cross-project isolation rule as any other multi-project read.
    pub async fn get_recent_conversations(&self, user: &str, limit: i64) -> Result<Vec<Conversation>, ServiceError> {
        let guard = self.inner.meter.start();
        let result = self.get_recent_conversations_inner(user, limit).await;
        guard.finish(result.is_ok());
        result
    }

    async fn get_recent_conversations_inner(&self, user: &str, limit: i64) -> Result<Vec<Conversation>, ServiceError> {
        self.authorize(user, Vec::new(), PermissionLevel::Read, "get_recent_conversations")
            .await?;
        Ok(self.inner.store.get_recent_conversations(limit).await?)
    }

    /// `get_conversation_messages` (§6.1): the conversation's project
    /// isn't known until it's fetched, so the permission check happens
    /// after that lookup and before the messages are returned.
    pub async fn get_conversation_messages(
        &self,
        user: &str,
        conversation_id: &str,
        limit: i64,
    ) -> Result<ConversationMessages, ServiceError> {
        let guard = self.inner.meter.start();
        let result = self.get_conversation_messages_inner(user, conversation_id, limit).await;
        guard.finish(result.is_ok());
        result
    }

    async fn get_conversation_messages_inner(
        &self,
        user: &str,
        conversation_id: &str,
        limit: i64,
    ) -> Result<ConversationMessages, ServiceError> {
        let conversation = self
            .inner
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| ServiceError::InputInvalid(format!("conversation '{conversation_id}' not found")))?;

        self.authorize(
            user,
            vec![conversation.project_id.clone()],
            PermissionLevel::Read,
            "get_conversation_messages",
        )
        .await?;

        let messages = self.inner.store.get_conversation_messages(conversation_id, limit).await?;
        Ok(ConversationMessages { conversation, messages })
    }

    /// `GET /projects` (§6.2). No project scope to check against, so this
    /// follows the same cross-project read rule as `get_recent_conversations`.
    pub async fn list_projects(&self, user: &str) -> Result<Vec<crate::domain::Project>, ServiceError> {
        let guard = self.inner.meter.start();
        let result = self.list_projects_inner(user).await;
        guard.finish(result.is_ok());
        result
    }

    async fn list_projects_inner(&self, user: &str) -> Result<Vec<crate::domain::Project>, ServiceError> {
        self.authorize(user, Vec::new(), PermissionLevel::Read, "list_projects").await?;
        Ok(self.inner.store.list_projects().await?)
    }

    /// `POST /projects` (§6.2). Requires a write grant on the project id
    /// being created — a brand-new id has no prior grant, so in practice
    /// only the system principal (or a caller pre-granted out of band) can
    /// create one. §6.1's tool surface has no equivalent method; project
    /// provisioning is an HTTP-only administrative action.
    pub async fn create_project(
        &self,
        user: &str,
        project_id: &str,
        name: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<crate::domain::Project, ServiceError> {
        let guard = self.inner.meter.start();
        let result = self.create_project_inner(user, project_id, name, metadata).await;
        guard.finish(result.is_ok());
        result
    }

    async fn create_project_inner(
        &self,
        user: &str,
        project_id: &str,
        name: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<crate::domain::Project, ServiceError> {
        self.authorize(user, vec![project_id.to_string()], PermissionLevel::Write, "create_project")
            .await?;

        if project_id.trim().is_empty() {
            return Err(ServiceError::InputInvalid("project_id must not be empty".to_string()));
        }

        let project = crate::domain::Project {
            id: project_id.to_string(),
            name: name.unwrap_or_else(|| project_id.to_string()),
            created_at: chrono::Utc::now(),
            metadata,
        };
        self.inner.store.ensure_project(&project).await?;
        Ok(project)
    }

    /// `memory_health` / `/health` (§6.1, §6.4). Unlike the other façade
    /// operations this is not permission-gated or meter-bracketed — it's
    /// a liveness probe, not a memory operation.
    pub async fn health(&self) -> ServiceHealth {
        let meter = self.inner.meter.snapshot();
        let cache = self.inner.result_cache.stats();
        let pool = self.inner.pool.stats();
        let providers = self.inner.gateway.health_snapshot();

        let relational_ok = sqlx::query("SELECT 1").execute(self.inner.pool.sqlx_pool()).await.is_ok();
        let vector_ok = self.inner.store.vector_store_is_healthy().await;

        let provider_checks: HashMap<String, String> = providers
            .into_iter()
            .map(|(name, health)| {
                let state = match health {
                    ProviderHealth::Ok => "ok",
                    ProviderHealth::Degraded => "degraded",
                    ProviderHealth::SkippedByRouter => "down",
                };
                (name, state.to_string())
            })
            .collect();

        let status = if !relational_ok || !vector_ok {
            "unhealthy"
        } else if provider_checks.values().any(|v| v != "ok") {
            "degraded"
        } else {
            "healthy"
        };

        let cache_total = cache.hits + cache.misses;
        let cache_hit_rate = if cache_total == 0 {
            1.0
        } else {
            cache.hits as f64 / cache_total as f64
        };
        let error_rate = if meter.total_requests == 0 {
            0.0
        } else {
            meter.error_count as f64 / meter.total_requests as f64
        };

        ServiceHealth {
            service: "memory-service".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: status.to_string(),
            timestamp: chrono::Utc::now(),
            uptime_seconds: (chrono::Utc::now() - self.inner.started_at).num_seconds().max(0),
            checks: HealthChecks {
                relational: if relational_ok { "ok".to_string() } else { "error".to_string() },
                vector_store: if vector_ok { "ok".to_string() } else { "error".to_string() },
                providers: provider_checks,
            },
            performance: HealthPerformance {
                in_flight: meter.in_flight,
                avg_latency_ms: meter.avg_latency_ms,
                error_rate,
                cache_hit_rate,
                pool: HealthPool {
                    size: pool.size,
                    cap: pool.max_connections,
                    target: pool.effective_limit,
                    queue: self.inner.store.repair_queue_depth() as u64,
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreMemoryOutcome {
    pub conversation_id: String,
    pub project_id: String,
    pub unit_id: Option<String>,
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreConversationOutcome {
    pub conversation: Conversation,
    pub unit_id: Option<String>,
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationMessages {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub relational: String,
    pub vector_store: String,
    pub providers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthPool {
    pub size: u32,
    pub cap: u32,
    /// Current autoscaler admission target (§4.11), `<= cap`.
    pub target: u32,
    pub queue: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthPerformance {
    pub in_flight: u64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub pool: HealthPool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    pub version: String,
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub uptime_seconds: i64,
    pub checks: HealthChecks,
    pub performance: HealthPerformance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConcurrencyConfig, DatabaseConfig, ModelsConfig, ResilienceConfig, VectorStoreConfig};
    use crate::gateway::providers::MockProvider;
    use crate::permission::InMemoryPermissionGate;
    use crate::store::vector::FakeVectorStore;

    async fn test_orchestrator() -> ServiceOrchestrator {
        let mut config = ServiceConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.vector_store.vector_size = 8;
        config.concurrency = ConcurrencyConfig {
            max_connections: 4,
            min_connections: 1,
            cache_size: 100,
            cache_ttl_seconds: 60,
            max_workers: 2,
            batch_queue_capacity: 16,
            batch_size: 4,
            batch_timeout_ms: 50,
        };
        config.project.system_principal = "system".to_string();
        config.models.provider_priority = vec!["primary".to_string()];

        let provider = Arc::new(MockProvider::new("primary", 8));
        provider.script_completion(
            r#"{"title":"t","summary":"s","content":"c","keywords":["k"],"quality_score":0.9}"#,
        );

        let permission_gate = Arc::new(InMemoryPermissionGate::new(&config.project));
        permission_gate.grant("alice", "proj-1", PermissionLevel::Write).await;

        let deps = OrchestratorDeps {
            config,
            providers: vec![provider],
            vector_store: Arc::new(FakeVectorStore::new()),
            permission_gate,
        };

        ServiceOrchestrator::start(deps).await.unwrap()
    }

    #[tokio::test]
    async fn store_memory_creates_a_conversation_and_compresses_a_unit() {
        let orchestrator = test_orchestrator().await;
        let outcome = orchestrator
            .store_memory("alice", "proj-1", "remember that we chose sqlite", serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(outcome.project_id, "proj-1");
        assert!(outcome.unit_id.is_some());
        assert!(!outcome.partial);
    }

    #[tokio::test]
    async fn store_memory_denies_without_a_write_grant() {
        let orchestrator = test_orchestrator().await;
        let result = orchestrator
            .store_memory("mallory", "proj-1", "content", serde_json::Value::Null)
            .await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn store_memory_rejects_empty_content() {
        let orchestrator = test_orchestrator().await;
        let result = orchestrator.store_memory("alice", "proj-1", "  ", serde_json::Value::Null).await;
        assert!(matches!(result, Err(ServiceError::InputInvalid(_))));
    }

    #[tokio::test]
    async fn get_conversation_messages_round_trips_after_store_conversation() {
        let orchestrator = test_orchestrator().await;
        let stored = orchestrator
            .store_conversation(
                "alice",
                "proj-1",
                Some("title".to_string()),
                vec![
                    (MessageRole::Human, "what database should we use?".to_string()),
                    (MessageRole::Assistant, "sqlite fits here".to_string()),
                ],
            )
            .await
            .unwrap();

        let fetched = orchestrator
            .get_conversation_messages("alice", &stored.conversation.id, 10)
            .await
            .unwrap();
        assert_eq!(fetched.messages.len(), 2);
        assert_eq!(fetched.conversation.id, stored.conversation.id);
    }

    #[tokio::test]
    async fn health_reports_healthy_with_a_fresh_in_memory_store() {
        let orchestrator = test_orchestrator().await;
        let health = orchestrator.health().await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.checks.relational, "ok");
    }

    #[tokio::test]
    async fn search_memories_requires_read_access_to_the_scoped_project() {
        let orchestrator = test_orchestrator().await;
        let result = orchestrator
            .search_memories("mallory", "database choice", Some("proj-1"), 5, 0.0, true, false)
            .await;
        assert!(matches!(result, Err(ServiceError::PermissionDenied(_))));
    }
}
