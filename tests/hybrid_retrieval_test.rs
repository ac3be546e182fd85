// tests/hybrid_retrieval_test.rs
// Hybrid vector+keyword merge (S1), rerank-imposed ordering (S6), and the
// top-k truncation boundary (invariant 11) at the SemanticRetriever level.

use memoryd::cache::Cache;
use memoryd::config::{ModelsConfig, ResilienceConfig};
use memoryd::domain::{new_id, Conversation, ConversationStatus, MemoryUnit, Message, MessageRole, Project, UnitType};
use memoryd::gateway::providers::MockProvider;
use memoryd::gateway::{ModelGateway, ProviderRegistry};
use memoryd::pool::ConnectionPool;
use memoryd::retriever::{RetrieveParams, RetrievedMemory, SemanticRetriever};
use memoryd::store::vector::FakeVectorStore;
use memoryd::store::MemoryStore;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: MemoryStore,
    gateway: Arc<ModelGateway>,
    provider: Arc<MockProvider>,
}

async fn build_harness() -> Harness {
    let pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
    let provider = Arc::new(MockProvider::new("primary", 16));
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());
    let gateway = Arc::new(ModelGateway::new(
        registry,
        ModelsConfig::default(),
        ResilienceConfig::default(),
        16,
    ));
    let vector_store: Arc<dyn memoryd::store::vector::VectorStore> = Arc::new(FakeVectorStore::new());
    let store = MemoryStore::new(
        pool,
        vector_store,
        gateway.clone(),
        16,
        4,
        Duration::from_secs(60),
        100,
        Duration::from_secs(60),
        ConnectionPool::unbounded_admission(),
    );
    store.initialize_schema().await.unwrap();
    store
        .ensure_project(&Project {
            id: "p1".to_string(),
            name: "Proj".to_string(),
            created_at: chrono::Utc::now(),
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();
    Harness { store, gateway, provider }
}

/// Stores one conversation carrying `content` as a single compressed
/// memory unit, going through the real dual-write path so the vector
/// half is populated the same way production traffic would populate it.
async fn store_unit(store: &MemoryStore, title: &str, content: &str) -> MemoryUnit {
    let conversation = Conversation {
        id: new_id(),
        project_id: "p1".to_string(),
        title: None,
        started_at: chrono::Utc::now(),
        last_activity_at: chrono::Utc::now(),
        message_count: 1,
        token_count: 1,
        status: ConversationStatus::Pending,
    };
    let message = Message {
        id: new_id(),
        conversation_id: conversation.id.clone(),
        sequence_number: 0,
        role: MessageRole::Human,
        content: content.to_string(),
        token_count: 1,
        created_at: chrono::Utc::now(),
        metadata: serde_json::Value::Null,
        content_hash: Message::content_hash(content),
    };
    store
        .store_conversation_batch(&[(conversation.clone(), vec![message])])
        .await
        .unwrap();

    let unit = MemoryUnit {
        id: new_id(),
        conversation_id: conversation.id,
        project_id: "p1".to_string(),
        unit_type: UnitType::Conversation,
        title: title.to_string(),
        summary: title.to_string(),
        content: content.to_string(),
        keywords: vec![],
        relevance_score: 0.0,
        quality_score: 0.8,
        token_count: 10,
        created_at: chrono::Utc::now(),
        expires_at: None,
        is_active: true,
        metadata: serde_json::Value::Null,
    };
    store.store_memory_unit(&unit).await.unwrap();
    unit
}

#[tokio::test]
async fn s1_vector_search_surfaces_the_matching_unit() {
    let harness = build_harness().await;
    store_unit(
        &harness.store,
        "backoff strategy",
        "Use base*2^n + jitter, capped at max, to implement exponential backoff.",
    )
    .await;
    store_unit(&harness.store, "unrelated", "The weather in Oslo is mild today.").await;

    let cache: Cache<Vec<RetrievedMemory>> = Cache::new(100, Duration::from_secs(60));
    let retriever = SemanticRetriever::new(&harness.gateway, &harness.store, &cache);

    let results = retriever
        .retrieve(RetrieveParams {
            query: "backoff jitter",
            project_id: Some("p1"),
            limit: 5,
            min_score: 0.1,
            hybrid: true,
            rerank: false,
            unit_types: None,
        })
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results[0].unit.content.contains("backoff"));
}

#[tokio::test]
async fn s6_scripted_rerank_scores_determine_final_order() {
    let harness = build_harness().await;
    for i in 0..5 {
        store_unit(
            &harness.store,
            &format!("doc {i}"),
            &format!("memory unit number {i} about rerank ordering"),
        )
        .await;
    }

    // Rerank only fires when there are more than 3 candidates; 5 units
    // with a generous min_score satisfies that.
    harness.provider.script_rerank(vec![0.9, 0.7, 0.5, 0.3, 0.1]);

    let cache: Cache<Vec<RetrievedMemory>> = Cache::new(100, Duration::from_secs(60));
    let retriever = SemanticRetriever::new(&harness.gateway, &harness.store, &cache);

    let results = retriever
        .retrieve(RetrieveParams {
            query: "rerank ordering",
            project_id: Some("p1"),
            limit: 5,
            min_score: 0.0,
            hybrid: false,
            rerank: true,
            unit_types: None,
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
    assert_eq!(scores, vec![0.9, 0.7, 0.5, 0.3, 0.1], "results must be ordered by the scripted rerank scores regardless of vector arrival order");
}

#[tokio::test]
async fn invariant_11_retrieve_never_returns_more_than_the_requested_limit() {
    let harness = build_harness().await;
    for i in 0..8 {
        store_unit(&harness.store, &format!("doc {i}"), &format!("entry {i} shares a common topic keyword")).await;
    }

    let cache: Cache<Vec<RetrievedMemory>> = Cache::new(100, Duration::from_secs(60));
    let retriever = SemanticRetriever::new(&harness.gateway, &harness.store, &cache);

    let results = retriever
        .retrieve(RetrieveParams {
            query: "common topic keyword",
            project_id: Some("p1"),
            limit: 5,
            min_score: 0.0,
            hybrid: false,
            rerank: false,
            unit_types: None,
        })
        .await
        .unwrap();

    assert!(results.len() <= 5);
}
