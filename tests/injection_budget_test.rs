// tests/injection_budget_test.rs
// S3: a tight max_tokens bound forces the injector to select only a few
// of the available memories, and law 8: no matches leaves the prompt
// byte-equal to the original.

use memoryd::cache::Cache;
use memoryd::config::{ModelsConfig, ResilienceConfig};
use memoryd::domain::{new_id, Conversation, ConversationStatus, MemoryUnit, Message, MessageRole, Project, UnitType};
use memoryd::gateway::providers::MockProvider;
use memoryd::gateway::{ModelGateway, ProviderRegistry};
use memoryd::injector::{ContextInjector, InjectParams, InjectionStrategy, Template};
use memoryd::pool::ConnectionPool;
use memoryd::retriever::{RetrievedMemory, SemanticRetriever};
use memoryd::store::vector::FakeVectorStore;
use memoryd::store::MemoryStore;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;

async fn build_store() -> (MemoryStore, Arc<ModelGateway>) {
    let pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
    let provider = Arc::new(MockProvider::new("primary", 16));
    let mut registry = ProviderRegistry::new();
    registry.register(provider);
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
    (store, gateway)
}

/// A ~300-token unit (1200 chars, matching the tokenizer's chars/4
/// heuristic) about a shared topic so every stored unit is a retrieval
/// candidate for the same query.
async fn store_big_unit(store: &MemoryStore, index: usize) {
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
    let body = format!("budget planning notes entry {index} ").repeat(30);
    let message = Message {
        id: new_id(),
        conversation_id: conversation.id.clone(),
        sequence_number: 0,
        role: MessageRole::Human,
        content: body.clone(),
        token_count: 1,
        created_at: chrono::Utc::now(),
        metadata: serde_json::Value::Null,
        content_hash: Message::content_hash(&body),
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
        title: format!("budget note {index}"),
        summary: format!("budget planning summary {index}"),
        content: body,
        keywords: vec![format!("kw{index}")],
        relevance_score: 0.0,
        quality_score: 0.8,
        token_count: 300,
        created_at: chrono::Utc::now(),
        expires_at: None,
        is_active: true,
        metadata: serde_json::Value::Null,
    };
    store.store_memory_unit(&unit).await.unwrap();
}

#[tokio::test]
async fn s3_tight_max_tokens_bounds_the_selected_memories() {
    let (store, gateway) = build_store().await;
    for i in 0..10 {
        store_big_unit(&store, i).await;
    }

    let result_cache: Cache<Vec<RetrievedMemory>> = Cache::new(100, Duration::from_secs(60));
    let render_cache: Cache<String> = Cache::new(100, Duration::from_secs(60));
    let retriever = SemanticRetriever::new(&gateway, &store, &result_cache);
    let injector = ContextInjector::new(&retriever, &render_cache);

    let outcome = injector
        .inject(InjectParams {
            original_prompt: "what were the budget planning notes?",
            query_text: Some("budget planning notes"),
            mode: Some(InjectionStrategy::Comprehensive),
            max_tokens: 500,
            project_id: Some("p1"),
            template: Template::Standard,
        })
        .await
        .unwrap();

    assert!(outcome.used_memories.len() <= 2, "expected at most 2 units within a 500-token budget of ~300-token units");
    assert!(outcome.tokens_used <= 500, "tokens_used must respect max_tokens");
}

#[tokio::test]
async fn law_8_inject_with_no_matches_returns_prompt_byte_equal_to_original() {
    let (store, gateway) = build_store().await;
    // Conservative requires min_score=0.8; nothing is stored, so no
    // candidate can ever clear that bar.
    let result_cache: Cache<Vec<RetrievedMemory>> = Cache::new(100, Duration::from_secs(60));
    let render_cache: Cache<String> = Cache::new(100, Duration::from_secs(60));
    let retriever = SemanticRetriever::new(&gateway, &store, &result_cache);
    let injector = ContextInjector::new(&retriever, &render_cache);

    let original = "What's the status of the migration?";
    let outcome = injector
        .inject(InjectParams {
            original_prompt: original,
            query_text: None,
            mode: Some(InjectionStrategy::Conservative),
            max_tokens: 1000,
            project_id: Some("p1"),
            template: Template::Standard,
        })
        .await
        .unwrap();

    assert_eq!(outcome.augmented_prompt, original);
    assert!(outcome.used_memories.is_empty());
    assert_eq!(outcome.tokens_used, 0);
}
