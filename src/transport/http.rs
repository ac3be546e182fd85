// src/transport/http.rs
//! HTTP API (§6.2, external collaborator). Grounded on the teacher's
//! `api/http/router.rs` composition style and `api/http/health.rs`'s
//! liveness handler, with its `api/error.rs` `ApiError`/`ApiResult`
//! pattern adapted to map `ServiceError` variants onto status codes
//! instead of ad hoc `.into_api_error(...)` call sites.

use crate::domain::MessageRole;
use crate::error::ServiceError;
use crate::injector::{InjectionStrategy, Template};
use crate::orchestrator::ServiceOrchestrator;
use crate::retriever::RetrievedMemory;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": true, "message": self.message }))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::InputInvalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ServiceError::ParentMissing(_) => StatusCode::NOT_FOUND,
            ServiceError::ProviderTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::ProviderFatal(_) => StatusCode::BAD_GATEWAY,
            ServiceError::StorePartial { .. } => StatusCode::OK,
            ServiceError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(orchestrator: Arc<ServiceOrchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/memory/store", post(memory_store))
        .route("/memory/search", post(memory_search))
        .route("/memory/inject", post(memory_inject))
        .route("/conversation/store", post(conversation_store))
        .route("/projects", get(list_projects).post(create_project))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(CorsLayer::permissive()),
        )
        .with_state(orchestrator)
}

/// Every handler authorizes as the system principal: the HTTP surface
/// has no caller-identity header in §6.2, so it is trusted the way the
/// teacher's own REST layer trusts whatever sits in front of it
/// (a gateway, a reverse proxy) to have already authenticated the caller.
const HTTP_PRINCIPAL: &str = "system";

fn render_memory(memory: &RetrievedMemory) -> serde_json::Value {
    json!({
        "id": memory.unit.id,
        "title": memory.unit.title,
        "summary": memory.unit.summary,
        "content": memory.unit.content,
        "unit_type": memory.unit.unit_type.as_str(),
        "keywords": memory.unit.keywords,
        "score": memory.score,
        "match_source": memory.match_source.as_str(),
        "created_at": memory.unit.created_at.to_rfc3339(),
    })
}

async fn health(State(orchestrator): State<Arc<ServiceOrchestrator>>) -> impl IntoResponse {
    let health = orchestrator.health().await;
    let status = match health.status.as_str() {
        "healthy" => StatusCode::OK,
        "degraded" => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}

#[derive(Debug, Deserialize)]
struct MemoryStoreRequest {
    content: String,
    project_id: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

async fn memory_store(
    State(orchestrator): State<Arc<ServiceOrchestrator>>,
    Json(req): Json<MemoryStoreRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = orchestrator
        .store_memory(HTTP_PRINCIPAL, &req.project_id, &req.content, req.metadata)
        .await?;
    Ok(Json(json!({
        "success": true,
        "conversation_id": outcome.conversation_id,
        "project_id": outcome.project_id,
    })))
}

#[derive(Debug, Deserialize)]
struct MemorySearchRequest {
    query: String,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    min_score: Option<f32>,
}

async fn memory_search(
    State(orchestrator): State<Arc<ServiceOrchestrator>>,
    Json(req): Json<MemorySearchRequest>,
) -> ApiResult<impl IntoResponse> {
    let start = Instant::now();
    let limit = req.limit.unwrap_or(10);
    let results = orchestrator
        .search_memories(
            HTTP_PRINCIPAL,
            &req.query,
            req.project_id.as_deref(),
            limit,
            req.min_score.unwrap_or(0.0),
            true,
            true,
        )
        .await?;
    Ok(Json(json!({
        "query": req.query,
        "results": results.iter().map(render_memory).collect::<Vec<_>>(),
        "count": results.len(),
        "search_time_ms": start.elapsed().as_millis(),
    })))
}

#[derive(Debug, Deserialize)]
struct MemoryInjectRequest {
    original_prompt: String,
    #[serde(default)]
    query_text: Option<String>,
    #[serde(default)]
    context_hint: Option<String>,
    #[serde(default)]
    injection_mode: Option<String>,
    #[serde(default)]
    max_tokens: Option<i64>,
    #[serde(default)]
    project_id: Option<String>,
}

fn parse_strategy(s: &str) -> Option<InjectionStrategy> {
    match s {
        "conservative" => Some(InjectionStrategy::Conservative),
        "balanced" => Some(InjectionStrategy::Balanced),
        "comprehensive" => Some(InjectionStrategy::Comprehensive),
        _ => None,
    }
}

async fn memory_inject(
    State(orchestrator): State<Arc<ServiceOrchestrator>>,
    Json(req): Json<MemoryInjectRequest>,
) -> ApiResult<impl IntoResponse> {
    let start = Instant::now();
    // `context_hint`, when present, narrows the retrieval query without
    // replacing the prompt that gets augmented — same role `query_text`
    // plays on the JSON-RPC surface.
    let query_text = req.query_text.as_deref().or(req.context_hint.as_deref());
    let mode = req.injection_mode.as_deref().and_then(parse_strategy);
    let max_tokens = req.max_tokens.unwrap_or_else(|| {
        mode.unwrap_or_else(|| InjectionStrategy::choose_by_query_len(query_text.unwrap_or(&req.original_prompt)))
            .params()
            .token_budget
    });

    let outcome = orchestrator
        .inject_context(
            HTTP_PRINCIPAL,
            &req.original_prompt,
            query_text,
            mode,
            max_tokens,
            req.project_id.as_deref(),
            Template::Standard,
        )
        .await?;

    Ok(Json(json!({
        "enhanced_prompt": outcome.augmented_prompt,
        "injected_memories": outcome.used_memories.iter().map(render_memory).collect::<Vec<_>>(),
        "tokens_used": outcome.tokens_used,
        "processing_time_ms": start.elapsed().as_millis(),
    })))
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ConversationStoreRequest {
    messages: Vec<WireMessage>,
    project_id: String,
    #[serde(default)]
    title: Option<String>,
}

async fn conversation_store(
    State(orchestrator): State<Arc<ServiceOrchestrator>>,
    Json(req): Json<ConversationStoreRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut turns = Vec::with_capacity(req.messages.len());
    for message in req.messages {
        let role = MessageRole::parse(&message.role)
            .ok_or_else(|| ServiceError::InputInvalid(format!("unknown role '{}'", message.role)))?;
        turns.push((role, message.content));
    }

    let outcome = orchestrator
        .store_conversation(HTTP_PRINCIPAL, &req.project_id, req.title, turns)
        .await?;
    Ok(Json(json!({
        "success": true,
        "conversation_id": outcome.conversation.id,
        "project_id": outcome.conversation.project_id,
    })))
}

async fn list_projects(State(orchestrator): State<Arc<ServiceOrchestrator>>) -> ApiResult<impl IntoResponse> {
    let projects = orchestrator.list_projects(HTTP_PRINCIPAL).await?;
    Ok(Json(json!({ "count": projects.len(), "projects": projects })))
}

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    project_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

async fn create_project(
    State(orchestrator): State<Arc<ServiceOrchestrator>>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    let metadata = match req.description {
        Some(description) => json!({ "description": description }),
        None => serde_json::Value::Null,
    };
    let project = orchestrator
        .create_project(HTTP_PRINCIPAL, &req.project_id, req.name, metadata)
        .await?;
    Ok(Json(json!({ "success": true, "project": project })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConcurrencyConfig, ServiceConfig};
    use crate::gateway::providers::MockProvider;
    use crate::orchestrator::OrchestratorDeps;
    use crate::permission::InMemoryPermissionGate;
    use crate::store::vector::FakeVectorStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_router() -> Router {
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
        let deps = OrchestratorDeps {
            config,
            providers: vec![provider],
            vector_store: Arc::new(FakeVectorStore::new()),
            permission_gate,
        };
        let orchestrator = Arc::new(ServiceOrchestrator::start(deps).await.unwrap());
        router(orchestrator)
    }

    #[tokio::test]
    async fn health_endpoint_reports_200_when_healthy() {
        let app = test_router().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn memory_store_rejects_empty_content_with_400() {
        let app = test_router().await;
        let body = json!({"content": "", "project_id": "proj-1"}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/memory/store")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn memory_store_then_search_round_trips() {
        let app = test_router().await;
        let store_body = json!({"content": "sqlite is our database", "project_id": "proj-1"}).to_string();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/memory/store")
                    .header("content-type", "application/json")
                    .body(Body::from(store_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let search_body = json!({"query": "database", "project_id": "proj-1"}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/memory/search")
                    .header("content-type", "application/json")
                    .body(Body::from(search_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn projects_list_then_create_round_trips() {
        let app = test_router().await;
        let create_body = json!({"project_id": "proj-2", "name": "Proj Two"}).to_string();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/projects")
                    .header("content-type", "application/json")
                    .body(Body::from(create_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/projects").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
