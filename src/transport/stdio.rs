// src/transport/stdio.rs
//! Line-delimited JSON-RPC tool server (§6.1, external collaborator):
//! one JSON request per line on stdin, one JSON response per line on
//! stdout. Grounded on the teacher's `mcp/transport.rs` line-reading loop
//! and `mcp/protocol.rs` envelope shapes, turned into a server instead of
//! a client.
//!
//! There is no per-request auth on this surface — a local stdio tool
//! server speaks for whatever single principal launched the process, the
//! same trust boundary the teacher's own MCP server runs under. Callers
//! may set `"user"` in `params` to act as someone else (tests do); when
//! absent, requests run as the orchestrator's configured system principal.

use crate::domain::MessageRole;
use crate::error::ServiceError;
use crate::injector::{InjectionStrategy, Template};
use crate::orchestrator::ServiceOrchestrator;
use crate::retriever::RetrievedMemory;
use crate::transport::protocol::{
    JsonRpcRequest, JsonRpcResponse, ToolDescriptor, ToolResult, APPLICATION_ERROR, INTERNAL_ERROR, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, instrument};

pub async fn serve(orchestrator: Arc<ServiceOrchestrator>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(stdin()).lines();
    let mut out = stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&orchestrator, &line).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        if out.write_all(&encoded).await.is_err() {
            break;
        }
        out.flush().await?;
    }
    Ok(())
}

#[instrument(skip(orchestrator, line))]
async fn handle_line(orchestrator: &ServiceOrchestrator, line: &str) -> JsonRpcResponse {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to parse JSON-RPC request");
            return JsonRpcResponse::err(Value::Null, PARSE_ERROR, format!("parse error: {e}"));
        }
    };

    match dispatch(orchestrator, &request.method, request.params).await {
        Ok(result) => JsonRpcResponse::ok(request.id, result),
        Err(DispatchError::UnknownMethod) => {
            JsonRpcResponse::err(request.id, METHOD_NOT_FOUND, format!("unknown method '{}'", request.method))
        }
        Err(DispatchError::Application(message)) => JsonRpcResponse::err(request.id, APPLICATION_ERROR, message),
        Err(DispatchError::Internal(message)) => JsonRpcResponse::err(request.id, INTERNAL_ERROR, message),
    }
}

enum DispatchError {
    UnknownMethod,
    /// Caller-fixable errors (bad input, missing grant): `ServiceError`'s
    /// `InputInvalid`/`PermissionDenied`, surfaced as a distinct code
    /// rather than folded into `Internal`.
    Application(String),
    Internal(String),
}

impl From<ServiceError> for DispatchError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InputInvalid(_) | ServiceError::PermissionDenied(_) => {
                DispatchError::Application(err.to_string())
            }
            other => DispatchError::Internal(other.to_string()),
        }
    }
}

async fn dispatch(orchestrator: &ServiceOrchestrator, method: &str, params: Value) -> Result<Value, DispatchError> {
    match method {
        "ping" => Ok(json!("pong")),
        "initialize" => Ok(initialize_result()),
        "tools/list" => Ok(json!({ "tools": tool_catalog() })),
        "tools/call" => tools_call(orchestrator, params).await,
        "memory_search" => memory_search(orchestrator, params).await,
        "memory_inject" => memory_inject(orchestrator, params).await,
        "memory_store" => memory_store(orchestrator, params).await,
        "conversation_store" => conversation_store(orchestrator, params).await,
        "get_recent_conversations" => get_recent_conversations(orchestrator, params).await,
        "get_conversation_messages" => get_conversation_messages(orchestrator, params).await,
        "memory_health" => Ok(serde_json::to_value(orchestrator.health().await).unwrap_or(Value::Null)),
        _ => Err(DispatchError::UnknownMethod),
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "serverInfo": { "name": "memoryd", "version": env!("CARGO_PKG_VERSION") },
        "capabilities": { "tools": { "listChanged": false } },
    })
}

fn tool_catalog() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "memory_search",
            description: "Search stored memories by semantic + keyword relevance",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer"},
                    "project_filter": {"type": "string"},
                },
                "required": ["query"],
            }),
        },
        ToolDescriptor {
            name: "memory_inject",
            description: "Augment a prompt with relevant memories",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "original_prompt": {"type": "string"},
                    "query_text": {"type": "string"},
                    "mode": {"type": "string", "enum": ["conservative", "balanced", "comprehensive"]},
                    "max_tokens": {"type": "integer"},
                },
                "required": ["original_prompt"],
            }),
        },
        ToolDescriptor {
            name: "memory_store",
            description: "Store a single piece of content as a durable memory",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string"},
                    "project_id": {"type": "string"},
                    "metadata": {"type": "object"},
                },
                "required": ["content", "project_id"],
            }),
        },
        ToolDescriptor {
            name: "conversation_store",
            description: "Store a full multi-turn conversation",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "messages": {"type": "array"},
                    "project_id": {"type": "string"},
                    "title": {"type": "string"},
                },
                "required": ["messages", "project_id"],
            }),
        },
        ToolDescriptor {
            name: "get_recent_conversations",
            description: "List recently active conversations",
            input_schema: json!({
                "type": "object",
                "properties": { "limit": {"type": "integer"} },
            }),
        },
        ToolDescriptor {
            name: "get_conversation_messages",
            description: "Fetch a conversation and its messages",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "conversation_id": {"type": "string"},
                    "limit": {"type": "integer"},
                },
                "required": ["conversation_id"],
            }),
        },
        ToolDescriptor {
            name: "memory_health",
            description: "Report service liveness and performance",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

async fn tools_call(orchestrator: &ServiceOrchestrator, params: Value) -> Result<Value, DispatchError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Internal("tools/call requires 'name'".to_string()))?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    let result = dispatch(orchestrator, name, arguments).await?;
    Ok(serde_json::to_value(ToolResult::text(&result)).unwrap_or(Value::Null))
}

fn principal(params: &Value) -> String {
    params
        .get("user")
        .and_then(Value::as_str)
        .unwrap_or("system")
        .to_string()
}

fn str_field<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, DispatchError> {
    str_field(params, key).ok_or_else(|| DispatchError::Internal(format!("missing required field '{key}'")))
}

fn usize_field(params: &Value, key: &str, default: usize) -> usize {
    params.get(key).and_then(Value::as_u64).map(|v| v as usize).unwrap_or(default)
}

fn i64_field(params: &Value, key: &str, default: i64) -> i64 {
    params.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn render_memory(memory: &RetrievedMemory) -> Value {
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

async fn memory_search(orchestrator: &ServiceOrchestrator, params: Value) -> Result<Value, DispatchError> {
    let query = required_str(&params, "query")?;
    let limit = usize_field(&params, "limit", 10);
    let project_filter = str_field(&params, "project_filter");
    let user = principal(&params);

    let start = Instant::now();
    let results = orchestrator
        .search_memories(&user, query, project_filter, limit, 0.0, true, true)
        .await?;
    Ok(json!({
        "results": results.iter().map(render_memory).collect::<Vec<_>>(),
        "count": results.len(),
        "search_time_ms": start.elapsed().as_millis(),
    }))
}

fn parse_strategy(s: &str) -> Option<InjectionStrategy> {
    match s {
        "conservative" => Some(InjectionStrategy::Conservative),
        "balanced" => Some(InjectionStrategy::Balanced),
        "comprehensive" => Some(InjectionStrategy::Comprehensive),
        _ => None,
    }
}

async fn memory_inject(orchestrator: &ServiceOrchestrator, params: Value) -> Result<Value, DispatchError> {
    let original_prompt = required_str(&params, "original_prompt")?;
    let query_text = str_field(&params, "query_text");
    let mode = str_field(&params, "mode").and_then(parse_strategy);
    let max_tokens = i64_field(
        &params,
        "max_tokens",
        mode.unwrap_or_else(|| InjectionStrategy::choose_by_query_len(query_text.unwrap_or(original_prompt)))
            .params()
            .token_budget,
    );
    let project_id = str_field(&params, "project_id");
    let user = principal(&params);

    let start = Instant::now();
    let outcome = orchestrator
        .inject_context(&user, original_prompt, query_text, mode, max_tokens, project_id, Template::Standard)
        .await?;
    Ok(json!({
        "enhanced_prompt": outcome.augmented_prompt,
        "injected_memories": outcome.used_memories.iter().map(render_memory).collect::<Vec<_>>(),
        "tokens_used": outcome.tokens_used,
        "processing_time_ms": start.elapsed().as_millis(),
    }))
}

async fn memory_store(orchestrator: &ServiceOrchestrator, params: Value) -> Result<Value, DispatchError> {
    let content = required_str(&params, "content")?;
    let project_id = required_str(&params, "project_id")?;
    let metadata = params.get("metadata").cloned().unwrap_or(Value::Null);
    let user = principal(&params);

    let outcome = orchestrator.store_memory(&user, project_id, content, metadata).await?;
    Ok(json!({ "conversation_id": outcome.conversation_id, "project_id": outcome.project_id }))
}

fn parse_turns(params: &Value) -> Result<Vec<(MessageRole, String)>, DispatchError> {
    let raw = params
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| DispatchError::Internal("missing required field 'messages'".to_string()))?;

    raw.iter()
        .map(|m| {
            let role = m
                .get("role")
                .and_then(Value::as_str)
                .and_then(MessageRole::parse)
                .ok_or_else(|| DispatchError::Internal("each message needs a valid 'role'".to_string()))?;
            let content = m
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| DispatchError::Internal("each message needs 'content'".to_string()))?;
            Ok((role, content.to_string()))
        })
        .collect()
}

async fn conversation_store(orchestrator: &ServiceOrchestrator, params: Value) -> Result<Value, DispatchError> {
    let project_id = required_str(&params, "project_id")?;
    let title = str_field(&params, "title").map(str::to_string);
    let turns = parse_turns(&params)?;
    let user = principal(&params);

    let outcome = orchestrator.store_conversation(&user, project_id, title, turns).await?;
    Ok(json!({ "conversation_id": outcome.conversation.id, "project_id": outcome.conversation.project_id }))
}

/// §6.1's output shape names a `last_message` field the relational layer
/// has no direct query for; reusing the façade's own
/// `get_conversation_messages` (bounded by the conversation's own
/// `message_count`) avoids adding a store method with no other caller.
async fn get_recent_conversations(orchestrator: &ServiceOrchestrator, params: Value) -> Result<Value, DispatchError> {
    let limit = i64_field(&params, "limit", 20);
    let user = principal(&params);

    let conversations = orchestrator.get_recent_conversations(&user, limit).await?;
    let mut out = Vec::with_capacity(conversations.len());
    for conversation in &conversations {
        let fetched = orchestrator
            .get_conversation_messages(&user, &conversation.id, conversation.message_count.max(1))
            .await?;
        let last_message = fetched.messages.last().map(|m| m.content.clone());
        out.push(json!({
            "id": conversation.id,
            "title": conversation.title,
            "project_name": conversation.project_id,
            "last_activity": conversation.last_activity_at.to_rfc3339(),
            "message_count": conversation.message_count,
            "last_message": last_message,
        }));
    }
    Ok(json!(out))
}

async fn get_conversation_messages(orchestrator: &ServiceOrchestrator, params: Value) -> Result<Value, DispatchError> {
    let conversation_id = required_str(&params, "conversation_id")?;
    let limit = i64_field(&params, "limit", 50);
    let user = principal(&params);

    let fetched = orchestrator.get_conversation_messages(&user, conversation_id, limit).await?;
    Ok(serde_json::to_value(fetched).unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConcurrencyConfig, ServiceConfig};
    use crate::gateway::providers::MockProvider;
    use crate::orchestrator::OrchestratorDeps;
    use crate::permission::{InMemoryPermissionGate, PermissionLevel};
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
    async fn ping_returns_pong() {
        let orchestrator = test_orchestrator().await;
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let response = handle_line(&orchestrator, line).await;
        assert_eq!(response.result, Some(json!("pong")));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn unparseable_line_returns_parse_error() {
        let orchestrator = test_orchestrator().await;
        let response = handle_line(&orchestrator, "not json").await;
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let orchestrator = test_orchestrator().await;
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"nonexistent"}"#;
        let response = handle_line(&orchestrator, line).await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn memory_store_round_trips_through_the_line_protocol() {
        let orchestrator = test_orchestrator().await;
        let line = r#"{"jsonrpc":"2.0","id":7,"method":"memory_store","params":{"user":"alice","content":"remember this","project_id":"proj-1"}}"#;
        let response = handle_line(&orchestrator, line).await;
        assert_eq!(response.id, json!(7));
        let result = response.result.unwrap();
        assert_eq!(result["project_id"], json!("proj-1"));
    }

    #[tokio::test]
    async fn permission_denied_surfaces_as_an_application_error_not_a_panic() {
        let orchestrator = test_orchestrator().await;
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"memory_store","params":{"user":"mallory","content":"x","project_id":"proj-1"}}"#;
        let response = handle_line(&orchestrator, line).await;
        assert_eq!(response.error.unwrap().code, APPLICATION_ERROR);
    }

    #[tokio::test]
    async fn tools_list_reports_every_named_tool() {
        let orchestrator = test_orchestrator().await;
        let response = handle_line(&orchestrator, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        let tools = response.result.unwrap();
        assert_eq!(tools["tools"].as_array().unwrap().len(), tool_catalog().len());
    }
}
