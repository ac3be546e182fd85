// src/store/relational.rs
//! The relational half of the Dual-Write Store (§4.7): the source of
//! truth for `projects`, `conversations`, `messages`, `memory_units`.
//! Schema applied via `CREATE TABLE IF NOT EXISTS` at startup, same as
//! the teacher's `build/tracker.rs` bootstraps its own tables, and
//! queried with runtime-checked `sqlx::query`/`query_as` rather than the
//! compile-time macro (no `DATABASE_URL` available at build time here).

use crate::domain::{
    Conversation, ConversationStatus, MemoryUnit, Message, MessageRole, Project, UnitType,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, Row, SqlitePool};
use tracing::warn;

pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id),
            title TEXT,
            started_at INTEGER NOT NULL,
            last_activity_at INTEGER NOT NULL,
            message_count INTEGER NOT NULL DEFAULT 0,
            token_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending'
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_project ON conversations(project_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_activity ON conversations(last_activity_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sequence_number INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            content_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conv_seq ON messages(conversation_id, sequence_number)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_content_hash ON messages(content_hash)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memory_units (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            project_id TEXT NOT NULL,
            unit_type TEXT NOT NULL,
            title TEXT NOT NULL,
            summary TEXT NOT NULL,
            content TEXT NOT NULL,
            keywords TEXT NOT NULL DEFAULT '[]',
            relevance_score REAL NOT NULL DEFAULT 0,
            quality_score REAL NOT NULL DEFAULT 0,
            token_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            metadata TEXT NOT NULL DEFAULT 'null'
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_conversation ON memory_units(conversation_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_units_project_created ON memory_units(project_id, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_active ON memory_units(is_active)")
        .execute(pool)
        .await?;

    Ok(())
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(raw: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(raw, 0).single().unwrap_or_else(|| {
        warn!(raw, "invalid stored timestamp, falling back to epoch");
        DateTime::UNIX_EPOCH
    })
}

#[derive(FromRow)]
struct ConversationRow {
    id: String,
    project_id: String,
    title: Option<String>,
    started_at: i64,
    last_activity_at: i64,
    message_count: i64,
    token_count: i64,
    status: String,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            project_id: row.project_id,
            title: row.title,
            started_at: from_ts(row.started_at),
            last_activity_at: from_ts(row.last_activity_at),
            message_count: row.message_count,
            token_count: row.token_count,
            status: match row.status.as_str() {
                "compressed" => ConversationStatus::Compressed,
                "failed" => ConversationStatus::Failed,
                _ => ConversationStatus::Pending,
            },
        }
    }
}

fn status_str(status: ConversationStatus) -> &'static str {
    match status {
        ConversationStatus::Pending => "pending",
        ConversationStatus::Compressed => "compressed",
        ConversationStatus::Failed => "failed",
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    sequence_number: i64,
    role: String,
    content: String,
    token_count: i64,
    created_at: i64,
    metadata: String,
    content_hash: String,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            conversation_id: row.conversation_id,
            sequence_number: row.sequence_number,
            role: MessageRole::parse(&row.role).unwrap_or(MessageRole::Human),
            content: row.content,
            token_count: row.token_count,
            created_at: from_ts(row.created_at),
            metadata: serde_json::from_str(&row.metadata).unwrap_or(serde_json::Value::Null),
            content_hash: row.content_hash,
        }
    }
}

#[derive(FromRow)]
struct MemoryUnitRow {
    id: String,
    conversation_id: String,
    project_id: String,
    unit_type: String,
    title: String,
    summary: String,
    content: String,
    keywords: String,
    relevance_score: f64,
    quality_score: f64,
    token_count: i64,
    created_at: i64,
    expires_at: Option<i64>,
    is_active: i64,
    metadata: String,
}

impl From<MemoryUnitRow> for MemoryUnit {
    fn from(row: MemoryUnitRow) -> Self {
        MemoryUnit {
            id: row.id,
            conversation_id: row.conversation_id,
            project_id: row.project_id,
            unit_type: UnitType::parse(&row.unit_type).unwrap_or(UnitType::Conversation),
            title: row.title,
            summary: row.summary,
            content: row.content,
            keywords: serde_json::from_str(&row.keywords).unwrap_or_default(),
            relevance_score: row.relevance_score as f32,
            quality_score: row.quality_score as f32,
            token_count: row.token_count,
            created_at: from_ts(row.created_at),
            expires_at: row.expires_at.map(from_ts),
            is_active: row.is_active != 0,
            metadata: serde_json::from_str(&row.metadata).unwrap_or(serde_json::Value::Null),
        }
    }
}

pub async fn insert_project(pool: &SqlitePool, project: &Project) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO projects (id, name, created_at, metadata) VALUES (?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(ts(project.created_at))
    .bind(project.metadata.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn project_exists(pool: &SqlitePool, project_id: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

#[derive(FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    created_at: i64,
    metadata: String,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            name: row.name,
            created_at: from_ts(row.created_at),
            metadata: serde_json::from_str(&row.metadata).unwrap_or(serde_json::Value::Null),
        }
    }
}

pub async fn list_projects(pool: &SqlitePool) -> Result<Vec<Project>, sqlx::Error> {
    let rows: Vec<ProjectRow> = sqlx::query_as("SELECT id, name, created_at, metadata FROM projects ORDER BY name ASC")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(Project::from).collect())
}

pub async fn conversation_exists<'e, E>(executor: E, conversation_id: &str) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query("SELECT 1 FROM conversations WHERE id = ?")
        .bind(conversation_id)
        .fetch_optional(executor)
        .await?;
    Ok(row.is_some())
}

pub async fn insert_conversation<'e, E>(
    executor: E,
    conversation: &Conversation,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO conversations
           (id, project_id, title, started_at, last_activity_at, message_count, token_count, status)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&conversation.id)
    .bind(&conversation.project_id)
    .bind(&conversation.title)
    .bind(ts(conversation.started_at))
    .bind(ts(conversation.last_activity_at))
    .bind(conversation.message_count)
    .bind(conversation.token_count)
    .bind(status_str(conversation.status))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn insert_message<'e, E>(executor: E, message: &Message) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO messages
           (id, conversation_id, sequence_number, role, content, token_count, created_at, metadata, content_hash)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&message.id)
    .bind(&message.conversation_id)
    .bind(message.sequence_number)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(message.token_count)
    .bind(ts(message.created_at))
    .bind(message.metadata.to_string())
    .bind(&message.content_hash)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn insert_memory_unit<'e, E>(executor: E, unit: &MemoryUnit) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO memory_units
           (id, conversation_id, project_id, unit_type, title, summary, content, keywords,
            relevance_score, quality_score, token_count, created_at, expires_at, is_active, metadata)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&unit.id)
    .bind(&unit.conversation_id)
    .bind(&unit.project_id)
    .bind(unit.unit_type.as_str())
    .bind(&unit.title)
    .bind(&unit.summary)
    .bind(&unit.content)
    .bind(serde_json::to_string(&unit.keywords).unwrap_or_else(|_| "[]".to_string()))
    .bind(unit.relevance_score as f64)
    .bind(unit.quality_score as f64)
    .bind(unit.token_count)
    .bind(unit.created_at.timestamp())
    .bind(unit.expires_at.map(|e| e.timestamp()))
    .bind(unit.is_active as i64)
    .bind(unit.metadata.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn set_memory_unit_active(
    pool: &SqlitePool,
    unit_id: &str,
    is_active: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE memory_units SET is_active = ? WHERE id = ?")
        .bind(is_active as i64)
        .bind(unit_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// §4.7.4: advance a conversation to `compressed` only once a unit exists.
pub async fn mark_conversation_compressed(
    pool: &SqlitePool,
    conversation_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE conversations SET status = 'compressed' WHERE id = ?")
        .bind(conversation_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_recent_conversations(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<Conversation>, sqlx::Error> {
    let rows: Vec<ConversationRow> = sqlx::query_as(
        "SELECT id, project_id, title, started_at, last_activity_at, message_count, token_count, status
         FROM conversations ORDER BY last_activity_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Conversation::from).collect())
}

pub async fn get_conversation(pool: &SqlitePool, conversation_id: &str) -> Result<Option<Conversation>, sqlx::Error> {
    let row: Option<ConversationRow> = sqlx::query_as(
        "SELECT id, project_id, title, started_at, last_activity_at, message_count, token_count, status
         FROM conversations WHERE id = ?",
    )
    .bind(conversation_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Conversation::from))
}

pub async fn get_conversation_messages(
    pool: &SqlitePool,
    conversation_id: &str,
    limit: i64,
) -> Result<Vec<Message>, sqlx::Error> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT id, conversation_id, sequence_number, role, content, token_count, created_at, metadata, content_hash
         FROM messages WHERE conversation_id = ? ORDER BY sequence_number ASC LIMIT ?",
    )
    .bind(conversation_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Message::from).collect())
}

pub struct MessageSearchHit {
    pub message: Message,
    pub project_id: String,
}

/// Keyword arm of hybrid retrieval (§4.8 step 3): substring match on
/// `content`, optionally scoped to one project via the parent
/// conversation's `project_id`.
pub async fn search_messages_like(
    pool: &SqlitePool,
    pattern: &str,
    project_filter: Option<&str>,
    limit: i64,
) -> Result<Vec<MessageSearchHit>, sqlx::Error> {
    let needle = format!("%{}%", pattern.replace('%', "\\%").replace('_', "\\_"));
    let rows = if let Some(project_id) = project_filter {
        sqlx::query(
            r#"SELECT m.id, m.conversation_id, m.sequence_number, m.role, m.content,
                      m.token_count, m.created_at, m.metadata, m.content_hash, c.project_id
               FROM messages m JOIN conversations c ON c.id = m.conversation_id
               WHERE m.content LIKE ? ESCAPE '\' AND c.project_id = ?
               ORDER BY m.created_at DESC LIMIT ?"#,
        )
        .bind(&needle)
        .bind(project_id)
        .bind(limit)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query(
            r#"SELECT m.id, m.conversation_id, m.sequence_number, m.role, m.content,
                      m.token_count, m.created_at, m.metadata, m.content_hash, c.project_id
               FROM messages m JOIN conversations c ON c.id = m.conversation_id
               WHERE m.content LIKE ? ESCAPE '\'
               ORDER BY m.created_at DESC LIMIT ?"#,
        )
        .bind(&needle)
        .bind(limit)
        .fetch_all(pool)
        .await?
    };

    Ok(rows
        .into_iter()
        .map(|row| MessageSearchHit {
            message: Message {
                id: row.get("id"),
                conversation_id: row.get("conversation_id"),
                sequence_number: row.get("sequence_number"),
                role: MessageRole::parse(row.get::<&str, _>("role")).unwrap_or(MessageRole::Human),
                content: row.get("content"),
                token_count: row.get("token_count"),
                created_at: from_ts(row.get("created_at")),
                metadata: serde_json::from_str(row.get("metadata")).unwrap_or(serde_json::Value::Null),
                content_hash: row.get("content_hash"),
            },
            project_id: row.get("project_id"),
        })
        .collect())
}

/// Batched hydration for the retriever (§4.8 step 6): fetch all surviving
/// ids at once rather than one query per candidate.
pub async fn get_memory_units_by_ids(
    pool: &SqlitePool,
    ids: &[String],
) -> Result<Vec<MemoryUnit>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT id, conversation_id, project_id, unit_type, title, summary, content, keywords,
                relevance_score, quality_score, token_count, created_at, expires_at, is_active, metadata
         FROM memory_units WHERE id IN ({})",
        placeholders
    );
    let mut query = sqlx::query_as::<_, MemoryUnitRow>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows.into_iter().map(MemoryUnit::from).collect())
}

/// Keyword arm support: resolve the memory units compressed from a set of
/// conversations, since `SearchMessagesLike` hits are messages, not units
/// (§4.8 step 3-4).
pub async fn get_memory_units_by_conversation_ids(
    pool: &SqlitePool,
    conversation_ids: &[String],
) -> Result<Vec<MemoryUnit>, sqlx::Error> {
    if conversation_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = conversation_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT id, conversation_id, project_id, unit_type, title, summary, content, keywords,
                relevance_score, quality_score, token_count, created_at, expires_at, is_active, metadata
         FROM memory_units WHERE conversation_id IN ({})",
        placeholders
    );
    let mut query = sqlx::query_as::<_, MemoryUnitRow>(&sql);
    for id in conversation_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows.into_iter().map(MemoryUnit::from).collect())
}

pub async fn get_memory_unit(pool: &SqlitePool, id: &str) -> Result<Option<MemoryUnit>, sqlx::Error> {
    let row: Option<MemoryUnitRow> = sqlx::query_as(
        "SELECT id, conversation_id, project_id, unit_type, title, summary, content, keywords,
                relevance_score, quality_score, token_count, created_at, expires_at, is_active, metadata
         FROM memory_units WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(MemoryUnit::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{new_id, Message};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        pool
    }

    fn sample_conversation(project_id: &str) -> Conversation {
        Conversation {
            id: new_id(),
            project_id: project_id.to_string(),
            title: None,
            started_at: Utc::now(),
            last_activity_at: Utc::now(),
            message_count: 0,
            token_count: 0,
            status: ConversationStatus::Pending,
        }
    }

    #[tokio::test]
    async fn conversation_roundtrips_through_insert_and_get_recent() {
        let pool = test_pool().await;
        insert_project(
            &pool,
            &Project {
                id: "p1".to_string(),
                name: "Proj".to_string(),
                created_at: Utc::now(),
                metadata: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();
        let conv = sample_conversation("p1");
        insert_conversation(&pool, &conv).await.unwrap();
        let recent = get_recent_conversations(&pool, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, conv.id);
    }

    #[tokio::test]
    async fn search_messages_like_scopes_by_project() {
        let pool = test_pool().await;
        insert_project(
            &pool,
            &Project {
                id: "p1".to_string(),
                name: "Proj".to_string(),
                created_at: Utc::now(),
                metadata: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();
        let conv = sample_conversation("p1");
        insert_conversation(&pool, &conv).await.unwrap();
        let msg = Message {
            id: new_id(),
            conversation_id: conv.id.clone(),
            sequence_number: 0,
            role: MessageRole::Human,
            content: "let's use sqlite for storage".to_string(),
            token_count: 6,
            created_at: Utc::now(),
            metadata: serde_json::Value::Null,
            content_hash: Message::content_hash("let's use sqlite for storage"),
        };
        insert_message(&pool, &msg).await.unwrap();

        let hits = search_messages_like(&pool, "sqlite", Some("p1"), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        let none = search_messages_like(&pool, "sqlite", Some("p2"), 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn get_memory_units_by_ids_batches_and_skips_missing() {
        let pool = test_pool().await;
        insert_project(
            &pool,
            &Project {
                id: "p1".to_string(),
                name: "Proj".to_string(),
                created_at: Utc::now(),
                metadata: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();
        let conv = sample_conversation("p1");
        insert_conversation(&pool, &conv).await.unwrap();
        let unit = MemoryUnit {
            id: new_id(),
            conversation_id: conv.id.clone(),
            project_id: "p1".to_string(),
            unit_type: UnitType::Conversation,
            title: "t".to_string(),
            summary: "s".to_string(),
            content: "c".to_string(),
            keywords: vec!["a".to_string()],
            relevance_score: 0.5,
            quality_score: 0.8,
            token_count: 3,
            created_at: Utc::now(),
            expires_at: None,
            is_active: true,
            metadata: serde_json::Value::Null,
        };
        insert_memory_unit(&pool, &unit).await.unwrap();

        let found = get_memory_units_by_ids(&pool, &[unit.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, unit.id);
    }
}
