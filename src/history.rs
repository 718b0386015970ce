//! Chat history persistence: one conversation per (user, session), holding
//! the ordered user and assistant messages.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    /// Source URLs attached to an assistant answer.
    pub sources: Option<Vec<String>>,
    pub created_at: i64,
}

/// Return the conversation id for `(user_id, session_id)`, creating the
/// conversation on first use.
pub async fn get_or_create_conversation(
    conn: &mut SqliteConnection,
    user_id: &str,
    session_id: &str,
) -> Result<String> {
    sqlx::query(
        "INSERT OR IGNORE INTO conversations (id, user_id, session_id, created_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(session_id)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;

    let id: String = sqlx::query_scalar(
        "SELECT id FROM conversations WHERE user_id = ? AND session_id = ?",
    )
    .bind(user_id)
    .bind(session_id)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("Failed to load conversation for session {}", session_id))?;

    Ok(id)
}

pub async fn append_message(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    role: Role,
    content: &str,
    sources: Option<&[String]>,
) -> Result<()> {
    let sources_json = sources.map(serde_json::to_string).transpose()?;

    sqlx::query(
        "INSERT INTO messages (id, conversation_id, role, content, sources, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(conversation_id)
    .bind(role.as_str())
    .bind(content)
    .bind(sources_json)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Persist one completed question/answer pair in a single transaction, so
/// a failure leaves neither message behind. An answer without sources is
/// stored with a NULL sources column.
pub async fn record_exchange(
    pool: &SqlitePool,
    user_id: &str,
    session_id: &str,
    question: &str,
    answer: &str,
    sources: &[String],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    let conversation_id = get_or_create_conversation(&mut tx, user_id, session_id).await?;
    append_message(&mut tx, &conversation_id, Role::User, question, None).await?;
    let sources = (!sources.is_empty()).then_some(sources);
    append_message(&mut tx, &conversation_id, Role::Assistant, answer, sources).await?;
    tx.commit().await?;
    Ok(())
}

/// Messages of a user's session, oldest first. Unknown sessions yield an
/// empty list.
pub async fn load_history(
    pool: &SqlitePool,
    user_id: &str,
    session_id: &str,
) -> Result<Vec<StoredMessage>> {
    let rows = sqlx::query(
        "SELECT m.role, m.content, m.sources, m.created_at
         FROM messages m
         JOIN conversations c ON c.id = m.conversation_id
         WHERE c.user_id = ? AND c.session_id = ?
         ORDER BY m.created_at ASC, m.rowid ASC",
    )
    .bind(user_id)
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        let sources: Option<String> = row.get("sources");
        // An unreadable sources column degrades to no sources.
        let sources = sources.and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok());
        messages.push(StoredMessage {
            role: row.get("role"),
            content: row.get("content"),
            sources,
            created_at: row.get("created_at"),
        });
    }

    Ok(messages)
}
