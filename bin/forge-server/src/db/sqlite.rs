//! SQLite implementation of [`RequestStore`], [`SessionStore`], and
//! [`ChatStore`].
//!
//! # Migrations path
//!
//! `sqlx::migrate!("./migrations")` resolves the path **at compile time**
//! relative to `CARGO_MANIFEST_DIR`, so the directory is embedded into the
//! binary. The database file location is determined at runtime by
//! `FORGE_DATABASE_URL` and is unrelated to the working directory.
//!
//! The `sqlx::query` (runtime-verified) form is used deliberately so no
//! `DATABASE_URL` environment variable is needed at compile time.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{ChatMessage, ChatSession, ChatStore, RequestRecord, RequestStore, SessionStore};

/// SQLite-backed audit and chat-session store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending
    /// migrations. `url` should be a sqlx-compatible SQLite URL, e.g.
    /// `"sqlite://forge.db?mode=rwc"` or `"sqlite://:memory:"` for tests.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

impl RequestStore for SqliteStore {
    async fn insert(&self, record: RequestRecord) -> Result<(), sqlx::Error> {
        let id = record.id.to_string();
        let created_at = record.created_at.to_rfc3339();
        sqlx::query(
            "INSERT INTO request_log (id, method, path, status, latency_ms, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&id)
        .bind(&record.method)
        .bind(&record.path)
        .bind(record.status)
        .bind(record.latency_ms)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_response(&self, id: Uuid, status: i64, latency_ms: i64) -> Result<(), sqlx::Error> {
        let id_str = id.to_string();
        sqlx::query("UPDATE request_log SET status = ?1, latency_ms = ?2 WHERE id = ?3")
            .bind(status)
            .bind(latency_ms)
            .bind(&id_str)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl SessionStore for SqliteStore {
    async fn get_or_create_session(&self, id: &str) -> Result<ChatSession, sqlx::Error> {
        let row: Option<(String, Option<String>, String, String)> =
            sqlx::query_as("SELECT id, name, created_at, updated_at FROM chat_sessions WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((id, name, created_at, updated_at)) = row {
            return Ok(ChatSession {
                id,
                name,
                created_at: parse_ts(&created_at),
                updated_at: parse_ts(&updated_at),
            });
        }

        let now = Utc::now();
        let now_str = now.to_rfc3339();
        sqlx::query(
            "INSERT INTO chat_sessions (id, name, created_at, updated_at) VALUES (?1, NULL, ?2, ?2)",
        )
        .bind(id)
        .bind(&now_str)
        .execute(&self.pool)
        .await?;

        Ok(ChatSession {
            id: id.to_string(),
            name: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn delete_session(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM chat_sessions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl ChatStore for SqliteStore {
    async fn append_message(&self, message: ChatMessage) -> Result<(), sqlx::Error> {
        let created_at = message.created_at.to_rfc3339();
        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, sqlx::Error> {
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, session_id, role, content, created_at FROM chat_messages \
             WHERE session_id = ?1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, session_id, role, content, created_at)| ChatMessage {
                id,
                session_id,
                role,
                content,
                created_at: parse_ts(&created_at),
            })
            .collect())
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e| {
        tracing::warn!(raw, error = %e, "failed to parse timestamp; using now");
        Utc::now()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_insert_then_update_round_trips() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let id = Uuid::new_v4();
        store
            .insert(RequestRecord {
                id,
                method: "GET".into(),
                path: "/health".into(),
                status: None,
                latency_ms: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store.update_response(id, 200, 5).await.unwrap();
    }

    #[tokio::test]
    async fn get_or_create_session_is_idempotent() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let a = store.get_or_create_session("s1").await.unwrap();
        let b = store.get_or_create_session("s1").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.created_at, b.created_at);
    }

    #[tokio::test]
    async fn chat_messages_round_trip_in_order() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.get_or_create_session("s1").await.unwrap();
        store
            .append_message(ChatMessage {
                id: "m1".into(),
                session_id: "s1".into(),
                role: "user".into(),
                content: "hi".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .append_message(ChatMessage {
                id: "m2".into(),
                session_id: "s1".into(),
                role: "assistant".into(),
                content: "hello".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let messages = store.list_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
    }
}
