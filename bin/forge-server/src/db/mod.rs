//! Database abstraction layer.
//!
//! [`RequestStore`] persists request-audit records; [`SessionStore`] and
//! [`ChatStore`] persist chat-session history so a `session_id` on a
//! chat-completion request can be prepended to later turns (spec §10
//! ambient, "chat session persistence"). The default implementation of all
//! three is [`sqlite::SqliteStore`].
//!
//! All trait methods use `impl Future` in their signatures (stable since
//! Rust 1.75) so no extra `async-trait` crate is required here.

pub mod sqlite;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A single row in the `request_log` table.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// Trace ID that ties together request, processing, and response.
    pub id: Uuid,
    pub method: String,
    pub path: String,
    /// `None` until the response has been written.
    pub status: Option<i64>,
    /// `None` until the response has been written.
    pub latency_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Trait for persisting API request audit records.
pub trait RequestStore: Send + Sync + 'static {
    fn insert(
        &self,
        record: RequestRecord,
    ) -> impl std::future::Future<Output = Result<(), sqlx::Error>> + Send;

    fn update_response(
        &self,
        id: Uuid,
        status: i64,
        latency_ms: i64,
    ) -> impl std::future::Future<Output = Result<(), sqlx::Error>> + Send;
}

/// A chat session: a durable conversation identified by `session_id`.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single turn persisted to a chat session's history.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Trait for chat-session lifecycle (creation, lookup, deletion).
pub trait SessionStore: Send + Sync + 'static {
    fn get_or_create_session(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<ChatSession, sqlx::Error>> + Send;

    fn delete_session(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), sqlx::Error>> + Send;
}

/// Trait for persisting and replaying a chat session's message history.
pub trait ChatStore: Send + Sync + 'static {
    fn append_message(
        &self,
        message: ChatMessage,
    ) -> impl std::future::Future<Output = Result<(), sqlx::Error>> + Send;

    fn list_messages(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, sqlx::Error>> + Send;
}
