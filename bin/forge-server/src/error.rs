//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code (spec §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use forge_registry::RegistryError;
use forge_runtime_core::SchedulerError;
use serde_json::json;
use thiserror::Error;

/// All errors that can occur in the forge-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the model-runner scheduler.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Propagated from the registry transfer engine.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Propagated from the SQLite audit/session store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Propagated from a runner's own completion/embedding/tokenize call.
    #[error("runner error: {0}")]
    Runner(#[from] forge_runner::RunnerError),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid admin bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ServerError::Scheduler(SchedulerError::MaxQueue) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::Scheduler(SchedulerError::LoadRequiredFull) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::Scheduler(SchedulerError::ModelNotFound(m)) => {
                (StatusCode::NOT_FOUND, m.clone())
            }
            ServerError::Scheduler(SchedulerError::Cancelled) => {
                (StatusCode::from_u16(499).unwrap(), self.to_string())
            }
            ServerError::Scheduler(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ServerError::Registry(RegistryError::ManifestNotFound(_))
            | ServerError::Registry(RegistryError::BlobNotFound(_)) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ServerError::Registry(RegistryError::NotFullyQualified(_))
            | ServerError::Registry(RegistryError::SizeMismatch { .. })
            | ServerError::Registry(RegistryError::BadChallenge(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Registry(RegistryError::AuthRequired) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ServerError::Registry(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ServerError::Database(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ServerError::Runner(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ServerError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        ServerError::Internal(e.to_string())
    }
}
