pub mod chat;
pub mod completions;
pub mod embeddings;
pub mod models;
pub mod ps;
mod stream;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

/// Routes nested under `/v1` (OpenAI-compatible).
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(chat::router())
        .merge(completions::router())
        .merge(embeddings::router())
        .merge(models::router())
        .merge(ps::router())
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = V1Api::openapi();
    spec.merge(chat::ChatApi::openapi());
    spec.merge(completions::CompletionsApi::openapi());
    spec.merge(embeddings::EmbeddingsApi::openapi());
    spec.merge(models::ModelsApi::openapi());
    spec.merge(ps::PsApi::openapi());
    spec
}
