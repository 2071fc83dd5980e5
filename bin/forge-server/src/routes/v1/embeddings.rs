//! `/v1/embeddings` route.
//!
//! Embedding runners always load with `num_parallel = 1` (spec §4.1):
//! embedding backends don't benefit from sequence-level parallelism and
//! forcing it avoids wasted VRAM reservation.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use forge_runner::EmbeddingRequest as RunnerEmbeddingRequest;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::model_resolve::resolve_model_path;
use crate::schemas::v1::embeddings::{EmbeddingData, EmbeddingInput, EmbeddingRequest, EmbeddingResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(embeddings),
    components(schemas(EmbeddingRequest, EmbeddingResponse, EmbeddingData))
)]
pub struct EmbeddingsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/embeddings", post(embeddings))
}

#[utoipa::path(
    post,
    path = "/v1/embeddings",
    tag = "embeddings",
    request_body = EmbeddingRequest,
    responses(
        (status = 200, description = "Embeddings generated", body = EmbeddingResponse),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Scheduler or runner error"),
    )
)]
pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmbeddingRequest>,
) -> Result<Json<EmbeddingResponse>, ServerError> {
    let input = match req.input {
        EmbeddingInput::Single(s) => vec![s],
        EmbeddingInput::Batch(v) => v,
    };
    if input.is_empty() {
        return Err(ServerError::BadRequest("input must not be empty".into()));
    }

    debug!(model = %req.model, batch_size = input.len(), "embedding request");

    let model_path = resolve_model_path(&state.registry, &req.model).await?;
    let options = forge_runner::RunnerOptions {
        num_gpu: -1,
        num_ctx: 0,
        num_parallel: 1,
        adapters: Vec::new(),
        projectors: Vec::new(),
        extra: serde_json::Value::Null,
    };

    let keep_alive = req.keep_alive.map(Duration::from_secs).unwrap_or(state.config.keep_alive);
    let runner = state
        .scheduler
        .get_runner(model_path, req.model.clone(), options, Some(keep_alive))
        .await?;

    let result = runner.handle().embedding(RunnerEmbeddingRequest { input }).await;
    state.scheduler.release(&runner).await;
    let result = result?;

    let data = result
        .vectors
        .into_iter()
        .enumerate()
        .map(|(index, embedding)| EmbeddingData {
            index: index as u32,
            embedding,
        })
        .collect();

    Ok(Json(EmbeddingResponse {
        model: req.model,
        data,
    }))
}
