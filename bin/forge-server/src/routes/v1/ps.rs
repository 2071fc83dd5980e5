//! `GET /v1/ps` and `POST /v1/models/{name}/unload`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::model_resolve::resolve_model_path;
use crate::schemas::v1::ps::{LoadedRunner, PsResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(list_loaded, unload_model), components(schemas(LoadedRunner, PsResponse)))]
pub struct PsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ps", get(list_loaded))
        .route("/models/:name/unload", post(unload_model))
}

#[utoipa::path(
    get,
    path = "/v1/ps",
    tag = "ps",
    responses((status = 200, description = "Currently loaded runners", body = PsResponse))
)]
pub async fn list_loaded(State(state): State<Arc<AppState>>) -> Json<PsResponse> {
    let runners = state
        .scheduler
        .list_loaded()
        .await
        .into_iter()
        .map(|r| LoadedRunner {
            model: r.model().to_string(),
            pid: r.pid(),
            size: r.total_size(),
            vram_size: r.vram_size(),
            num_gpus: r.gpus().len(),
            num_parallel: r.num_parallel(),
            ref_count: r.ref_count(),
        })
        .collect();

    Json(PsResponse { runners })
}

#[utoipa::path(
    post,
    path = "/v1/models/{name}/unload",
    tag = "ps",
    params(("name" = String, Path, description = "Model name")),
    responses(
        (status = 204, description = "Unload requested"),
        (status = 404, description = "Model not loaded"),
    )
)]
pub async fn unload_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<axum::http::StatusCode, ServerError> {
    let model_path = resolve_model_path(&state.registry, &name).await?;
    state.scheduler.expire_runner(&model_path).await;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
