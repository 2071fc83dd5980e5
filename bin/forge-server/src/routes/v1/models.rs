//! `/v1/models` routes: list, show, pull, push, delete.
//!
//! Pull and push stream `forge_registry::ProgressEvent`s as
//! newline-delimited JSON when `stream: true` (spec §4.4/§4.5); otherwise
//! the orchestrator is awaited directly and a single JSON object is
//! returned. Pull/push/delete require the admin bearer token when
//! `FORGE_ADMIN_TOKEN` is set.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use forge_registry::ProgressEvent;
use forge_types::Name;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;
use tracing::{info, warn};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::models::{ListModelsResponse, ModelLayer, ModelSummary, ShowModelResponse, TransferRequest};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_models, show_model, pull_model, push_model, delete_model),
    components(schemas(ListModelsResponse, ModelSummary, ShowModelResponse, ModelLayer, TransferRequest))
)]
pub struct ModelsApi;

pub fn router() -> Router<Arc<AppState>> {
    let admin_gated = Router::new()
        .route("/models/pull", post(pull_model))
        .route("/models/push", post(push_model))
        .route("/models/:name", delete(delete_model))
        .layer(middleware::from_fn(crate::middleware::auth::check_admin_auth));

    Router::new()
        .route("/models", get(list_models))
        .route("/models/:name", get(show_model))
        .merge(admin_gated)
}

fn parse_name(raw: &str) -> Result<Name, ServerError> {
    raw.parse::<Name>()
        .map(Name::with_defaults)
        .map_err(|e| ServerError::BadRequest(format!("invalid model name {raw:?}: {e}")))
}

#[utoipa::path(
    get,
    path = "/v1/models",
    tag = "models",
    responses((status = 200, description = "Locally stored models", body = ListModelsResponse))
)]
pub async fn list_models(State(state): State<Arc<AppState>>) -> Result<Json<ListModelsResponse>, ServerError> {
    let entries = state.registry.manifests().enumerate().await?;
    let models = entries
        .into_iter()
        .map(|(rel, manifest)| ModelSummary {
            name: rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"),
            digest: manifest.self_digest().map(|d| d.to_string()).unwrap_or_default(),
            size: manifest.layers.iter().map(|l| l.size).sum::<u64>() + manifest.config.size,
        })
        .collect();

    Ok(Json(ListModelsResponse { models }))
}

#[utoipa::path(
    get,
    path = "/v1/models/{name}",
    tag = "models",
    params(("name" = String, Path, description = "Model name")),
    responses(
        (status = 200, description = "Model manifest", body = ShowModelResponse),
        (status = 404, description = "Model not found"),
    )
)]
pub async fn show_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ShowModelResponse>, ServerError> {
    let parsed = parse_name(&name)?;
    let manifest = state
        .registry
        .manifests()
        .read(&parsed)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("model {name:?} not found")))?;

    let layers = manifest
        .layers
        .iter()
        .map(|l| ModelLayer {
            media_type: l.media_type.as_str().to_string(),
            digest: l.digest.to_string(),
            size: l.size,
        })
        .collect();

    Ok(Json(ShowModelResponse {
        name,
        digest: manifest.self_digest().map(|d| d.to_string()).unwrap_or_default(),
        size: manifest.layers.iter().map(|l| l.size).sum::<u64>() + manifest.config.size,
        layers,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/models/pull",
    tag = "models",
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Pull completed or streaming"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 404, description = "Remote manifest not found"),
    )
)]
pub async fn pull_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransferRequest>,
) -> Result<Response, ServerError> {
    let name = parse_name(&req.name)?;

    if req.stream {
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let registry = Arc::clone(&state.registry);
        let noprune = req.noprune;
        tokio::spawn(async move {
            match registry.pull(&name, noprune, Some(tx.clone())).await {
                Ok(manifest) => {
                    let body = serde_json::json!({ "digest": manifest.self_digest().ok().map(|d| d.to_string()) });
                    let _ = tx.send(ProgressEvent::Result(body)).await;
                }
                Err(e) => {
                    warn!(error = %e, "pull failed");
                    let _ = tx.send(ProgressEvent::error(500, e.to_string())).await;
                }
            }
        });

        return Ok(ndjson_response(rx));
    }

    let manifest = state.registry.pull(&name, req.noprune, None).await?;
    info!(model = %req.name, "model pulled");
    Ok(Json(serde_json::json!({
        "digest": manifest.self_digest().ok().map(|d| d.to_string()),
    }))
    .into_response())
}

#[utoipa::path(
    post,
    path = "/v1/models/push",
    tag = "models",
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Push completed or streaming"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 404, description = "Local model not found"),
    )
)]
pub async fn push_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransferRequest>,
) -> Result<Response, ServerError> {
    let name = parse_name(&req.name)?;
    let manifest = state
        .registry
        .manifests()
        .read(&name)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("model {:?} not found locally", req.name)))?;

    if req.stream {
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let registry = Arc::clone(&state.registry);
        tokio::spawn(async move {
            match registry.push(&name, &manifest, None, Some(tx.clone())).await {
                Ok(()) => {
                    let _ = tx.send(ProgressEvent::Result(serde_json::json!({ "status": "success" }))).await;
                }
                Err(e) => {
                    warn!(error = %e, "push failed");
                    let _ = tx.send(ProgressEvent::error(500, e.to_string())).await;
                }
            }
        });

        return Ok(ndjson_response(rx));
    }

    state.registry.push(&name, &manifest, None, None).await?;
    info!(model = %req.name, "model pushed");
    Ok(Json(serde_json::json!({ "status": "success" })).into_response())
}

#[utoipa::path(
    delete,
    path = "/v1/models/{name}",
    tag = "models",
    params(("name" = String, Path, description = "Model name")),
    responses(
        (status = 204, description = "Model deleted"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 404, description = "Model not found"),
    )
)]
pub async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<axum::http::StatusCode, ServerError> {
    let parsed = parse_name(&name)?;
    let manifests = state.registry.manifests();
    let manifest = manifests
        .read(&parsed)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("model {name:?} not found")))?;

    manifests.delete(&parsed).await?;

    // `prune_orphans` diffs two manifests (its use on the pull path); a
    // plain delete has no "updated" manifest to diff against, so walk the
    // survivors directly and drop any of the deleted manifest's digests
    // nothing else still references.
    let survivors = manifests.enumerate().await?;
    for digest in manifest.digests() {
        let still_referenced = survivors.iter().any(|(_, m)| m.digests().any(|d| d == digest));
        if !still_referenced {
            state.registry.blobs().delete(digest).await?;
        }
    }

    info!(model = %name, "model deleted");
    Ok(axum::http::StatusCode::NO_CONTENT)
}

fn ndjson_response(rx: tokio::sync::mpsc::Receiver<ProgressEvent>) -> Response {
    let stream = ReceiverStream::new(rx).map(|event| {
        let mut line = serde_json::to_vec(&event).unwrap_or_default();
        line.push(b'\n');
        Ok::<_, std::convert::Infallible>(line)
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .unwrap()
}

