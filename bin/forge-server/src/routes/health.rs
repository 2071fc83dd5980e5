//! Health / liveness endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health))]
pub struct HealthApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint. Returns `{"status": "ok", "version": "...",
/// "loaded_models": N}` with HTTP 200.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Server is healthy", body = Value))
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let loaded = state.scheduler.list_loaded().await.len();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "loaded_models": loaded,
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn health_route_registers_get_health() {
        let _: Router<Arc<AppState>> = router();
    }
}
