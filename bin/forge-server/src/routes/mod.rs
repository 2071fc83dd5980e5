//! Axum router construction.
//!
//! [`build`] assembles the complete application router: CORS and
//! per-request trace-ID middleware, the health route, the OpenAI-compatible
//! `/v1` routes, and an optional Swagger UI (disable with
//! `FORGE_ENABLE_SWAGGER=false`).

mod health;
pub mod doc;
pub mod v1;

use std::sync::Arc;

use axum::Router;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::cors::cors_layer;
use crate::middleware::TraceLayer;
use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    let cors = cors_layer(Arc::clone(&state));

    let api_router = Router::new().merge(health::router()).nest("/v1", v1::router());

    let mut app = Router::new().merge(api_router);

    if state.config.enable_swagger {
        let api_doc = doc::get_docs();
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc));
    }

    app.layer(TraceLayer::new(Arc::clone(&state)))
        .layer(cors)
        .with_state(state)
}
