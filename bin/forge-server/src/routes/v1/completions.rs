//! Raw (non-chat) completion route.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use forge_runner::CompletionRequest;
use futures::StreamExt;
use tracing::debug;
use utoipa::OpenApi;
use uuid::Uuid;

use crate::error::ServerError;
use crate::model_resolve::resolve_model_path;
use crate::routes::v1::stream::ReleaseOnDrop;
use crate::schemas::v1::completions::{CompletionChoice, CompletionRequest as CompletionReq, CompletionResponse};
use crate::state::AppState;

const MAX_PROMPT_BYTES: usize = 128 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(completions),
    components(schemas(CompletionReq, CompletionResponse, CompletionChoice))
)]
pub struct CompletionsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/completions", post(completions))
}

#[utoipa::path(
    post,
    path = "/v1/completions",
    tag = "completions",
    request_body = CompletionReq,
    responses(
        (status = 200, description = "Completion generated", body = CompletionResponse),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Scheduler or runner error"),
    )
)]
pub async fn completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompletionReq>,
) -> Result<Response, ServerError> {
    if req.prompt.len() > MAX_PROMPT_BYTES {
        return Err(ServerError::BadRequest(format!(
            "prompt too large ({} bytes); maximum is {MAX_PROMPT_BYTES} bytes",
            req.prompt.len(),
        )));
    }

    let max_tokens = req.max_tokens.unwrap_or(512);
    if max_tokens == 0 || max_tokens > 4096 {
        return Err(ServerError::BadRequest(format!(
            "invalid max_tokens ({max_tokens}): must be between 1 and 4096"
        )));
    }

    let temperature = req.temperature.unwrap_or(0.7);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ServerError::BadRequest(format!(
            "invalid temperature ({temperature}): must be between 0.0 and 2.0"
        )));
    }

    debug!(model = %req.model, prompt_len = req.prompt.len(), stream = req.stream, "completion request");

    let model_path = resolve_model_path(&state.registry, &req.model).await?;
    let keep_alive = req.keep_alive.map(Duration::from_secs).unwrap_or(state.config.keep_alive);
    let runner = state
        .scheduler
        .get_runner(model_path, req.model.clone(), req.options.clone().into(), Some(keep_alive))
        .await?;

    let completion_req = CompletionRequest {
        prompt: req.prompt.clone(),
        max_tokens,
        temperature,
        top_logprobs: req.top_logprobs,
        session_key: None,
        stream: req.stream,
    };

    let backend_stream = runner.handle().completion(completion_req).await?;

    if req.stream {
        let sse_stream = ReleaseOnDrop::new(backend_stream, state.scheduler.clone(), runner).map(|chunk| {
            let data = match chunk {
                Ok(c) => serde_json::json!({ "delta": c.text, "done": c.done }).to_string(),
                Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
            };
            Ok::<Event, Infallible>(Event::default().data(data))
        });
        return Ok(Sse::new(sse_stream).into_response());
    }

    let mut generated = String::new();
    let mut stream = backend_stream;
    let result = loop {
        match stream.next().await {
            Some(Ok(chunk)) => generated.push_str(&chunk.text),
            Some(Err(e)) => break Err(e),
            None => break Ok(()),
        }
    };
    state.scheduler.release(&runner).await;
    result?;

    let resp = CompletionResponse {
        id: format!("cmpl-{}", Uuid::new_v4()),
        object: "text_completion".into(),
        created: Utc::now().timestamp(),
        model: req.model,
        choices: vec![CompletionChoice {
            index: 0,
            text: generated,
            finish_reason: "stop".into(),
        }],
    };

    Ok(Json(resp).into_response())
}
