//! OpenAI-compatible chat-completion routes.
//!
//! Delegates to the model-runner scheduler. When a session `id` is
//! provided, conversation history is loaded from the database and
//! prepended to the prompt, and the session ID is passed through as the
//! runner's `session_key` so a worker that caches KV-state can reuse it.

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
use tracing::{debug, info};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::db::{ChatMessage as StoredMessage, ChatStore, SessionStore};
use crate::error::ServerError;
use crate::model_resolve::resolve_model_path;
use crate::routes::v1::stream::ReleaseOnDrop;
use crate::schemas::v1::chat::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage as OpenAiMessage,
};
use crate::state::AppState;

const MAX_PROMPT_BYTES: usize = 128 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(chat_completions),
    components(schemas(
        ChatCompletionRequest,
        ChatCompletionResponse,
        OpenAiMessage,
        ChatChoice
    ))
)]
pub struct ChatApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/completions", post(chat_completions))
}

#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    tag = "chat",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "Completion generated", body = ChatCompletionResponse),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Scheduler or runner error"),
    )
)]
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, ServerError> {
    let user_content = req
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .ok_or_else(|| ServerError::BadRequest("no user message found".into()))?;

    if user_content.len() > MAX_PROMPT_BYTES {
        return Err(ServerError::BadRequest(format!(
            "prompt too large ({} bytes); maximum is {MAX_PROMPT_BYTES} bytes",
            user_content.len(),
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

    if let Some(top_logprobs) = req.top_logprobs {
        if top_logprobs > 20 {
            return Err(ServerError::BadRequest(format!(
                "invalid top_logprobs ({top_logprobs}): must be between 0 and 20"
            )));
        }
    }

    debug!(model = %req.model, prompt_len = user_content.len(), stream = req.stream, session_id = ?req.id, "chat completion request");

    if let Some(sid) = req.id.as_deref() {
        state.store.get_or_create_session(sid).await?;
        state
            .store
            .append_message(StoredMessage {
                id: Uuid::new_v4().to_string(),
                session_id: sid.to_owned(),
                role: "user".into(),
                content: user_content.clone(),
                created_at: Utc::now(),
            })
            .await?;
    }

    let prompt = build_prompt(&state, req.id.as_deref(), &req.messages).await?;

    let model_path = resolve_model_path(&state.registry, &req.model).await?;
    let keep_alive = req.keep_alive.map(Duration::from_secs).unwrap_or(state.config.keep_alive);
    let runner = state
        .scheduler
        .get_runner(model_path, req.model.clone(), req.options.clone().into(), Some(keep_alive))
        .await?;

    let completion_req = CompletionRequest {
        prompt,
        max_tokens,
        temperature,
        top_logprobs: req.top_logprobs,
        session_key: req.id.clone(),
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

        // Persisting the assistant turn for a streaming response would
        // require buffering the whole stream; streamed turns are not
        // added to session history.
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

    info!(model = %req.model, output_len = generated.len(), "chat completion done");

    if let Some(sid) = req.id.as_deref() {
        state
            .store
            .append_message(StoredMessage {
                id: Uuid::new_v4().to_string(),
                session_id: sid.to_owned(),
                role: "assistant".into(),
                content: generated.clone(),
                created_at: Utc::now(),
            })
            .await?;
    }

    let resp = ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion".into(),
        created: Utc::now().timestamp(),
        model: req.model,
        choices: vec![ChatChoice {
            index: 0,
            message: OpenAiMessage {
                role: "assistant".into(),
                content: generated,
            },
            finish_reason: "stop".into(),
        }],
    };

    Ok(Json(resp).into_response())
}

async fn build_prompt(
    state: &AppState,
    session_id: Option<&str>,
    current_messages: &[OpenAiMessage],
) -> Result<String, ServerError> {
    let mut parts: Vec<String> = Vec::new();

    if let Some(sid) = session_id {
        let history = state.store.list_messages(sid).await?;
        for msg in history {
            parts.push(format!("{}: {}", capitalize_role(&msg.role), msg.content));
        }
    }

    for msg in current_messages {
        parts.push(format!("{}: {}", capitalize_role(&msg.role), msg.content));
    }
    parts.push("Assistant:".into());

    Ok(parts.join("\n"))
}

fn capitalize_role(role: &str) -> &str {
    match role {
        "user" => "User",
        "assistant" => "Assistant",
        "system" => "System",
        other => other,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schemas::v1::chat::RunnerOptionsDto;

    fn make_request(role: &str, content: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            id: None,
            model: "test".into(),
            messages: vec![OpenAiMessage {
                role: role.into(),
                content: content.into(),
            }],
            stream: false,
            max_tokens: None,
            temperature: None,
            top_logprobs: None,
            keep_alive: None,
            options: RunnerOptionsDto::default(),
        }
    }

    #[test]
    fn validate_max_tokens_zero() {
        let req = ChatCompletionRequest {
            max_tokens: Some(0),
            ..make_request("user", "hello")
        };
        let mt = req.max_tokens.unwrap_or(512);
        assert!(mt == 0 || mt > 4096);
    }

    #[test]
    fn validate_max_tokens_too_large() {
        let req = ChatCompletionRequest {
            max_tokens: Some(9999),
            ..make_request("user", "hello")
        };
        let mt = req.max_tokens.unwrap_or(512);
        assert!(mt > 4096);
    }

    #[test]
    fn validate_temperature_out_of_range() {
        let temp = 3.0_f32;
        assert!(!(0.0..=2.0).contains(&temp));
    }

    #[test]
    fn validate_prompt_too_large() {
        let long_prompt = "x".repeat(MAX_PROMPT_BYTES + 1);
        assert!(long_prompt.len() > MAX_PROMPT_BYTES);
    }

    #[test]
    fn no_user_message_returns_error() {
        let req = make_request("system", "you are a bot");
        let found = req.messages.iter().rev().find(|m| m.role == "user");
        assert!(found.is_none());
    }

    #[test]
    fn capitalize_role_maps_known_roles() {
        assert_eq!(capitalize_role("user"), "User");
        assert_eq!(capitalize_role("tool"), "tool");
    }
}
