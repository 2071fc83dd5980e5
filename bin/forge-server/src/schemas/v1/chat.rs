//! OpenAI-compatible chat-completion request/response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    pub content: String,
}

/// Runner load options a caller may override per-request (spec §4.1
/// `RunnerOptions`). `num_gpu < 0` means "don't care" for reload detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RunnerOptionsDto {
    #[serde(default = "default_num_gpu")]
    pub num_gpu: i32,
    #[serde(default)]
    pub num_ctx: u64,
    #[serde(default)]
    pub num_parallel: u32,
    #[serde(default)]
    pub adapters: Vec<String>,
    #[serde(default)]
    pub projectors: Vec<String>,
}

fn default_num_gpu() -> i32 {
    -1
}

impl From<RunnerOptionsDto> for forge_runner::RunnerOptions {
    fn from(dto: RunnerOptionsDto) -> Self {
        forge_runner::RunnerOptions {
            num_gpu: dto.num_gpu,
            num_ctx: dto.num_ctx,
            num_parallel: dto.num_parallel,
            adapters: dto.adapters,
            projectors: dto.projectors,
            extra: serde_json::Value::Null,
        }
    }
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionRequest {
    /// Optional chat session ID for stateful conversations; when present,
    /// history is loaded from the database and prepended to the prompt.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Number of top log-probabilities to return per token, in [0, 20].
    /// Validated once, here at the HTTP boundary (see DESIGN.md).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,
    /// Idle TTL override in seconds; `0` unloads immediately after the
    /// response completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<u64>,
    #[serde(default)]
    pub options: RunnerOptionsDto,
}

/// A single choice in the completion response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// Response body for `POST /v1/chat/completions` (non-streaming).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}
