//! `/v1/models` request/response types: list, show, pull, push, delete.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelSummary {
    pub name: String,
    pub digest: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListModelsResponse {
    pub models: Vec<ModelSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShowModelResponse {
    pub name: String,
    pub digest: String,
    pub size: u64,
    pub layers: Vec<ModelLayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelLayer {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// Request body shared by `POST /v1/models/pull` and `POST /v1/models/push`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    pub name: String,
    /// When true, the response body is newline-delimited JSON progress
    /// events; otherwise a single final event is returned.
    #[serde(default)]
    pub stream: bool,
    /// Pull only: skip pruning of layers orphaned by the new manifest.
    #[serde(default)]
    pub noprune: bool,
}

// Transfer progress is streamed straight from `forge_registry::ProgressEvent`
// (spec §4.4/§4.5) — no separate wrapper DTO, to avoid drifting out of sync
// with the registry's own event shape.
