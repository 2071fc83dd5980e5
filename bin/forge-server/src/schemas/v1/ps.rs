//! `GET /v1/ps`: snapshot of currently loaded runners.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoadedRunner {
    pub model: String,
    pub pid: u32,
    pub size: u64,
    pub vram_size: u64,
    pub num_gpus: usize,
    pub num_parallel: u32,
    pub ref_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PsResponse {
    pub runners: Vec<LoadedRunner>,
}
