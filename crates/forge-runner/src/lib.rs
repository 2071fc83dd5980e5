//! The opaque inference-worker abstraction the scheduler consumes.
//!
//! Forge never links against an inference engine directly: GGUF parsing,
//! prompt templating, and the actual forward pass live behind
//! [`RunnerHandle`], treated per spec as an external collaborator. This
//! crate defines only the interface and a [`MockRunner`] test double.

mod error;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::RunnerError;

/// Identifies one GPU (or CPU placeholder) device.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot of one device's memory inventory, as returned by
/// `GetDeviceInfos`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub total_memory: u64,
    pub free_memory: u64,
    /// Bytes the device driver itself reserves; subtracted from placement
    /// budgets per spec §4.1 VRAM accounting.
    pub minimum_memory: u64,
    pub is_discrete: bool,
    /// Metal/iGPU placements skip VRAM-recovery waits per spec §4.1.
    pub skips_vram_recovery_wait: bool,
}

/// Runner load/runtime options. Equality here is the predicate the
/// scheduler's `needs_reload` check uses — with the caveat (implemented by
/// the scheduler, not here) that `num_gpu < 0` means "don't care".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerOptions {
    pub num_gpu: i32,
    pub num_ctx: u64,
    pub num_parallel: u32,
    pub adapters: Vec<String>,
    pub projectors: Vec<String>,
    pub extra: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_logprobs: Option<u32>,
    pub session_key: Option<String>,
    pub stream: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub text: String,
    pub done: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub input: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub vectors: Vec<Vec<f32>>,
}

/// The interface the scheduler programs against. Implementations wrap a
/// real inference worker process (subprocess, FFI handle, or remote
/// endpoint); forge's core never constructs one directly, it is handed one
/// by a `RunnerFactory` injected at startup.
#[async_trait]
pub trait RunnerHandle: Send + Sync {
    /// Load the model, placing it on `gpus`. `require_full` mirrors spec
    /// §4.1: when `true`, a worker that would not fit alongside already
    /// loaded runners must return [`RunnerError::LoadRequiredFull`] instead
    /// of partially loading.
    async fn load(
        &self,
        gpus: &[DeviceId],
        options: &RunnerOptions,
        require_full: bool,
    ) -> Result<(), RunnerError>;

    async fn completion(
        &self,
        req: CompletionRequest,
    ) -> Result<
        std::pin::Pin<Box<dyn futures::Stream<Item = Result<CompletionChunk, RunnerError>> + Send>>,
        RunnerError,
    >;

    async fn embedding(&self, req: EmbeddingRequest) -> Result<EmbeddingResponse, RunnerError>;

    async fn tokenize(&self, text: &str) -> Result<Vec<u32>, RunnerError>;

    /// Health check with the given timeout; spec §4.1 uses 10s when the
    /// runner is steady-state and 2min while still loading.
    async fn ping(&self, timeout: Duration) -> Result<(), RunnerError>;

    /// Close the runner exactly once. Idempotent: closing an already-closed
    /// runner is a no-op, matching the "handle closed exactly once" upon
    /// unload invariant in spec §3.
    async fn close(&self) -> Result<(), RunnerError>;

    fn vram_by_gpu(&self, device: &DeviceId) -> u64;

    fn vram_size(&self) -> u64;

    fn total_size(&self) -> u64;

    fn get_device_infos(&self) -> Vec<DeviceInfo>;

    fn has_exited(&self) -> bool;

    fn pid(&self) -> u32;
}

pub mod mock;
pub use mock::MockRunner;
