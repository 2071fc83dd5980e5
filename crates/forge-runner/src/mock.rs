//! A fake [`RunnerHandle`] used by `forge-runtime-core`'s scheduler tests
//! and as the default backend in environments with no real inference
//! worker wired up.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use crate::{
    CompletionChunk, CompletionRequest, DeviceId, DeviceInfo, EmbeddingRequest,
    EmbeddingResponse, RunnerError, RunnerHandle, RunnerOptions,
};

pub struct MockRunner {
    pid: u32,
    vram: u64,
    total: u64,
    devices: Vec<DeviceInfo>,
    exited: AtomicBool,
    loaded: AtomicBool,
    load_delay: Option<Duration>,
    fail_load: bool,
    ping_ok: AtomicBool,
    tokens_generated: AtomicU32,
    vram_by_device: Mutex<std::collections::HashMap<DeviceId, u64>>,
    close_count: AtomicU64,
}

impl MockRunner {
    pub fn new(pid: u32, vram: u64, total: u64, devices: Vec<DeviceInfo>) -> Self {
        let vram_by_device = devices
            .iter()
            .map(|d| (d.id.clone(), vram / devices.len().max(1) as u64))
            .collect();
        Self {
            pid,
            vram,
            total,
            devices,
            exited: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            load_delay: None,
            fail_load: false,
            ping_ok: AtomicBool::new(true),
            tokens_generated: AtomicU32::new(0),
            vram_by_device: Mutex::new(vram_by_device),
            close_count: AtomicU64::new(0),
        }
    }

    pub fn failing_to_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    pub fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> u64 {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunnerHandle for MockRunner {
    async fn load(
        &self,
        _gpus: &[DeviceId],
        _options: &RunnerOptions,
        require_full: bool,
    ) -> Result<(), RunnerError> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_load {
            if require_full {
                return Err(RunnerError::LoadRequiredFull);
            }
            return Err(RunnerError::WorkerCrashed);
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn completion(
        &self,
        req: CompletionRequest,
    ) -> Result<
        std::pin::Pin<Box<dyn futures::Stream<Item = Result<CompletionChunk, RunnerError>> + Send>>,
        RunnerError,
    > {
        if self.exited.load(Ordering::SeqCst) {
            return Err(RunnerError::AlreadyExited);
        }
        self.tokens_generated.fetch_add(1, Ordering::SeqCst);
        let echo = format!("echo: {}", req.prompt);
        let s = stream::iter(vec![Ok(CompletionChunk {
            text: echo,
            done: true,
        })]);
        Ok(Box::pin(s))
    }

    async fn embedding(&self, req: EmbeddingRequest) -> Result<EmbeddingResponse, RunnerError> {
        if self.exited.load(Ordering::SeqCst) {
            return Err(RunnerError::AlreadyExited);
        }
        let vectors = req.input.iter().map(|s| vec![s.len() as f32]).collect();
        Ok(EmbeddingResponse { vectors })
    }

    async fn tokenize(&self, text: &str) -> Result<Vec<u32>, RunnerError> {
        Ok(text.bytes().map(u32::from).collect())
    }

    async fn ping(&self, _timeout: Duration) -> Result<(), RunnerError> {
        if self.exited.load(Ordering::SeqCst) {
            return Err(RunnerError::AlreadyExited);
        }
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RunnerError::PingTimeout(_timeout))
        }
    }

    async fn close(&self) -> Result<(), RunnerError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.exited.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn vram_by_gpu(&self, device: &DeviceId) -> u64 {
        self.vram_by_device
            .lock()
            .unwrap()
            .get(device)
            .copied()
            .unwrap_or(0)
    }

    fn vram_size(&self) -> u64 {
        self.vram
    }

    fn total_size(&self) -> u64 {
        self.total
    }

    fn get_device_infos(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }

    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo {
            id: DeviceId(id.to_string()),
            total_memory: 16 << 30,
            free_memory: 16 << 30,
            minimum_memory: 256 << 20,
            is_discrete: true,
            skips_vram_recovery_wait: false,
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_in_call_count_but_exits_once() {
        let r = MockRunner::new(1, 1024, 2048, vec![device("gpu0")]);
        assert!(!r.has_exited());
        r.close().await.unwrap();
        r.close().await.unwrap();
        assert!(r.has_exited());
        assert_eq!(r.close_count(), 2);
    }

    #[tokio::test]
    async fn completion_fails_after_exit() {
        let r = MockRunner::new(1, 1024, 2048, vec![device("gpu0")]);
        r.close().await.unwrap();
        let result = r
            .completion(CompletionRequest {
                prompt: "hi".into(),
                max_tokens: 8,
                temperature: 0.5,
                top_logprobs: None,
                session_key: None,
                stream: false,
            })
            .await;
        assert!(matches!(result, Err(RunnerError::AlreadyExited)));
    }

    #[tokio::test]
    async fn failing_runner_surfaces_load_required_full_only_when_asked() {
        let r = MockRunner::new(1, 1024, 2048, vec![device("gpu0")]).failing_to_load();
        let opts = RunnerOptions::default();
        let err = r.load(&[], &opts, false).await.unwrap_err();
        assert!(matches!(err, RunnerError::WorkerCrashed));
        let err = r.load(&[], &opts, true).await.unwrap_err();
        assert!(matches!(err, RunnerError::LoadRequiredFull));
    }
}
