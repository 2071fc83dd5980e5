//! The model runner scheduler (spec §4.1).
//!
//! Runs exactly two long-lived workers, `run_pending` and `run_completed`
//! (spec §5): the pending worker is the sole writer of the "currently
//! loading" slot and the authoritative decider for placement/eviction; the
//! completion worker is the sole reader of the `expired` and `finished`
//! channels.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forge_runner::{DeviceId, RunnerError, RunnerHandle, RunnerOptions};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::device_inventory::DeviceInventory;
use crate::error::SchedulerError;
use crate::eviction::{EvictionPolicy, LongestSession};
use crate::types::{ModelPath, RunnerRef};
use crate::vram::{self, GpuOverhead};

pub const DEFAULT_MODELS_PER_GPU: usize = 3;
const COLD_LOAD_PING_TIMEOUT: Duration = Duration::from_secs(10);
const LOADING_PING_TIMEOUT: Duration = Duration::from_secs(120);
const EXPIRED_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Constructs a fresh, not-yet-loaded runner handle for a model path.
///
/// Stands in for the source's `new_server` factory + worker process spawn.
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    async fn create(&self, model_path: &Path, model: &str) -> Result<Arc<dyn RunnerHandle>, SchedulerError>;
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// `0`/`None` = auto = `default_models_per_gpu * max(gpus, 1)`.
    pub max_runners: Option<usize>,
    pub max_queue: usize,
    pub default_models_per_gpu: usize,
    pub gpu_overhead: GpuOverhead,
    pub vram_recovery_timeout: Duration,
    pub default_keep_alive: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_runners: None,
            max_queue: 512,
            default_models_per_gpu: DEFAULT_MODELS_PER_GPU,
            gpu_overhead: GpuOverhead(0),
            vram_recovery_timeout: vram::VRAM_RECOVERY_DEFAULT_TIMEOUT,
            default_keep_alive: Duration::from_secs(5 * 60),
        }
    }
}

struct PendingRequest {
    model_path: ModelPath,
    model: String,
    options: RunnerOptions,
    keep_alive: Duration,
    /// `num_gpu = 0` forces CPU placement with an empty device list.
    force_cpu: bool,
    reply_tx: oneshot::Sender<Result<RunnerRef, SchedulerError>>,
}

#[derive(Debug, Clone, Copy)]
struct FinishedEvent {
    pid: u32,
}

#[derive(Debug, Clone, Copy)]
struct ExpiredEvent {
    pid: u32,
}

/// Handle cloned by callers and by the two background workers. Holds only
/// channel senders and the shared `loaded` map; the workers own the receive
/// ends internally.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    config: SchedulerConfig,
    factory: Arc<dyn RunnerFactory>,
    devices: Arc<dyn DeviceInventory>,
    policy: Arc<dyn EvictionPolicy>,
    loaded: Mutex<HashMap<ModelPath, RunnerRef>>,
    /// Serializes cold loads process-wide: at most one runner is `loading`
    /// at any instant (spec §4.1 "Serialization of cold loads").
    active_loading: Mutex<Option<ModelPath>>,
    pending_tx: mpsc::Sender<PendingRequest>,
    finished_tx: mpsc::Sender<FinishedEvent>,
    expired_tx: mpsc::Sender<ExpiredEvent>,
    unloaded_tx: broadcast::Sender<u32>,
}

impl Scheduler {
    pub fn start(
        config: SchedulerConfig,
        factory: Arc<dyn RunnerFactory>,
        devices: Arc<dyn DeviceInventory>,
    ) -> Self {
        Self::start_with_policy(config, factory, devices, Arc::new(LongestSession))
    }

    pub fn start_with_policy(
        config: SchedulerConfig,
        factory: Arc<dyn RunnerFactory>,
        devices: Arc<dyn DeviceInventory>,
        policy: Arc<dyn EvictionPolicy>,
    ) -> Self {
        let (pending_tx, pending_rx) = mpsc::channel(config.max_queue);
        let (finished_tx, finished_rx) = mpsc::channel(1024);
        let (expired_tx, expired_rx) = mpsc::channel(1024);
        let (unloaded_tx, _) = broadcast::channel(1024);

        let shared = Arc::new(Shared {
            config,
            factory,
            devices,
            policy,
            loaded: Mutex::new(HashMap::new()),
            active_loading: Mutex::new(None),
            pending_tx,
            finished_tx,
            expired_tx,
            unloaded_tx,
        });

        let scheduler = Self { shared };

        let pending_scheduler = scheduler.clone();
        tokio::spawn(async move {
            pending_scheduler.run_pending(pending_rx).await;
        });

        let completed_scheduler = scheduler.clone();
        tokio::spawn(async move {
            completed_scheduler
                .run_completed(finished_rx, expired_rx)
                .await;
        });

        scheduler
    }

    /// Serve `GetRunner`. On success the returned runner's `ref_count` has
    /// been incremented; the caller releases by calling [`Scheduler::release`].
    pub async fn get_runner(
        &self,
        model_path: impl Into<ModelPath>,
        model: impl Into<String>,
        options: RunnerOptions,
        keep_alive: Option<Duration>,
    ) -> Result<RunnerRef, SchedulerError> {
        let model_path = model_path.into();
        let force_cpu = options.num_gpu == 0;

        {
            let loaded = self.shared.loaded.lock().await;
            if let Some(existing) = loaded.get(&model_path) {
                if self.is_compatible(existing, &options).await {
                    existing.increment_ref();
                    existing.stop_timer().await;
                    existing
                        .set_session_duration(keep_alive.unwrap_or(self.shared.config.default_keep_alive))
                        .await;
                    return Ok(existing.clone());
                }
            }
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let req = PendingRequest {
            model_path,
            model: model.into(),
            options,
            keep_alive: keep_alive.unwrap_or(self.shared.config.default_keep_alive),
            force_cpu,
            reply_tx,
        };

        self.shared
            .pending_tx
            .try_send(req)
            .map_err(|_| SchedulerError::MaxQueue)?;

        reply_rx.await.map_err(|_| SchedulerError::ShuttingDown)?
    }

    /// Caller releases a logical reference obtained from [`Scheduler::get_runner`].
    pub async fn release(&self, runner: &RunnerRef) {
        let new_count = runner.decrement_ref();
        debug!(pid = runner.pid(), new_count, "runner released");
        let _ = self
            .shared
            .finished_tx
            .send(FinishedEvent { pid: runner.pid() })
            .await;
    }

    /// Force immediate unload of a loaded model (`ExpireRunner`, spec §4.5).
    pub async fn expire_runner(&self, model_path: &Path) {
        let loaded = self.shared.loaded.lock().await;
        if let Some(runner) = loaded.get(model_path) {
            runner.set_session_duration(Duration::ZERO).await;
            runner.stop_timer().await;
            let _ = self
                .shared
                .expired_tx
                .send(ExpiredEvent { pid: runner.pid() })
                .await;
        }
    }

    /// List currently loaded runners (`GET /api/ps` per spec §4.5).
    pub async fn list_loaded(&self) -> Vec<RunnerRef> {
        self.shared.loaded.lock().await.values().cloned().collect()
    }

    /// Shut down: expire every loaded runner (`Unload_all`, spec §4.5).
    pub async fn unload_all(&self) {
        let paths: Vec<PathBuf> = self.shared.loaded.lock().await.keys().cloned().collect();
        for path in paths {
            self.expire_runner(&path).await;
        }
    }

    /// Compatibility predicate (`needs_reload`, spec §4.1): adapters,
    /// projectors, and options equal (treating `num_gpu < 0` as
    /// "don't care"), plus a successful health ping.
    async fn is_compatible(&self, runner: &RunnerRef, requested: &RunnerOptions) -> bool {
        let current = runner.options();
        if current.adapters != requested.adapters || current.projectors != requested.projectors {
            return false;
        }
        let num_gpu_matches =
            requested.num_gpu < 0 || current.num_gpu < 0 || current.num_gpu == requested.num_gpu;
        if !num_gpu_matches {
            return false;
        }
        if current.num_ctx != requested.num_ctx || current.extra != requested.extra {
            return false;
        }

        let timeout = if runner.is_loading() {
            LOADING_PING_TIMEOUT
        } else {
            COLD_LOAD_PING_TIMEOUT
        };
        runner.handle().ping(timeout).await.is_ok()
    }

    fn compute_max_runners(&self, gpu_count: usize) -> usize {
        self.shared
            .config
            .max_runners
            .filter(|&n| n > 0)
            .unwrap_or_else(|| self.shared.config.default_models_per_gpu * gpu_count.max(1))
    }

    // ── Pending worker ──────────────────────────────────────────────────

    async fn run_pending(&self, mut rx: mpsc::Receiver<PendingRequest>) {
        while let Some(req) = rx.recv().await {
            let result = self.handle_pending(req.model_path.clone(), &req).await;
            let _ = req.reply_tx.send(result);
        }
    }

    async fn handle_pending(
        &self,
        model_path: ModelPath,
        req: &PendingRequest,
    ) -> Result<RunnerRef, SchedulerError> {
        // Re-check: another request may have loaded/evicted this model
        // while we waited in the queue.
        {
            let loaded = self.shared.loaded.lock().await;
            if let Some(existing) = loaded.get(&model_path) {
                if self.is_compatible(existing, &req.options).await {
                    existing.increment_ref();
                    existing.stop_timer().await;
                    existing.set_session_duration(req.keep_alive).await;
                    return Ok(existing.clone());
                }
            }
        }

        loop {
            let loaded: Vec<RunnerRef> = self.shared.loaded.lock().await.values().cloned().collect();
            let loaded_count = loaded.len();

            // Re-query the OS-reported snapshot on every pass: eviction in a
            // prior iteration, or another process, may have changed it.
            let devices = if req.force_cpu {
                Vec::new()
            } else {
                self.shared.devices.current()
            };
            let max_runners = self.compute_max_runners(devices.len());

            if loaded_count >= max_runners {
                if !self.evict_one().await {
                    return Err(SchedulerError::LoadRequiredFull);
                }
                continue;
            }

            // VRAM accounting (spec §4.1): subtract every loaded runner's
            // reported per-device usage, overhead, and minimum reservation
            // from the OS snapshot, then restrict placement to devices that
            // still have room.
            let gpu_ids: Vec<DeviceId> = if devices.is_empty() {
                Vec::new()
            } else {
                let free = vram::free_memory_by_device(&devices, &loaded, self.shared.config.gpu_overhead);
                devices
                    .iter()
                    .filter(|d| free.get(&d.id).copied().unwrap_or(0) > 0)
                    .map(|d| d.id.clone())
                    .collect()
            };

            if !devices.is_empty() && gpu_ids.is_empty() {
                // Every candidate device is already fully accounted for.
                if !self.evict_one().await {
                    return Err(SchedulerError::LoadRequiredFull);
                }
                continue;
            }

            // A runner squeezed onto a subset of the candidate devices must
            // fit entirely or fail, same as when another runner is already
            // loaded.
            let require_full = loaded_count > 0 || gpu_ids.len() < devices.len();

            match self.load_one(&model_path, req, &gpu_ids, require_full).await {
                Ok(runner) => return Ok(runner),
                Err(SchedulerError::LoadRequiredFull) if require_full => {
                    if !self.evict_one().await {
                        return Err(SchedulerError::LoadRequiredFull);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn load_one(
        &self,
        model_path: &Path,
        req: &PendingRequest,
        gpu_ids: &[DeviceId],
        require_full: bool,
    ) -> Result<RunnerRef, SchedulerError> {
        // Serialize cold loads: only one runner may be `loading` process-wide.
        let mut active = self.shared.active_loading.lock().await;
        *active = Some(model_path.to_path_buf());

        let handle = self.shared.factory.create(model_path, &req.model).await?;
        let pid = handle.pid();

        let load_result = handle.load(gpu_ids, &req.options, require_full).await;
        *active = None;
        drop(active);

        match load_result {
            Err(RunnerError::LoadRequiredFull) => return Err(SchedulerError::LoadRequiredFull),
            Err(e) => {
                warn!(error = %e, "runner failed to load");
                let _ = self.shared.expired_tx.send(ExpiredEvent { pid }).await;
                return Err(SchedulerError::WorkerFailed(e));
            }
            Ok(()) => {}
        }

        let vram_size = handle.vram_size();
        let total_size = handle.total_size();
        let runner = RunnerRef::new(
            model_path.to_path_buf(),
            req.model.clone(),
            req.options.clone(),
            handle,
            pid,
            gpu_ids.to_vec(),
            !gpu_ids.is_empty(),
            vram_size,
            total_size,
            req.options.num_parallel.max(1),
        );
        runner.mark_loading_done();
        runner.increment_ref();
        runner.set_session_duration(req.keep_alive).await;

        self.shared
            .loaded
            .lock()
            .await
            .insert(model_path.to_path_buf(), runner.clone());

        info!(pid, model = %req.model, "runner loaded");
        Ok(runner)
    }

    /// Pick and unload a victim; blocks until it is fully unloaded (spec
    /// §5: "a victim is fully unloaded ... before the next load begins").
    /// Returns `false` if there was nothing to evict.
    async fn evict_one(&self) -> bool {
        let candidates: Vec<RunnerRef> = self.shared.loaded.lock().await.values().cloned().collect();
        if candidates.is_empty() {
            return false;
        }

        let mut durations = Vec::with_capacity(candidates.len());
        for c in &candidates {
            durations.push(c.session_duration().await);
        }

        let victim = match self.shared.policy.select(&candidates, &durations) {
            Some(v) => v.clone(),
            None => return false,
        };

        let pid = victim.pid();
        victim.set_session_duration(Duration::ZERO).await;
        victim.stop_timer().await;

        let mut rx = self.shared.unloaded_tx.subscribe();
        if victim.ref_count() == 0 {
            let _ = self.shared.expired_tx.send(ExpiredEvent { pid }).await;
        }

        loop {
            match rx.recv().await {
                Ok(unloaded_pid) if unloaded_pid == pid => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    }

    // ── Completion worker ───────────────────────────────────────────────

    async fn run_completed(
        &self,
        mut finished_rx: mpsc::Receiver<FinishedEvent>,
        mut expired_rx: mpsc::Receiver<ExpiredEvent>,
    ) {
        loop {
            tokio::select! {
                Some(ev) = finished_rx.recv() => self.on_finished(ev).await,
                Some(ev) = expired_rx.recv() => self.on_expired(ev).await,
                else => break,
            }
        }
    }

    async fn on_finished(&self, ev: FinishedEvent) {
        let loaded = self.shared.loaded.lock().await;
        let runner = loaded.values().find(|r| r.pid() == ev.pid).cloned();
        drop(loaded);

        let Some(runner) = runner else { return };
        if runner.ref_count() == 0 {
            let duration = runner.session_duration().await;
            if duration.is_zero() {
                let _ = self
                    .shared
                    .expired_tx
                    .send(ExpiredEvent { pid: ev.pid })
                    .await;
            } else {
                let tx = self.shared.expired_tx.clone();
                let pid = ev.pid;
                runner
                    .arm_timer(move || {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            let _ = tx.send(ExpiredEvent { pid }).await;
                        });
                    })
                    .await;
            }
        }
    }

    async fn on_expired(&self, ev: ExpiredEvent) {
        let loaded = self.shared.loaded.lock().await;
        let runner = loaded.values().find(|r| r.pid() == ev.pid).cloned();
        let model_path = runner.as_ref().map(|r| r.model_path().clone());
        drop(loaded);

        let Some(runner) = runner else {
            // Orphan from a failed load: nothing in the map references this
            // PID. Nothing to close here, the loader already surfaced the error.
            return;
        };

        if runner.ref_count() > 0 {
            let tx = self.shared.expired_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(EXPIRED_RETRY_DELAY).await;
                let _ = tx.send(ev).await;
            });
            return;
        }

        let model_path = model_path.expect("runner present implies model_path present");
        let mut loaded = self.shared.loaded.lock().await;
        let still_current = loaded
            .get(&model_path)
            .is_some_and(|current| current.same_process(&runner));
        if !still_current {
            // Orphan: the map's entry for this path was replaced by a newer
            // load already. Close this stale handle without touching the map.
            drop(loaded);
            let _ = runner.handle().close().await;
            let _ = self.shared.unloaded_tx.send(ev.pid);
            return;
        }
        loaded.remove(&model_path);
        drop(loaded);

        let skip_wait = runner
            .handle()
            .get_device_infos()
            .iter()
            .all(|d| d.skips_vram_recovery_wait);
        if !skip_wait && !runner.gpus().is_empty() {
            let devices = self.shared.devices.clone();
            let device_id = runner.gpus()[0].clone();
            let baseline = devices
                .current()
                .into_iter()
                .find(|d| d.id == device_id)
                .map(|d| d.free_memory)
                .unwrap_or(0);
            let expected = runner.vram_size();
            let timeout = self.shared.config.vram_recovery_timeout;
            vram::wait_for_vram_recovery(baseline, expected, timeout, || {
                devices
                    .current()
                    .into_iter()
                    .find(|d| d.id == device_id)
                    .map(|d| d.free_memory)
                    .unwrap_or(0)
            })
            .await;
        }

        let _ = runner.handle().close().await;
        info!(pid = ev.pid, "runner unloaded");
        let _ = self.shared.unloaded_tx.send(ev.pid);
    }
}
