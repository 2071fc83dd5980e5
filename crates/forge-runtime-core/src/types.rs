use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use forge_runner::{DeviceId, RunnerHandle, RunnerOptions};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Key identifying one loaded runner slot: the resolved on-disk model path.
pub type ModelPath = PathBuf;

/// A mutable record owned exclusively by the scheduler (spec §3). Shared
/// with request handlers only through the logical refcount in
/// [`RunnerRefInner`] — never through direct field access — so eviction
/// decisions always observe a consistent snapshot.
#[derive(Clone)]
pub struct RunnerRef {
    inner: Arc<RunnerRefInner>,
}

impl std::fmt::Debug for RunnerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRef")
            .field("model_path", &self.inner.model_path)
            .field("model", &self.inner.model)
            .field("pid", &self.inner.pid)
            .finish()
    }
}

struct RunnerRefInner {
    model_path: ModelPath,
    model: String,
    options: RunnerOptions,
    handle: Arc<dyn RunnerHandle>,
    pid: u32,
    gpus: Vec<DeviceId>,
    discrete_gpus: bool,
    vram_size: u64,
    total_size: u64,
    num_parallel: u32,

    // Mutated by the pending and completion workers; guarded together so a
    // snapshot of refcount/loading/session_duration is always consistent.
    mutable: Mutex<MutableState>,
    ref_count: AtomicU64,
    loading: AtomicBool,
}

struct MutableState {
    session_duration: Duration,
    expires_at: Option<Instant>,
    expire_timer: Option<JoinHandle<()>>,
}

impl RunnerRef {
    pub fn new(
        model_path: ModelPath,
        model: String,
        options: RunnerOptions,
        handle: Arc<dyn RunnerHandle>,
        pid: u32,
        gpus: Vec<DeviceId>,
        discrete_gpus: bool,
        vram_size: u64,
        total_size: u64,
        num_parallel: u32,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerRefInner {
                model_path,
                model,
                options,
                handle,
                pid,
                gpus,
                discrete_gpus,
                vram_size,
                total_size,
                num_parallel,
                mutable: Mutex::new(MutableState {
                    session_duration: Duration::ZERO,
                    expires_at: None,
                    expire_timer: None,
                }),
                ref_count: AtomicU64::new(0),
                loading: AtomicBool::new(true),
            }),
        }
    }

    pub fn model_path(&self) -> &ModelPath {
        &self.inner.model_path
    }

    pub fn model(&self) -> &str {
        &self.inner.model
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.inner.options
    }

    pub fn handle(&self) -> &Arc<dyn RunnerHandle> {
        &self.inner.handle
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn gpus(&self) -> &[DeviceId] {
        &self.inner.gpus
    }

    pub fn discrete_gpus(&self) -> bool {
        self.inner.discrete_gpus
    }

    pub fn vram_size(&self) -> u64 {
        self.inner.vram_size
    }

    pub fn total_size(&self) -> u64 {
        self.inner.total_size
    }

    pub fn num_parallel(&self) -> u32 {
        self.inner.num_parallel
    }

    /// `ref_count ≥ 0` is an invariant (spec §3, §8); the counter is
    /// unsigned so the type system enforces it.
    pub fn ref_count(&self) -> u64 {
        self.inner.ref_count.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    pub fn mark_loading_done(&self) {
        self.inner.loading.store(false, Ordering::SeqCst);
    }

    pub fn increment_ref(&self) -> u64 {
        self.inner.ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement, saturating at zero. Returns the new value.
    pub fn decrement_ref(&self) -> u64 {
        loop {
            let current = self.inner.ref_count.load(Ordering::SeqCst);
            if current == 0 {
                return 0;
            }
            if self
                .inner
                .ref_count
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return current - 1;
            }
        }
    }

    pub async fn session_duration(&self) -> Duration {
        self.inner.mutable.lock().await.session_duration
    }

    pub async fn set_session_duration(&self, d: Duration) {
        self.inner.mutable.lock().await.session_duration = d;
    }

    /// Cancel any pending expiration timer. Used when the runner is
    /// re-admitted for a new request (spec §4.1 admission step).
    pub async fn stop_timer(&self) {
        let mut state = self.inner.mutable.lock().await;
        if let Some(handle) = state.expire_timer.take() {
            handle.abort();
        }
        state.expires_at = None;
    }

    /// Arm a timer that fires `on_expire` after `session_duration` elapses.
    pub async fn arm_timer<F>(&self, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.mutable.lock().await;
        if let Some(old) = state.expire_timer.take() {
            old.abort();
        }
        let dur = state.session_duration;
        state.expires_at = Some(Instant::now() + dur);
        state.expire_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(dur).await;
            on_expire();
        }));
    }

    /// Identity comparison: two `RunnerRef`s refer to the same loaded
    /// process iff their PIDs match, used by the completion worker to
    /// detect orphaned expirations from a failed load (spec §4.1).
    pub fn same_process(&self, other: &RunnerRef) -> bool {
        self.inner.pid == other.inner.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_runner::{DeviceInfo, MockRunner};

    fn make_ref(pid: u32) -> RunnerRef {
        let mock = Arc::new(MockRunner::new(pid, 1024, 2048, vec![]));
        RunnerRef::new(
            PathBuf::from("/models/m"),
            "m".into(),
            RunnerOptions::default(),
            mock,
            pid,
            vec![],
            true,
            1024,
            2048,
            1,
        )
    }

    #[test]
    fn ref_count_never_goes_negative() {
        let r = make_ref(1);
        assert_eq!(r.decrement_ref(), 0);
        assert_eq!(r.ref_count(), 0);
        r.increment_ref();
        assert_eq!(r.decrement_ref(), 0);
    }

    #[tokio::test]
    async fn stop_timer_cancels_armed_timer() {
        let r = make_ref(1);
        r.set_session_duration(Duration::from_millis(10)).await;
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        r.arm_timer(move || fired2.store(true, Ordering::SeqCst))
            .await;
        r.stop_timer().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn same_process_compares_pid() {
        let a = make_ref(7);
        let b = make_ref(7);
        let c = make_ref(8);
        assert!(a.same_process(&b));
        assert!(!a.same_process(&c));
    }
}
