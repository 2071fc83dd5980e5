//! The model runner scheduler: admission, GPU placement, eviction,
//! lifecycle, VRAM accounting, and reload detection (spec §4.1).

mod device_inventory;
mod error;
mod eviction;
mod scheduler;
mod types;
mod vram;

pub use device_inventory::{DeviceInventory, StaticDeviceInventory};
pub use error::SchedulerError;
pub use eviction::{EvictionPolicy, LeastRecentlyUsed, LongestSession};
pub use scheduler::{RunnerFactory, Scheduler, SchedulerConfig, DEFAULT_MODELS_PER_GPU};
pub use types::{ModelPath, RunnerRef};
pub use vram::{free_memory_by_device, wait_for_vram_recovery, GpuOverhead};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use async_trait::async_trait;
    use forge_runner::{DeviceId, DeviceInfo, MockRunner, RunnerHandle, RunnerOptions};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingFactory {
        next_pid: AtomicU32,
        vram: u64,
        total: u64,
        fail: bool,
        load_delay: Option<Duration>,
    }

    impl CountingFactory {
        fn new(vram: u64, total: u64) -> Self {
            Self {
                next_pid: AtomicU32::new(1),
                vram,
                total,
                fail: false,
                load_delay: None,
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn with_load_delay(mut self, delay: Duration) -> Self {
            self.load_delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl RunnerFactory for CountingFactory {
        async fn create(
            &self,
            _model_path: &Path,
            _model: &str,
        ) -> Result<Arc<dyn RunnerHandle>, SchedulerError> {
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            let devices = vec![DeviceInfo {
                id: DeviceId("gpu0".into()),
                total_memory: 16 << 30,
                free_memory: 16 << 30,
                minimum_memory: 0,
                is_discrete: true,
                skips_vram_recovery_wait: true,
            }];
            let mut mock = MockRunner::new(pid, self.vram, self.total, devices);
            if self.fail {
                mock = mock.failing_to_load();
            }
            if let Some(delay) = self.load_delay {
                mock = mock.with_load_delay(delay);
            }
            Ok(Arc::new(mock))
        }
    }

    fn devices(n: usize) -> Arc<StaticDeviceInventory> {
        Arc::new(StaticDeviceInventory(
            (0..n)
                .map(|i| DeviceInfo {
                    id: DeviceId(format!("gpu{i}")),
                    total_memory: 16 << 30,
                    free_memory: 16 << 30,
                    minimum_memory: 0,
                    is_discrete: true,
                    skips_vram_recovery_wait: true,
                })
                .collect(),
        ))
    }

    #[tokio::test]
    async fn get_runner_loads_and_increments_refcount() {
        let scheduler = Scheduler::start(
            SchedulerConfig::default(),
            Arc::new(CountingFactory::new(1024, 2048)),
            devices(1),
        );
        let r = scheduler
            .get_runner(PathBuf::from("/models/a"), "a", RunnerOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(r.ref_count(), 1);
        scheduler.release(&r).await;
    }

    #[tokio::test]
    async fn second_request_for_same_compatible_model_reuses_runner() {
        let scheduler = Scheduler::start(
            SchedulerConfig::default(),
            Arc::new(CountingFactory::new(1024, 2048)),
            devices(1),
        );
        let opts = RunnerOptions::default();
        let r1 = scheduler
            .get_runner(PathBuf::from("/models/a"), "a", opts.clone(), None)
            .await
            .unwrap();
        let r2 = scheduler
            .get_runner(PathBuf::from("/models/a"), "a", opts, None)
            .await
            .unwrap();
        assert_eq!(r1.pid(), r2.pid());
        assert_eq!(r2.ref_count(), 2);
    }

    #[tokio::test]
    async fn queue_saturation_returns_max_queue_error() {
        // max_queue=1: the pending worker is kept busy on a slow first
        // load, so a second queued request fills the channel and a third
        // is rejected synchronously (spec §8 scenario 1).
        let mut cfg = SchedulerConfig::default();
        cfg.max_queue = 1;
        let scheduler = Scheduler::start(
            cfg,
            Arc::new(CountingFactory::new(1024, 2048).with_load_delay(Duration::from_millis(150))),
            devices(1),
        );

        let opts = RunnerOptions::default();
        let first = {
            let s = scheduler.clone();
            let opts = opts.clone();
            tokio::spawn(async move {
                s.get_runner(PathBuf::from("/models/a"), "a", opts, None).await
            })
        };
        // Give the pending worker time to dequeue the first request and
        // enter its (slow) load, so the channel is empty again for `second`.
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = {
            let s = scheduler.clone();
            let opts = opts.clone();
            tokio::spawn(async move {
                s.get_runner(PathBuf::from("/models/b"), "b", opts, None).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let third = scheduler
            .get_runner(PathBuf::from("/models/c"), "c", opts, None)
            .await;
        assert!(matches!(third, Err(SchedulerError::MaxQueue)));

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn expire_runner_forces_unload() {
        let scheduler = Scheduler::start(
            SchedulerConfig::default(),
            Arc::new(CountingFactory::new(1024, 2048)),
            devices(1),
        );
        let r = scheduler
            .get_runner(PathBuf::from("/models/a"), "a", RunnerOptions::default(), None)
            .await
            .unwrap();
        scheduler.release(&r).await;
        scheduler.expire_runner(Path::new("/models/a")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.list_loaded().await.is_empty());
    }

    #[tokio::test]
    async fn failing_factory_surfaces_worker_failed() {
        let scheduler = Scheduler::start(
            SchedulerConfig::default(),
            Arc::new(CountingFactory::new(1024, 2048).failing()),
            devices(1),
        );
        let err = scheduler
            .get_runner(PathBuf::from("/models/a"), "a", RunnerOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::WorkerFailed(_)));
    }
}
