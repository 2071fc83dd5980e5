//! The concrete [`RunnerFactory`] forge-server wires into the scheduler.
//!
//! Spawning and speaking to a real inference worker process is explicitly
//! out of scope; this factory hands the scheduler a [`MockRunner`] sized
//! from the resolved model file, so admission, placement, and eviction all
//! exercise their real code paths against a worker that never actually
//! generates tokens.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use forge_runner::{DeviceInfo, MockRunner, RunnerHandle};
use forge_runtime_core::{DeviceInventory, RunnerFactory, SchedulerError};

pub struct MockRunnerFactory {
    devices: Arc<dyn DeviceInventory>,
    next_pid: AtomicU32,
}

impl MockRunnerFactory {
    pub fn new(devices: Arc<dyn DeviceInventory>) -> Self {
        Self {
            devices,
            next_pid: AtomicU32::new(1),
        }
    }

    fn next_pid(&self) -> u32 {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl RunnerFactory for MockRunnerFactory {
    async fn create(&self, model_path: &Path, _model: &str) -> Result<Arc<dyn RunnerHandle>, SchedulerError> {
        let size = tokio::fs::metadata(model_path).await.map(|m| m.len()).unwrap_or(0);
        let devices: Vec<DeviceInfo> = self.devices.current();
        let pid = self.next_pid();
        Ok(Arc::new(MockRunner::new(pid, size, size, devices)))
    }
}
