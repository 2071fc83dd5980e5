//! VRAM accounting (spec §4.1 "VRAM accounting" / "VRAM recovery").

use std::collections::HashMap;
use std::time::Duration;

use forge_runner::{DeviceId, DeviceInfo};
use tracing::debug;

use crate::types::RunnerRef;

/// Bytes an administrator has configured to withhold from every device's
/// usable budget (`OLLAMA_GPU_OVERHEAD` / `FORGE_GPU_OVERHEAD`).
#[derive(Clone, Copy, Debug, Default)]
pub struct GpuOverhead(pub u64);

/// Recompute each device's free memory by starting from the OS-reported
/// snapshot and subtracting the overhead, the device's own minimum
/// reservation, and the predicted usage of every currently loaded runner.
///
/// Clamps to zero if predicted usage exceeds the reported total, per spec.
pub fn free_memory_by_device(
    devices: &[DeviceInfo],
    loaded: &[RunnerRef],
    overhead: GpuOverhead,
) -> HashMap<DeviceId, u64> {
    let mut predicted_usage: HashMap<DeviceId, u64> = HashMap::new();
    for runner in loaded {
        for gpu in runner.gpus() {
            let usage = runner.handle().vram_by_gpu(gpu);
            *predicted_usage.entry(gpu.clone()).or_insert(0) += usage;
        }
    }

    devices
        .iter()
        .map(|d| {
            let used = predicted_usage.get(&d.id).copied().unwrap_or(0);
            let reserved = overhead.0 + d.minimum_memory;
            let usable_total = d.free_memory.saturating_sub(reserved);
            let free = usable_total.saturating_sub(used);
            (d.id.clone(), free)
        })
        .collect()
}

/// Default fraction of a runner's reported VRAM that must be observed
/// freed before a placement decision trusts the new numbers (spec §4.1).
pub const VRAM_RECOVERY_FRACTION: f64 = 0.75;
pub const VRAM_RECOVERY_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const VRAM_RECOVERY_DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `query_free` until free memory on `device` rises by at least
/// `VRAM_RECOVERY_FRACTION` of `expected_freed`, or `timeout` elapses.
///
/// Pure-CPU, Metal-only, and iGPU-only placements should never call this —
/// the caller checks `DeviceInfo::skips_vram_recovery_wait` first.
pub async fn wait_for_vram_recovery<F>(
    baseline_free: u64,
    expected_freed: u64,
    timeout: Duration,
    mut query_free: F,
) where
    F: FnMut() -> u64,
{
    if expected_freed == 0 {
        return;
    }
    let threshold = baseline_free + (expected_freed as f64 * VRAM_RECOVERY_FRACTION) as u64;
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let current = query_free();
        if current >= threshold {
            debug!(current, threshold, "vram recovery observed");
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            debug!(current, threshold, "vram recovery timed out");
            return;
        }
        tokio::time::sleep(VRAM_RECOVERY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, free: u64, min: u64) -> DeviceInfo {
        DeviceInfo {
            id: DeviceId(id.to_string()),
            total_memory: free,
            free_memory: free,
            minimum_memory: min,
            is_discrete: true,
            skips_vram_recovery_wait: false,
        }
    }

    #[test]
    fn free_memory_subtracts_overhead_and_minimum() {
        let devices = vec![device("gpu0", 1000, 100)];
        let free = free_memory_by_device(&devices, &[], GpuOverhead(50));
        assert_eq!(free[&DeviceId("gpu0".into())], 850);
    }

    #[test]
    fn free_memory_clamps_at_zero_when_overcommitted() {
        let devices = vec![device("gpu0", 100, 0)];
        let free = free_memory_by_device(&devices, &[], GpuOverhead(200));
        assert_eq!(free[&DeviceId("gpu0".into())], 0);
    }

    #[tokio::test]
    async fn vram_recovery_returns_once_threshold_crossed() {
        let mut calls = 0u32;
        wait_for_vram_recovery(0, 1000, Duration::from_secs(1), || {
            calls += 1;
            if calls < 3 {
                0
            } else {
                800
            }
        })
        .await;
        assert!(calls >= 3);
    }

    #[tokio::test]
    async fn vram_recovery_times_out_if_never_reached() {
        let start = tokio::time::Instant::now();
        wait_for_vram_recovery(0, 1000, Duration::from_millis(50), || 0).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn vram_recovery_skips_wait_when_nothing_expected_freed() {
        wait_for_vram_recovery(0, 0, Duration::from_secs(10), || {
            panic!("should not poll when expected_freed is zero")
        })
        .await;
    }
}
