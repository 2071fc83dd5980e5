use forge_runner::DeviceInfo;

/// Queries the current GPU/CPU device inventory. Implementations talk to
/// the OS or driver; forge's core only consumes the interface (spec §4.1
/// "fetch current device inventory").
pub trait DeviceInventory: Send + Sync {
    fn current(&self) -> Vec<DeviceInfo>;
}

/// A fixed inventory, for tests and for `num_gpu=0` (force-CPU) placements
/// which use an empty list per spec §4.1 step 3.
pub struct StaticDeviceInventory(pub Vec<DeviceInfo>);

impl DeviceInventory for StaticDeviceInventory {
    fn current(&self) -> Vec<DeviceInfo> {
        self.0.clone()
    }
}
