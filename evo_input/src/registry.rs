//! Device registry for the worker process.
//!
//! The worker receives a device *name* on its command line. The registry maps
//! that name to a runner monomorphized for the concrete [`Device`] type, so
//! the sampling loop is fully static once dispatched.

use crate::device::Device;
use crate::worker::{WorkerArgs, WorkerExit, run_device};
use std::collections::HashMap;

/// Sampling entry point for one device type.
pub type DeviceRunner = fn(&WorkerArgs) -> WorkerExit;

/// Registry of devices a worker binary can sample.
///
/// Constructed at startup, populated via [`register`](Self::register), and
/// passed to [`run_worker`](crate::worker::run_worker). No global state.
pub struct DeviceRegistry {
    runners: HashMap<&'static str, DeviceRunner>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    /// Register device type `D` under [`Device::NAME`].
    ///
    /// # Panics
    /// Panics if a device with the same name is already registered.
    pub fn register<D: Device>(&mut self) {
        self.register_runner(D::NAME, run_device::<D>);
    }

    /// Register a runner under an explicit name.
    ///
    /// # Panics
    /// Panics if a device with the same name is already registered.
    pub fn register_runner(&mut self, name: &'static str, runner: DeviceRunner) {
        if self.runners.contains_key(name) {
            panic!("Device '{name}' is already registered");
        }
        self.runners.insert(name, runner);
    }

    /// Get the runner for `name`.
    pub fn runner(&self, name: &str) -> Option<DeviceRunner> {
        self.runners.get(name).copied()
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.runners.contains_key(name)
    }

    /// List all registered device names.
    pub fn list_devices(&self) -> Vec<&'static str> {
        self.runners.keys().copied().collect()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
