//! Built-in devices.
//!
//! - [`simulation`] - Software devices for development and testing
//!
//! # Adding New Devices
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the [`Device`](crate::device::Device) trait
//! 3. Register it in [`register_all_devices`]

pub mod simulation;

use crate::registry::DeviceRegistry;

/// Register every built-in device.
pub fn register_all_devices(registry: &mut DeviceRegistry) {
    registry.register::<simulation::CounterDevice>();
    registry.register::<simulation::SineDevice>();
}
