//! # EVO Input Worker Binary
//!
//! Samples one registered device into a session segment created by an
//! `MpDevice` consumer. Not meant to be started by hand.
//!
//! # Usage
//!
//! ```bash
//! evo_input_worker --segment /dev/shm/evo_input_counter_1234_0 \
//!     --device counter --config '{"count":100}' --parent-pid 1234 -v
//! ```

#![deny(warnings)]

use evo_input::drivers::register_all_devices;
use evo_input::registry::DeviceRegistry;
use evo_input::worker::run_worker;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut registry = DeviceRegistry::new();
    register_all_devices(&mut registry);
    run_worker(&registry)
}
