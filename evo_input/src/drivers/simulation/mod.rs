//! Simulated devices.
//!
//! They need no hardware and behave deterministically enough for the test
//! suite, while still exercising every path of the worker: batches, absent
//! streams, record elements, pacing, and setup or runtime failures.

mod counter;
mod sine;

pub use counter::{CounterConfig, CounterDevice, CounterEvent};
pub use sine::{SineConfig, SineDevice};
