//! # EVO Input
//!
//! Multiprocess sampling of input devices. Each device runs in its own
//! worker process and streams timestamped rows through a shared memory ring
//! that the consumer drains without blocking.
//!
//! # Module Structure
//!
//! - [`device`] - Device contract (`Device`, `Reading`, `Sample`, `Acquired`)
//! - [`handle`] - Consumer handle `MpDevice` and the scoped `Session`
//! - [`supervisor`] - Worker process spawn / readiness / bounded join
//! - [`worker`] - Producer loop and the worker command line
//! - [`registry`] - Device name → sampling entry point
//! - [`tuning`] - Optional worker priority and memory locking
//! - [`config`] - Sampler configuration
//! - [`drivers`] - Built-in simulated devices
//!
//! # Architecture
//!
//! ```text
//! ┌────────────── consumer ──────────────┐        ┌──────── evo_input_worker ────────┐
//! │ MpDevice::start ─► RingLayout        │ spawn  │ DeviceRegistry ─► run_device::<D> │
//! │        │           create_segment    ├───────►│   Acquired<D> ─► RingWriter      │
//! │        ▼                             │        │        │                         │
//! │ MpDevice::read ◄── RingReader ◄──────┼── shm ─┼────────┘                         │
//! └──────────────────────────────────────┘        └──────────────────────────────────┘
//! ```
//!
//! # Custom workers
//!
//! A binary sampling its own devices registers them and hands over to
//! [`worker::run_worker`], then points [`SamplerConfig::worker_program`] (or
//! `EVO_INPUT_WORKER`) at itself.

#![deny(missing_docs)]

pub mod config;
pub mod device;
pub mod drivers;
pub mod error;
pub mod handle;
pub mod registry;
pub mod supervisor;
pub mod tuning;
pub mod worker;

// Re-export key types for convenience
pub use crate::config::{InputConfig, SamplerConfig};
pub use crate::device::{Acquired, Device, Reading, Sample, StreamValue};
pub use crate::error::{DeviceError, InputError};
pub use crate::handle::{MpDevice, Session};
pub use crate::registry::DeviceRegistry;
pub use crate::tuning::TuningFlags;
pub use evo_shared_memory::{Batch, StreamColumn};
