//! System-wide constants for the EVO input workspace.
//!
//! Single source of truth for all numeric limits and default paths.
//! Imported by all crates; values are defined here only.

use std::time::Duration;

/// Smallest ring capacity the allocator will ever produce (rows).
pub const MIN_CAPACITY: usize = 10;

/// Largest ring capacity accepted from configuration (rows).
pub const MAX_CAPACITY: usize = 16 * 1024 * 1024;

/// Sampling frequency assumed when a device declares none (Hz).
pub const DEFAULT_SAMPLING_FREQUENCY_HZ: f64 = 500.0;

/// Minimum shared memory segment size in bytes (one page).
pub const SHM_MIN_SIZE: usize = 4096;

/// Maximum shared memory segment size in bytes (1 GiB).
pub const SHM_MAX_SIZE: usize = 1_073_741_824;

/// CPU cache line size in bytes. Every shared column starts on one.
pub const CACHE_LINE_SIZE: usize = 64;

/// Directory backing POSIX shared memory on Linux.
pub const SHM_DIR: &str = "/dev/shm";

/// File name prefix of every session segment.
pub const SHM_PREFIX: &str = "evo_input_";

/// Magic number identifying an initialized session segment ("EVOINPUT").
pub const SESSION_MAGIC: u64 = 0x4556_4F49_4E50_5554;

/// Maximum number of streams a single device may declare.
pub const MAX_STREAMS: usize = 32;

/// Capacity of a fault message in bytes (UTF-8, truncated on a char boundary).
pub const FAULT_MESSAGE_CAPACITY: usize = 512;

/// Bytes reserved in the session header for the serialized fault record.
pub const FAULT_SLOT_SIZE: usize = 1024;

/// Default bounded wait for the worker to exit after a stop request.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Poll interval used while waiting for readiness or worker exit.
pub const SUPERVISOR_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Worker loop iterations between two parent liveness probes.
pub const LIVENESS_PROBE_INTERVAL: u32 = 1024;

/// Maximum wall time between two parent liveness probes.
pub const LIVENESS_PROBE_PERIOD: Duration = Duration::from_millis(100);

/// Name of the bundled worker executable.
pub const WORKER_BINARY_NAME: &str = "evo_input_worker";

/// Environment variable overriding the worker executable path.
pub const WORKER_PROGRAM_ENV: &str = "EVO_INPUT_WORKER";
