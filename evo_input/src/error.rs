//! Error types for device sampling.

use evo_common::config::ConfigError;
use evo_common::fault::{FaultKind, FaultRecord};
use evo_common::schema::SchemaError;
use evo_shared_memory::ShmError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a device implementation inside the worker.
///
/// They never cross the process boundary as values: the worker turns them
/// into a [`FaultRecord`].
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// Hardware not present or could not be opened
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    /// Device configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Hardware communication failed
    #[error("Communication error: {0}")]
    Communication(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced to the consumer of a sampled device.
#[derive(Debug, Error)]
pub enum InputError {
    /// Device construction or `enter()` failed in the worker
    #[error("Device setup failed: {0}")]
    Setup(FaultRecord),

    /// Device `read()` failed in the worker
    #[error("Device failed while sampling: {0}")]
    Runtime(FaultRecord),

    /// Handle not started, stopped, or its worker is gone
    #[error("Device is closed")]
    ClosedDevice,

    /// `start()` called twice without `stop()`
    #[error("Device already started")]
    AlreadyStarted,

    /// Worker died during setup without reporting a fault
    #[error("Worker exited unexpectedly: {status}")]
    WorkerExited {
        /// Exit status as reported by the OS
        status: String,
    },

    /// Worker did not signal readiness in time
    #[error("Worker not ready after {0:?}")]
    ReadyTimeout(Duration),

    /// Worker did not exit in time after a stop request (it was killed)
    #[error("Worker did not exit within {0:?}")]
    JoinTimeout(Duration),

    /// Worker executable could not be started
    #[error("Failed to spawn worker {program}: {source}")]
    Spawn {
        /// Program that was executed
        program: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Invalid device schema
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Invalid sampler configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Segment or ring failure
    #[error(transparent)]
    Shm(#[from] ShmError),

    /// Device configuration could not be serialized for the worker
    #[error("Device configuration error: {0}")]
    Json(#[from] serde_json::Error),

    /// Process management failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InputError {
    /// Map a captured worker fault onto the consumer-facing taxonomy.
    pub fn from_fault(record: FaultRecord) -> Self {
        match record.kind {
            FaultKind::Setup | FaultKind::Attach => Self::Setup(record),
            FaultKind::Runtime | FaultKind::InvalidSample => Self::Runtime(record),
        }
    }

    /// The captured fault, for `Setup` and `Runtime` errors.
    pub fn fault(&self) -> Option<&FaultRecord> {
        match self {
            Self::Setup(record) | Self::Runtime(record) => Some(record),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_kinds_map_to_setup_or_runtime() {
        let setup = InputError::from_fault(FaultRecord::new(FaultKind::Setup, "no mouse"));
        assert!(matches!(setup, InputError::Setup(_)));
        assert_eq!(setup.fault().unwrap().message.as_str(), "no mouse");

        let attach = InputError::from_fault(FaultRecord::new(FaultKind::Attach, "bad layout"));
        assert!(matches!(attach, InputError::Setup(_)));

        let runtime = InputError::from_fault(FaultRecord::new(FaultKind::InvalidSample, "bad"));
        assert!(matches!(runtime, InputError::Runtime(_)));
        assert!(InputError::ClosedDevice.fault().is_none());
    }

    #[test]
    fn error_display() {
        let err = InputError::from_fault(FaultRecord::new(FaultKind::Runtime, "cable unplugged"));
        assert_eq!(
            err.to_string(),
            "Device failed while sampling: runtime fault: cable unplugged"
        );
        assert!(DeviceError::Unavailable("mouse".into()).to_string().contains("mouse"));
    }
}
