//! Sampler configuration.
//!
//! ```toml
//! [shared]
//! service_name = "evo-input-mouse"
//! log_level = "info"
//!
//! [sampler]
//! capacity = 2000
//! join_timeout_ms = 1000
//! ready_timeout_ms = 10000
//! worker_program = "/usr/bin/evo_input_worker"
//! raise_priority = true
//! lock_memory = false
//! worker_log_level = "debug"  # defaults to [shared] log_level
//! ```

use crate::tuning::TuningFlags;
use evo_common::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
use evo_common::consts::{DEFAULT_JOIN_TIMEOUT, MAX_CAPACITY, WORKER_BINARY_NAME, WORKER_PROGRAM_ENV};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_join_timeout_ms() -> u64 {
    DEFAULT_JOIN_TIMEOUT.as_millis() as u64
}

/// How a device is sampled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Ring capacity override in rows (the allocator never goes below the
    /// nominal frequency or the minimum capacity)
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Bounded wait for the worker to exit after a stop request
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Bounded wait for readiness; `None` waits until ready or the worker dies
    #[serde(default)]
    pub ready_timeout_ms: Option<u64>,

    /// Worker executable; see [`resolve_worker_program`](Self::resolve_worker_program)
    #[serde(default)]
    pub worker_program: Option<PathBuf>,

    /// Raise worker scheduling priority while sampling
    #[serde(default)]
    pub raise_priority: bool,

    /// Lock worker memory while sampling
    #[serde(default)]
    pub lock_memory: bool,

    /// Worker log level; the worker's own default applies when unset
    #[serde(default)]
    pub worker_log_level: Option<LogLevel>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            join_timeout_ms: default_join_timeout_ms(),
            ready_timeout_ms: None,
            worker_program: None,
            raise_priority: false,
            lock_memory: false,
            worker_log_level: None,
        }
    }
}

impl SamplerConfig {
    /// Override the ring capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Use a specific worker executable.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    /// Bound the wait for readiness.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Bound the wait for worker exit.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Request worker tuning.
    pub fn with_tuning(mut self, flags: TuningFlags) -> Self {
        self.raise_priority = flags.contains(TuningFlags::RAISE_PRIORITY);
        self.lock_memory = flags.contains(TuningFlags::LOCK_MEMORY);
        self
    }

    /// Log level for the worker process.
    pub fn with_worker_log_level(mut self, level: LogLevel) -> Self {
        self.worker_log_level = Some(level);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for a zero join or ready
    /// timeout, or a capacity outside `1..=MAX_CAPACITY`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.join_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "join_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.ready_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "ready_timeout_ms must be > 0".to_string(),
            ));
        }
        if let Some(capacity) = self.capacity {
            if capacity == 0 || capacity > MAX_CAPACITY {
                return Err(ConfigError::ValidationError(format!(
                    "capacity must be in 1..={MAX_CAPACITY}, got {capacity}"
                )));
            }
        }
        Ok(())
    }

    /// Join timeout as a duration.
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Ready timeout as a duration.
    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_ms.map(Duration::from_millis)
    }

    /// Requested tuning flags.
    pub fn tuning(&self) -> TuningFlags {
        let mut flags = TuningFlags::empty();
        flags.set(TuningFlags::RAISE_PRIORITY, self.raise_priority);
        flags.set(TuningFlags::LOCK_MEMORY, self.lock_memory);
        flags
    }

    /// Worker executable to spawn.
    ///
    /// Order: `worker_program`, then `$EVO_INPUT_WORKER`, then an
    /// `evo_input_worker` next to the current executable (or one directory
    /// up, for test binaries under `deps/`), then a bare `PATH` lookup.
    pub fn resolve_worker_program(&self) -> PathBuf {
        if let Some(program) = &self.worker_program {
            return program.clone();
        }
        if let Some(program) = std::env::var_os(WORKER_PROGRAM_ENV) {
            return PathBuf::from(program);
        }
        if let Ok(exe) = std::env::current_exe() {
            let sibling = exe.parent().map(|dir| dir.join(WORKER_BINARY_NAME));
            let parent = exe
                .parent()
                .and_then(Path::parent)
                .map(|dir| dir.join(WORKER_BINARY_NAME));
            if let Some(found) = [sibling, parent].into_iter().flatten().find(|p| p.is_file()) {
                return found;
            }
        }
        PathBuf::from(WORKER_BINARY_NAME)
    }
}

/// Application configuration file: `[shared]` plus `[sampler]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Common fields
    pub shared: SharedConfig,
    /// Sampler settings
    #[serde(default)]
    pub sampler: SamplerConfig,
}

impl InputConfig {
    /// Load and validate a TOML file.
    ///
    /// Without an explicit `worker_log_level`, the worker logs at
    /// `[shared] log_level`.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.shared.validate()?;
        config.sampler.validate()?;
        config
            .sampler
            .worker_log_level
            .get_or_insert(config.shared.log_level);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = SamplerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.join_timeout(), DEFAULT_JOIN_TIMEOUT);
        assert_eq!(config.ready_timeout(), None);
        assert!(config.tuning().is_empty());
    }

    #[test]
    fn invalid_values_rejected() {
        let zero_join = SamplerConfig {
            join_timeout_ms: 0,
            ..Default::default()
        };
        assert!(zero_join.validate().is_err());

        assert!(SamplerConfig::default().with_capacity(0).validate().is_err());
        assert!(
            SamplerConfig::default()
                .with_capacity(MAX_CAPACITY + 1)
                .validate()
                .is_err()
        );
        assert!(
            SamplerConfig::default()
                .with_ready_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn tuning_roundtrip() {
        let flags = TuningFlags::RAISE_PRIORITY;
        let config = SamplerConfig::default().with_tuning(flags);
        assert!(config.raise_priority);
        assert!(!config.lock_memory);
        assert_eq!(config.tuning(), flags);
    }

    #[test]
    fn explicit_worker_program_wins() {
        let config = SamplerConfig::default().with_worker_program("/opt/evo/worker");
        assert_eq!(config.resolve_worker_program(), PathBuf::from("/opt/evo/worker"));
    }

    #[test]
    fn load_full_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[shared]
service_name = "evo-input-mouse"

[sampler]
capacity = 2000
ready_timeout_ms = 10000
raise_priority = true
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = InputConfig::load_validated(file.path()).unwrap();
        assert_eq!(config.shared.service_name, "evo-input-mouse");
        assert_eq!(config.sampler.capacity, Some(2000));
        assert_eq!(config.sampler.join_timeout_ms, 1000);
        assert_eq!(config.sampler.ready_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.sampler.tuning(), TuningFlags::RAISE_PRIORITY);
        assert_eq!(config.sampler.worker_log_level, Some(LogLevel::Info));
    }

    #[test]
    fn worker_log_level_follows_shared_unless_set() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[shared]\nservice_name = \"x\"\nlog_level = \"warn\"\n").unwrap();
        file.flush().unwrap();
        let config = InputConfig::load_validated(file.path()).unwrap();
        assert_eq!(config.sampler.worker_log_level, Some(LogLevel::Warn));

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "[shared]\nservice_name = \"x\"\nlog_level = \"warn\"\n[sampler]\nworker_log_level = \"trace\"\n"
        )
        .unwrap();
        file.flush().unwrap();
        let config = InputConfig::load_validated(file.path()).unwrap();
        assert_eq!(config.sampler.worker_log_level, Some(LogLevel::Trace));
    }

    #[test]
    fn sampler_section_is_optional_but_validated() {
        let config = InputConfig::from_toml("[shared]\nservice_name = \"x\"\n").unwrap();
        assert_eq!(config.sampler, SamplerConfig::default());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[shared]\nservice_name = \"x\"\n[sampler]\njoin_timeout_ms = 0\n").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            InputConfig::load_validated(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
