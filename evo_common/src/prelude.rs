//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use evo_common::prelude::*;` and get
//! the most important types without listing individual paths.
//!
//! # Usage
//!
//! ```rust
//! use evo_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{DEFAULT_JOIN_TIMEOUT, MAX_CAPACITY, MIN_CAPACITY};

// ─── Schema ─────────────────────────────────────────────────────────
pub use crate::schema::{
    DeviceSchema, Element, ElementType, RecordLayout, ScalarType, SchemaError, StreamSpec,
};

// ─── Time ───────────────────────────────────────────────────────────
pub use crate::clock::{Clock, MonotonicClock};

// ─── Lifecycle & faults ─────────────────────────────────────────────
pub use crate::fault::{FaultKind, FaultRecord};
pub use crate::lifecycle::{WorkerEvent, WorkerState, WorkerStateMachine};
