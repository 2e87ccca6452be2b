//! EVO Common Library
//!
//! This crate provides shared constants, stream schema types and configuration
//! loading utilities for all EVO input workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Capacity limits, shared memory sizes and timing constants
//! - [`schema`] - Stream / element type declarations used to size shared memory
//! - [`clock`] - Monotonic clock shared by devices and consumers
//! - [`lifecycle`] - Worker lifecycle states and transition table
//! - [`fault`] - Serializable fault record crossing the process boundary
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! evo = { package = "evo_common", path = "../evo_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use evo_common::schema::{DeviceSchema, ScalarType, StreamSpec};
//! use evo_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod clock;
pub mod config;
pub mod consts;
pub mod fault;
pub mod lifecycle;
pub mod prelude;
pub mod schema;
