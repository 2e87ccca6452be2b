//! Error types for shared memory operations

use evo::schema::{ElementType, SchemaError};
use thiserror::Error;

/// Errors that can occur during shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment already exists
    #[error("Segment already exists: {path}")]
    AlreadyExists {
        /// Segment path
        path: String,
    },

    /// Segment not found
    #[error("Segment not found: {path}")]
    NotFound {
        /// Segment path
        path: String,
    },

    /// Invalid segment size
    #[error("Invalid segment size: {size} bytes (must be 4KB-1GB, page-aligned)")]
    InvalidSize {
        /// Attempted size in bytes
        size: usize,
    },

    /// Ring capacity outside the supported range
    #[error("Invalid ring capacity: {capacity} rows")]
    InvalidCapacity {
        /// Requested capacity
        capacity: usize,
    },

    /// Segment header failed validation
    #[error("Invalid segment header in {path}: {reason}")]
    InvalidHeader {
        /// Segment path
        path: String,
        /// What did not match
        reason: String,
    },

    /// Writer and reader disagree about the ring layout
    #[error("Ring layout mismatch: expected {expected:#018x}, found {found:#018x}")]
    LayoutMismatch {
        /// Hash computed locally
        expected: u64,
        /// Hash stored in the segment
        found: u64,
    },

    /// Device schema rejected by the allocator
    #[error("Invalid device schema: {0}")]
    Schema(#[from] SchemaError),

    /// A sample does not fit the declared stream layout
    #[error("Sample does not match stream '{stream}': {reason}")]
    SampleMismatch {
        /// Stream name (or `*` for sample-level problems)
        stream: String,
        /// What is wrong
        reason: String,
    },

    /// Typed access with the wrong element type
    #[error("Stream '{stream}' holds {actual:?}, not {requested:?}")]
    ElementMismatch {
        /// Stream name
        stream: String,
        /// Element type stored in the stream
        actual: ElementType,
        /// Element type asked for
        requested: ElementType,
    },

    /// Memory alignment error
    #[error("Memory alignment error: address {address:#x} not aligned to {alignment}")]
    AlignmentError {
        /// Memory address
        address: usize,
        /// Required alignment
        alignment: usize,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        /// Source JSON error
        #[from]
        source: serde_json::Error,
    },
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;
