//! # EVO Input Shared Memory
//!
//! Shared memory plumbing for one device sampling session: a `/dev/shm`
//! segment holding a session header and a columnar ring buffer, written by
//! exactly one worker process and read by exactly one consumer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────────────┐    ┌─────────────────┐
//! │  Worker         │    │  Session Segment         │    │  Consumer       │
//! │                 │    │                          │    │                 │
//! │  RingWriter     ├───►│ [Header|time|streams…]   ├───►│  RingReader     │
//! │                 │    │  write counter W         │    │  cursor C       │
//! └─────────────────┘    │  state / stop / fault    │    └─────────────────┘
//!                        └──────────────────────────┘
//! ```
//!
//! - [`layout::RingLayout`] sizes every column from a
//!   [`DeviceSchema`](evo::schema::DeviceSchema) before the worker exists.
//! - [`ring::RingWriter`] and [`ring::RingReader`] implement the SPSC protocol:
//!   the writer publishes `W` with `Release`, the reader copies with `Acquire`
//!   and discards rows that were overwritten mid-copy.
//! - The [`SessionHeader`] also carries the control words (state, readiness,
//!   stop request, worker pid) and a fault slot; see [`control`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use evo::schema::{DeviceSchema, StreamSpec};
//! use evo_shared_memory::{RingLayout, RingReader, RingWriter, segment_path};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = DeviceSchema::new(100.0).with_stream(StreamSpec::of::<f64>("value", &[1]));
//! let layout = RingLayout::allocate(&schema, None)?;
//! let path = segment_path("demo", std::process::id(), 0);
//!
//! // Consumer side creates and owns the segment.
//! let mut reader = RingReader::new(layout.create_segment(&path)?, layout.clone())?;
//!
//! // Worker side attaches and writes.
//! let mut writer = RingWriter::new(layout.attach_segment(&path)?, layout)?;
//! writer.write(0.01, &[Some(&1.0f64.to_ne_bytes()[..])])?;
//!
//! if let Some(batch) = reader.read() {
//!     println!("{} rows, {} missed", batch.len(), batch.missed);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - **RingWriter**: single writer per segment
//! - **RingReader**: single reader per segment; methods take `&mut self`

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod error;
pub mod layout;
pub mod platform;
pub mod ring;
pub mod segment;

pub use error::{ShmError, ShmResult};
pub use layout::{RingLayout, StreamLayout};
pub use ring::{Batch, RingReader, RingWriter, StreamColumn};
pub use segment::{SESSION_HEADER_SIZE, SessionHeader, SharedMemorySegment, segment_path};

/// Initialize tracing for library consumers that have no subscriber of their own
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
