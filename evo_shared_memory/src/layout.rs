//! Ring layout allocator.
//!
//! Sizes every column of a session segment from a [`DeviceSchema`] before any
//! worker exists:
//!
//! ```text
//! ┌────────────────┬──────────────┬───────────────┬──────────────┬─────┐
//! │ SessionHeader  │ time [N] f64 │ present_0 [N] │ data_0 [N,…] │ ... │
//! └────────────────┴──────────────┴───────────────┴──────────────┴─────┘
//! ```
//!
//! Each column starts on a cache line; the total is rounded up to a page.

use crate::error::{ShmError, ShmResult};
use crate::platform::get_current_pid;
use crate::segment::cache::LayoutOptimizer;
use crate::segment::{SESSION_HEADER_SIZE, SharedMemorySegment};
use evo::consts::{DEFAULT_SAMPLING_FREQUENCY_HZ, MAX_CAPACITY, MIN_CAPACITY, SHM_MAX_SIZE};
use evo::schema::{DeviceSchema, StreamSpec};
use std::path::PathBuf;
use tracing::debug;

const TIME_SIZE: usize = std::mem::size_of::<f64>();

/// Placement of one stream's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamLayout {
    /// Declared stream
    pub spec: StreamSpec,
    /// Offset of the presence column (one byte per row)
    pub presence_offset: usize,
    /// Offset of the data column
    pub data_offset: usize,
    /// Bytes per row in the data column
    pub row_size: usize,
}

impl StreamLayout {
    /// One row of "no data" (NaN for floats, zero otherwise).
    pub fn fill_row(&self) -> Vec<u8> {
        let element_size = self.spec.element.size();
        let mut row = vec![0u8; self.row_size];
        for element in row.chunks_exact_mut(element_size) {
            self.spec.element.write_fill(element);
        }
        row
    }
}

/// Complete segment layout for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct RingLayout {
    schema: DeviceSchema,
    capacity: usize,
    time_offset: usize,
    streams: Vec<StreamLayout>,
    total_size: usize,
}

impl RingLayout {
    /// Capacity rule: `max(override, ceil(frequency), MIN_CAPACITY)`.
    ///
    /// A frequency of zero means "unknown" and falls back to
    /// [`DEFAULT_SAMPLING_FREQUENCY_HZ`].
    pub fn capacity_for(schema: &DeviceSchema, capacity_override: Option<usize>) -> usize {
        let hz = if schema.sampling_frequency_hz > 0.0 {
            schema.sampling_frequency_hz
        } else {
            DEFAULT_SAMPLING_FREQUENCY_HZ
        };
        // `as` saturates for out-of-range floats.
        let nominal = hz.ceil() as usize;
        capacity_override
            .unwrap_or(0)
            .max(nominal)
            .max(MIN_CAPACITY)
    }

    /// Size a layout from the schema's nominal frequency and an optional override.
    pub fn allocate(schema: &DeviceSchema, capacity_override: Option<usize>) -> ShmResult<Self> {
        schema.validate()?;
        if let Some(capacity) = capacity_override {
            validate_capacity(capacity)?;
        }
        Self::with_capacity(schema, Self::capacity_for(schema, capacity_override))
    }

    /// Build a layout with exactly `capacity` rows.
    pub fn with_capacity(schema: &DeviceSchema, capacity: usize) -> ShmResult<Self> {
        schema.validate()?;
        validate_capacity(capacity)?;

        // Every column must fit in a segment on its own.
        let column = |row_size: usize| match capacity.checked_mul(row_size) {
            Some(size) if size <= SHM_MAX_SIZE => Ok(size),
            Some(size) => Err(ShmError::InvalidSize { size }),
            None => Err(ShmError::InvalidCapacity { capacity }),
        };

        let mut layout = LayoutOptimizer::new();
        layout.add_column(SESSION_HEADER_SIZE);
        let time_offset = layout.add_column(column(TIME_SIZE)?);

        let mut streams = Vec::with_capacity(schema.streams.len());
        for spec in &schema.streams {
            let row_size = spec.row_size();
            let presence_offset = layout.add_column(column(1)?);
            let data_offset = layout.add_column(column(row_size)?);
            streams.push(StreamLayout {
                spec: spec.clone(),
                presence_offset,
                data_offset,
                row_size,
            });
        }

        let total_size = layout.finalize();
        if total_size > SHM_MAX_SIZE {
            return Err(ShmError::InvalidSize { size: total_size });
        }

        Ok(Self {
            schema: schema.clone(),
            capacity,
            time_offset,
            streams,
            total_size,
        })
    }

    /// Rows per column.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Schema the layout was built from.
    pub fn schema(&self) -> &DeviceSchema {
        &self.schema
    }

    /// Per-stream column placement, in declaration order.
    pub fn streams(&self) -> &[StreamLayout] {
        &self.streams
    }

    /// Offset of the time column.
    #[inline]
    pub fn time_offset(&self) -> usize {
        self.time_offset
    }

    /// Segment size in bytes (page multiple).
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Hash of streams and capacity, stored in the session header.
    pub fn layout_hash(&self) -> u64 {
        self.schema.layout_hash() ^ (self.capacity as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    /// Create the session segment at `path`, stamp the header and fill every column.
    pub fn create_segment(&self, path: impl Into<PathBuf>) -> ShmResult<SharedMemorySegment> {
        let mut segment = SharedMemorySegment::create(path, self.total_size)?;

        let header = segment.header_mut();
        header.layout_hash = self.layout_hash();
        header.capacity = self.capacity as u64;
        header.stream_count = self.streams.len() as u32;
        header.parent_pid = get_current_pid();

        self.initialize(&mut segment);
        debug!(
            path = %segment.path().display(),
            capacity = self.capacity,
            streams = self.streams.len(),
            size = self.total_size,
            "ring layout initialized"
        );
        Ok(segment)
    }

    /// Attach to a segment created from the same layout.
    pub fn attach_segment(&self, path: impl Into<PathBuf>) -> ShmResult<SharedMemorySegment> {
        let segment = SharedMemorySegment::attach(path)?;
        let header = segment.header();
        if header.layout_hash != self.layout_hash() {
            return Err(ShmError::LayoutMismatch {
                expected: self.layout_hash(),
                found: header.layout_hash,
            });
        }
        if header.capacity != self.capacity as u64 || segment.len() != self.total_size {
            return Err(ShmError::InvalidHeader {
                path: segment.path().display().to_string(),
                reason: format!(
                    "capacity {} / size {} do not match layout ({} / {})",
                    header.capacity,
                    segment.len(),
                    self.capacity,
                    self.total_size
                ),
            });
        }
        Ok(segment)
    }

    /// Fill the time column with NaN, presence with zero and data with fill patterns.
    pub fn initialize(&self, segment: &mut SharedMemorySegment) {
        let capacity = self.capacity;
        let bytes = segment.bytes_mut();

        let times = &mut bytes[self.time_offset..self.time_offset + capacity * TIME_SIZE];
        for slot in times.chunks_exact_mut(TIME_SIZE) {
            slot.copy_from_slice(&f64::NAN.to_ne_bytes());
        }

        for stream in &self.streams {
            bytes[stream.presence_offset..stream.presence_offset + capacity].fill(0);

            let fill = stream.fill_row();
            let column =
                &mut bytes[stream.data_offset..stream.data_offset + capacity * stream.row_size];
            for row in column.chunks_exact_mut(stream.row_size) {
                row.copy_from_slice(&fill);
            }
        }
    }
}

fn validate_capacity(capacity: usize) -> ShmResult<()> {
    if capacity == 0 || capacity > MAX_CAPACITY {
        return Err(ShmError::InvalidCapacity { capacity });
    }
    Ok(())
}
