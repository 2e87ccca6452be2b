//! Stream schema declarations.
//!
//! A device declares its output once, statically, as a [`DeviceSchema`]: a
//! nominal sampling frequency and an ordered list of named streams, each with
//! a fixed shape and a fixed element type. The shared memory allocator sizes
//! every column from this declaration before any worker process exists.
//!
//! Element types are either a primitive [`ScalarType`] or a fixed-layout
//! record of primitives ([`RecordLayout`]), matching a `#[repr(C)]` struct on
//! the Rust side.

use crate::consts::MAX_STREAMS;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors raised while validating a device schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// The device declares no stream at all.
    #[error("device declares no streams")]
    NoStreams,

    /// More streams than the session header can describe.
    #[error("device declares {count} streams (max {max})")]
    TooManyStreams {
        /// Declared stream count
        count: usize,
        /// Supported maximum
        max: usize,
    },

    /// A stream has an empty name.
    #[error("stream #{index} has an empty name")]
    EmptyName {
        /// Position of the stream in the schema
        index: usize,
    },

    /// Two streams share a name.
    #[error("duplicate stream name: {name}")]
    DuplicateStream {
        /// Offending name
        name: String,
    },

    /// A stream was declared without a shape.
    #[error("stream '{stream}' has no shape")]
    EmptyShape {
        /// Stream name
        stream: String,
    },

    /// A stream shape contains a zero dimension.
    #[error("stream '{stream}' has a zero-sized dimension in {shape:?}")]
    ZeroDimension {
        /// Stream name
        stream: String,
        /// Declared shape
        shape: Vec<usize>,
    },

    /// A record element type is malformed.
    #[error("stream '{stream}' has an invalid record layout: {reason}")]
    InvalidRecord {
        /// Stream name
        stream: String,
        /// What is wrong with the layout
        reason: String,
    },

    /// The shape and element size overflow the addressable row size.
    #[error("stream '{stream}' rows do not fit in memory: shape {shape:?}")]
    RowTooLarge {
        /// Stream name
        stream: String,
        /// Declared shape
        shape: Vec<usize>,
    },

    /// The nominal sampling frequency is negative or not finite.
    #[error("invalid sampling frequency: {hz} Hz")]
    InvalidFrequency {
        /// Declared frequency
        hz: f64,
    },
}

/// Primitive element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ScalarType {
    /// One byte, 0 = false, anything else = true.
    Bool = 0,
    /// Unsigned 8-bit integer
    U8 = 1,
    /// Signed 8-bit integer
    I8 = 2,
    /// Unsigned 16-bit integer
    U16 = 3,
    /// Signed 16-bit integer
    I16 = 4,
    /// Unsigned 32-bit integer
    U32 = 5,
    /// Signed 32-bit integer
    I32 = 6,
    /// Unsigned 64-bit integer
    U64 = 7,
    /// Signed 64-bit integer
    I64 = 8,
    /// 32-bit float
    F32 = 9,
    /// 64-bit float
    F64 = 10,
}

impl ScalarType {
    /// Size of one value in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Natural alignment of one value in bytes.
    #[inline]
    pub const fn align(self) -> usize {
        self.size()
    }

    /// True for floating point types (filled with NaN instead of zero).
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Write the "no data" pattern for one value into `dst`.
    ///
    /// `dst` must be exactly [`size()`](Self::size) bytes long.
    pub fn write_fill(self, dst: &mut [u8]) {
        match self {
            Self::F32 => dst.copy_from_slice(&f32::NAN.to_ne_bytes()),
            Self::F64 => dst.copy_from_slice(&f64::NAN.to_ne_bytes()),
            _ => dst.fill(0),
        }
    }
}

/// One named field of a record element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordField {
    /// Field name
    pub name: String,
    /// Field type
    pub scalar: ScalarType,
    /// Byte offset inside the record
    pub offset: usize,
}

/// Fixed layout of a record element (a `#[repr(C)]` struct of primitives).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordLayout {
    /// Fields in declaration order
    pub fields: Vec<RecordField>,
    /// Total record size in bytes, padding included
    pub size: usize,
}

impl RecordLayout {
    /// Start an empty record of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            fields: Vec::new(),
            size,
        }
    }

    /// Append a field at `offset`.
    pub fn field(mut self, name: &str, scalar: ScalarType, offset: usize) -> Self {
        self.fields.push(RecordField {
            name: name.to_string(),
            scalar,
            offset,
        });
        self
    }

    /// Check that fields are non-empty, aligned, in bounds and non-overlapping.
    pub fn validate(&self) -> Result<(), String> {
        if self.fields.is_empty() {
            return Err("record has no fields".to_string());
        }
        if self.size == 0 {
            return Err("record size is zero".to_string());
        }

        let mut spans: Vec<(usize, usize, &str)> = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let end = field.offset + field.scalar.size();
            if end > self.size {
                return Err(format!(
                    "field '{}' ends at {end}, past record size {}",
                    field.name, self.size
                ));
            }
            if field.offset % field.scalar.align() != 0 {
                return Err(format!(
                    "field '{}' at offset {} is not {}-byte aligned",
                    field.name,
                    field.offset,
                    field.scalar.align()
                ));
            }
            spans.push((field.offset, end, &field.name));
        }

        spans.sort_by_key(|span| span.0);
        for pair in spans.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(format!("fields '{}' and '{}' overlap", pair[0].2, pair[1].2));
            }
        }
        Ok(())
    }

    /// Write the "no data" pattern for one record: NaN floats, zero elsewhere.
    pub fn write_fill(&self, dst: &mut [u8]) {
        dst.fill(0);
        for field in &self.fields {
            let end = field.offset + field.scalar.size();
            field.scalar.write_fill(&mut dst[field.offset..end]);
        }
    }
}

/// Element type of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// Numeric primitive
    Scalar(ScalarType),
    /// Fixed-layout record of primitives
    Record(RecordLayout),
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Scalar(scalar) => scalar.size(),
            Self::Record(record) => record.size,
        }
    }

    /// Write the "no data" pattern for one element into `dst`.
    pub fn write_fill(&self, dst: &mut [u8]) {
        match self {
            Self::Scalar(scalar) => scalar.write_fill(dst),
            Self::Record(record) => record.write_fill(dst),
        }
    }
}

/// Plain-old-data types that can be stored in a stream column.
///
/// Implemented for every primitive except `bool` (which is not `Pod`; boolean
/// streams carry `u8`-encoded flags). Record streams implement it on their own
/// `#[repr(C)]` struct:
///
/// ```rust
/// use evo_common::schema::{Element, ElementType, RecordLayout, ScalarType};
///
/// #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// #[repr(C)]
/// struct Force {
///     newtons: f32,
///     channel: u32,
/// }
///
/// impl Element for Force {
///     fn element_type() -> ElementType {
///         ElementType::Record(
///             RecordLayout::new(8)
///                 .field("newtons", ScalarType::F32, 0)
///                 .field("channel", ScalarType::U32, 4),
///         )
///     }
/// }
/// ```
pub trait Element: bytemuck::Pod {
    /// The element type this Rust type is stored as.
    fn element_type() -> ElementType;
}

macro_rules! impl_scalar_element {
    ($($ty:ty => $scalar:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                #[inline]
                fn element_type() -> ElementType {
                    ElementType::Scalar(ScalarType::$scalar)
                }
            }
        )*
    };
}

impl_scalar_element! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

/// One named, fixed-shape, fixed-type channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamSpec {
    /// Stream name, unique within a device
    pub name: String,
    /// Per-sample shape, e.g. `[2]` for x/y or `[3, 3]` for a matrix
    pub shape: Vec<usize>,
    /// Element type
    pub element: ElementType,
}

impl StreamSpec {
    /// Declare a stream with an explicit shape and element type.
    pub fn new(name: &str, shape: &[usize], element: ElementType) -> Self {
        Self {
            name: name.to_string(),
            shape: shape.to_vec(),
            element,
        }
    }

    /// Declare a stream of Rust element type `T`.
    pub fn of<T: Element>(name: &str, shape: &[usize]) -> Self {
        Self::new(name, shape, T::element_type())
    }

    /// Declare a scalar stream (shape `(1,)`).
    pub fn scalar(name: &str, scalar: ScalarType) -> Self {
        Self::new(name, &[1], ElementType::Scalar(scalar))
    }

    /// True when every sample holds exactly one element.
    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.shape == [1]
    }

    /// Elements per sample (product of the shape, saturating).
    #[inline]
    pub fn elements_per_row(&self) -> usize {
        self.shape.iter().fold(1usize, |n, &dim| n.saturating_mul(dim))
    }

    /// Bytes per sample, saturating. Validated schemas never saturate.
    #[inline]
    pub fn row_size(&self) -> usize {
        self.checked_row_size().unwrap_or(usize::MAX)
    }

    /// Bytes per sample, or `None` on overflow.
    pub fn checked_row_size(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(self.element.size(), |n, &dim| n.checked_mul(dim))
    }

    fn validate(&self, index: usize) -> Result<(), SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::EmptyName { index });
        }
        if self.shape.is_empty() {
            return Err(SchemaError::EmptyShape {
                stream: self.name.clone(),
            });
        }
        if self.shape.contains(&0) {
            return Err(SchemaError::ZeroDimension {
                stream: self.name.clone(),
                shape: self.shape.clone(),
            });
        }
        if self.checked_row_size().is_none() {
            return Err(SchemaError::RowTooLarge {
                stream: self.name.clone(),
                shape: self.shape.clone(),
            });
        }
        if let ElementType::Record(record) = &self.element {
            record.validate().map_err(|reason| SchemaError::InvalidRecord {
                stream: self.name.clone(),
                reason,
            })?;
        }
        Ok(())
    }
}

/// Statically declared output of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSchema {
    /// Nominal sampling frequency in Hz (0 = unknown).
    pub sampling_frequency_hz: f64,
    /// Streams in declaration order; samples index streams by this order.
    pub streams: Vec<StreamSpec>,
}

impl DeviceSchema {
    /// Start a schema with no streams.
    pub fn new(sampling_frequency_hz: f64) -> Self {
        Self {
            sampling_frequency_hz,
            streams: Vec::new(),
        }
    }

    /// Append a stream.
    pub fn with_stream(mut self, stream: StreamSpec) -> Self {
        self.streams.push(stream);
        self
    }

    /// Validate the whole declaration.
    ///
    /// # Errors
    /// Returns the first [`SchemaError`] found.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !self.sampling_frequency_hz.is_finite() || self.sampling_frequency_hz < 0.0 {
            return Err(SchemaError::InvalidFrequency {
                hz: self.sampling_frequency_hz,
            });
        }
        if self.streams.is_empty() {
            return Err(SchemaError::NoStreams);
        }
        if self.streams.len() > MAX_STREAMS {
            return Err(SchemaError::TooManyStreams {
                count: self.streams.len(),
                max: MAX_STREAMS,
            });
        }

        let mut seen = HashSet::with_capacity(self.streams.len());
        for (index, stream) in self.streams.iter().enumerate() {
            stream.validate(index)?;
            if !seen.insert(stream.name.as_str()) {
                return Err(SchemaError::DuplicateStream {
                    name: stream.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Position of the stream called `name`.
    pub fn stream_index(&self, name: &str) -> Option<usize> {
        self.streams.iter().position(|s| s.name == name)
    }

    /// Deterministic hash of the stream layout (names, shapes, element types).
    ///
    /// Writer and reader refuse to share a segment when their hashes differ.
    pub fn layout_hash(&self) -> u64 {
        let mut hash = Fnv1a::new();
        hash.write_usize(self.streams.len());
        for stream in &self.streams {
            hash.write(stream.name.as_bytes());
            hash.write_usize(stream.shape.len());
            for dim in &stream.shape {
                hash.write_usize(*dim);
            }
            match &stream.element {
                ElementType::Scalar(scalar) => {
                    hash.write(&[0, *scalar as u8]);
                }
                ElementType::Record(record) => {
                    hash.write(&[1]);
                    hash.write_usize(record.size);
                    for field in &record.fields {
                        hash.write(field.name.as_bytes());
                        hash.write(&[field.scalar as u8]);
                        hash.write_usize(field.offset);
                    }
                }
            }
        }
        hash.finish()
    }
}

/// 64-bit FNV-1a, stable across processes and builds.
struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    fn new() -> Self {
        Self(Self::OFFSET)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
        // Field separator so ("ab","c") and ("a","bc") differ.
        self.0 ^= 0xff;
        self.0 = self.0.wrapping_mul(Self::PRIME);
    }

    fn write_usize(&mut self, value: usize) {
        self.write(&(value as u64).to_le_bytes());
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mouse_schema() -> DeviceSchema {
        DeviceSchema::new(100.0)
            .with_stream(StreamSpec::of::<i32>("pos", &[2]))
            .with_stream(StreamSpec::scalar("clicks", ScalarType::Bool))
    }

    #[test]
    fn scalar_sizes() {
        assert_eq!(ScalarType::Bool.size(), 1);
        assert_eq!(ScalarType::I16.size(), 2);
        assert_eq!(ScalarType::F32.size(), 4);
        assert_eq!(ScalarType::U64.size(), 8);
    }

    #[test]
    fn float_fill_is_nan_and_int_fill_is_zero() {
        let mut buf = [0xAAu8; 8];
        ScalarType::F64.write_fill(&mut buf);
        assert!(f64::from_ne_bytes(buf).is_nan());

        let mut buf = [0xAAu8; 4];
        ScalarType::I32.write_fill(&mut buf);
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn valid_schema_passes() {
        assert!(mouse_schema().validate().is_ok());
        assert_eq!(mouse_schema().stream_index("clicks"), Some(1));
        assert_eq!(mouse_schema().stream_index("wheel"), None);
    }

    #[test]
    fn stream_geometry() {
        let spec = StreamSpec::of::<i32>("grid", &[3, 3]);
        assert_eq!(spec.elements_per_row(), 9);
        assert_eq!(spec.row_size(), 36);
        assert!(!spec.is_scalar());
        assert!(StreamSpec::scalar("x", ScalarType::F64).is_scalar());
    }

    #[test]
    fn empty_schema_rejected() {
        assert_eq!(DeviceSchema::new(10.0).validate(), Err(SchemaError::NoStreams));
    }

    #[test]
    fn duplicate_names_rejected() {
        let schema = DeviceSchema::new(10.0)
            .with_stream(StreamSpec::scalar("a", ScalarType::F64))
            .with_stream(StreamSpec::scalar("a", ScalarType::F32));
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::DuplicateStream { .. })
        ));
    }

    #[test]
    fn missing_shape_rejected() {
        let schema = DeviceSchema::new(10.0).with_stream(StreamSpec::new(
            "a",
            &[],
            ElementType::Scalar(ScalarType::F64),
        ));
        assert!(matches!(schema.validate(), Err(SchemaError::EmptyShape { .. })));

        let schema = DeviceSchema::new(10.0).with_stream(StreamSpec::of::<f32>("b", &[3, 0]));
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::ZeroDimension { .. })
        ));
    }

    #[test]
    fn oversized_row_rejected() {
        let spec = StreamSpec::of::<f64>("huge", &[1 << 40, 1 << 40]);
        assert_eq!(spec.checked_row_size(), None);
        assert_eq!(spec.row_size(), usize::MAX);

        let schema = DeviceSchema::new(10.0).with_stream(spec);
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::RowTooLarge { .. })
        ));
    }

    #[test]
    fn bad_frequency_rejected() {
        let schema = DeviceSchema::new(f64::NAN).with_stream(StreamSpec::of::<f32>("a", &[1]));
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::InvalidFrequency { .. })
        ));
    }

    #[test]
    fn record_validation() {
        let ok = RecordLayout::new(16)
            .field("x", ScalarType::F64, 0)
            .field("id", ScalarType::U32, 8);
        assert!(ok.validate().is_ok());

        let overlap = RecordLayout::new(16)
            .field("x", ScalarType::F64, 0)
            .field("y", ScalarType::U32, 4);
        assert!(overlap.validate().is_err());

        let overflow = RecordLayout::new(8).field("x", ScalarType::F64, 4);
        assert!(overflow.validate().is_err());

        let schema = DeviceSchema::new(10.0).with_stream(StreamSpec::new(
            "r",
            &[1],
            ElementType::Record(RecordLayout::new(4)),
        ));
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn record_fill_pattern() {
        let record = RecordLayout::new(16)
            .field("x", ScalarType::F64, 0)
            .field("id", ScalarType::U32, 8);
        let mut buf = [0xAAu8; 16];
        record.write_fill(&mut buf);
        assert!(f64::from_ne_bytes(buf[0..8].try_into().unwrap()).is_nan());
        assert_eq!(&buf[8..16], &[0; 8]);
    }

    #[test]
    fn layout_hash_is_stable_and_sensitive() {
        assert_eq!(mouse_schema().layout_hash(), mouse_schema().layout_hash());

        let other = DeviceSchema::new(100.0)
            .with_stream(StreamSpec::of::<i32>("pos", &[3]))
            .with_stream(StreamSpec::scalar("clicks", ScalarType::Bool));
        assert_ne!(mouse_schema().layout_hash(), other.layout_hash());

        // Frequency does not change the layout itself.
        let mut faster = mouse_schema();
        faster.sampling_frequency_hz = 1000.0;
        assert_eq!(mouse_schema().layout_hash(), faster.layout_hash());
    }

    #[test]
    fn element_types_for_primitives() {
        assert_eq!(f64::element_type(), ElementType::Scalar(ScalarType::F64));
        assert_eq!(u16::element_type(), ElementType::Scalar(ScalarType::U16));
    }
}
