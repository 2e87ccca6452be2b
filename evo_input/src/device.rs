//! Device contract.
//!
//! A device declares its streams statically through [`Device::schema`], is
//! constructed inside the worker process from its serialized configuration,
//! and is acquired for the duration of a session through [`Acquired`]:
//!
//! ```text
//! Device::new (configure) → Acquired::enter (open) → read()* → Drop (close)
//! ```

use crate::error::DeviceError;
use evo_common::clock::MonotonicClock;
use evo_common::schema::{DeviceSchema, Element, ElementType, ScalarType, SchemaError};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// An input device that can be sampled in a worker process.
pub trait Device: Sized {
    /// Registry name, also used in segment names
    const NAME: &'static str;

    /// Configuration, passed to the worker as JSON
    type Config: Serialize + DeserializeOwned;

    /// Streams produced for `config`. Called in both processes; must be
    /// deterministic.
    fn schema(config: &Self::Config) -> Result<DeviceSchema, SchemaError>;

    /// Construct the device. No hardware is acquired yet.
    fn new(config: Self::Config, clock: MonotonicClock) -> Result<Self, DeviceError>;

    /// Acquire the hardware.
    fn enter(&mut self) -> Result<(), DeviceError>;

    /// Poll for new samples. May block inside the device.
    fn read(&mut self) -> Result<Reading, DeviceError>;

    /// Release the hardware. Called exactly once after a successful `enter`.
    fn exit(&mut self);
}

/// Outcome of one device poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// No new data
    Nothing,
    /// A single sample
    One(Sample),
    /// Several samples in time order
    Many(Vec<Sample>),
}

/// One timestamped row: a value (or nothing) per declared stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Monotonic timestamp in seconds
    pub time: f64,
    /// One entry per stream, in schema order; `None` marks the stream absent
    pub values: Vec<Option<StreamValue>>,
}

impl Sample {
    /// A sample with every stream absent.
    pub fn empty(time: f64, streams: usize) -> Self {
        Self {
            time,
            values: vec![None; streams],
        }
    }

    /// Set the value of the stream at `index`. Out-of-range indices are ignored.
    pub fn with(mut self, index: usize, value: StreamValue) -> Self {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = Some(value);
        }
        self
    }
}

/// The data of one stream for one sample, as raw bytes tagged with their type.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamValue {
    element: ElementType,
    bytes: Vec<u8>,
}

impl StreamValue {
    /// All elements of the row, in row-major order.
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        Self {
            element: T::element_type(),
            bytes: bytemuck::cast_slice(values).to_vec(),
        }
    }

    /// A single element.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::from_slice(std::slice::from_ref(&value))
    }

    /// Boolean row, stored one byte per flag.
    pub fn bools(values: &[bool]) -> Self {
        Self {
            element: ElementType::Scalar(ScalarType::Bool),
            bytes: values.iter().map(|v| u8::from(*v)).collect(),
        }
    }

    /// Element type of the data.
    pub fn element(&self) -> &ElementType {
        &self.element
    }

    /// Raw row bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Scope guard for an acquired device: `enter` on construction, `exit` on drop.
pub struct Acquired<D: Device> {
    device: D,
}

impl<D: Device> Acquired<D> {
    /// Acquire `device`. If `enter` fails the device is dropped unacquired.
    pub fn enter(mut device: D) -> Result<Self, DeviceError> {
        device.enter()?;
        Ok(Self { device })
    }

    /// Poll the acquired device.
    #[inline]
    pub fn read(&mut self) -> Result<Reading, DeviceError> {
        self.device.read()
    }

    /// The device itself.
    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: Device> Drop for Acquired<D> {
    fn drop(&mut self) {
        self.device.exit();
    }
}
