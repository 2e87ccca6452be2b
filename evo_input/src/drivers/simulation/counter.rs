//! Counter device: emits its own sample index.
//!
//! Streams:
//!
//! | name    | element        | shape | present                     |
//! |---------|----------------|-------|-----------------------------|
//! | `value` | f64            | (1,)  | always                      |
//! | `pos`   | i32            | (2,)  | every `pos_every`-th sample |
//! | `event` | [`CounterEvent`] | (1,)  | always, if `event` is set   |

use crate::device::{Device, Reading, Sample, StreamValue};
use crate::error::DeviceError;
use bytemuck::{Pod, Zeroable};
use evo_common::clock::MonotonicClock;
use evo_common::schema::{
    DeviceSchema, Element, ElementType, RecordLayout, ScalarType, SchemaError, StreamSpec,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Counter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Stop producing after this many samples (then read returns nothing)
    pub count: Option<u64>,
    /// Samples per read
    pub batch: usize,
    /// Sleep before every read but the first, in microseconds
    pub period_us: u64,
    /// Nominal rate reported in the schema
    pub frequency_hz: f64,
    /// Add a `pos` stream, present on every n-th sample
    pub pos_every: Option<u32>,
    /// Add an `event` record stream
    pub event: bool,
    /// Fail in `enter()`
    pub fail_on_enter: bool,
    /// Fail on the read after this many successful ones
    pub fail_after: Option<u64>,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            count: None,
            batch: 1,
            period_us: 0,
            frequency_hz: 1000.0,
            pos_every: None,
            event: false,
            fail_on_enter: false,
            fail_after: None,
        }
    }
}

/// Record element of the `event` stream.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CounterEvent {
    /// Sample time
    pub stamp: f64,
    /// Sample index
    pub seq: u32,
    /// Bit 0 set on odd samples
    pub flags: u32,
}

impl Element for CounterEvent {
    fn element_type() -> ElementType {
        ElementType::Record(
            RecordLayout::new(16)
                .field("stamp", ScalarType::F64, 0)
                .field("seq", ScalarType::U32, 8)
                .field("flags", ScalarType::U32, 12),
        )
    }
}

/// Simulated device counting its samples.
pub struct CounterDevice {
    config: CounterConfig,
    clock: MonotonicClock,
    streams: usize,
    pos_index: Option<usize>,
    event_index: Option<usize>,
    next: u64,
    reads: u64,
}

impl CounterDevice {
    /// Samples produced so far.
    pub fn produced(&self) -> u64 {
        self.next
    }

    fn sample(&self, index: u64) -> Sample {
        let time = self.clock.now();
        let mut sample =
            Sample::empty(time, self.streams).with(0, StreamValue::scalar(index as f64));

        if let (Some(slot), Some(every)) = (self.pos_index, self.config.pos_every) {
            if index % u64::from(every) == 0 {
                let i = index as i32;
                sample = sample.with(slot, StreamValue::from_slice(&[i, -i]));
            }
        }
        if let Some(slot) = self.event_index {
            let event = CounterEvent {
                stamp: time,
                seq: index as u32,
                flags: (index % 2) as u32,
            };
            sample = sample.with(slot, StreamValue::scalar(event));
        }
        sample
    }
}

impl Device for CounterDevice {
    const NAME: &'static str = "counter";
    type Config = CounterConfig;

    fn schema(config: &CounterConfig) -> Result<DeviceSchema, SchemaError> {
        let mut schema =
            DeviceSchema::new(config.frequency_hz).with_stream(StreamSpec::of::<f64>("value", &[1]));
        if config.pos_every.is_some() {
            schema = schema.with_stream(StreamSpec::of::<i32>("pos", &[2]));
        }
        if config.event {
            schema = schema.with_stream(StreamSpec::of::<CounterEvent>("event", &[1]));
        }
        schema.validate()?;
        Ok(schema)
    }

    fn new(config: CounterConfig, clock: MonotonicClock) -> Result<Self, DeviceError> {
        if config.batch == 0 {
            return Err(DeviceError::Config("counter batch must be > 0".into()));
        }
        if config.pos_every == Some(0) {
            return Err(DeviceError::Config("counter pos_every must be > 0".into()));
        }

        let pos_index = config.pos_every.map(|_| 1);
        let event_index = config.event.then(|| 1 + usize::from(pos_index.is_some()));
        let streams = 1 + usize::from(pos_index.is_some()) + usize::from(event_index.is_some());
        Ok(Self {
            config,
            clock,
            streams,
            pos_index,
            event_index,
            next: 0,
            reads: 0,
        })
    }

    fn enter(&mut self) -> Result<(), DeviceError> {
        if self.config.fail_on_enter {
            return Err(DeviceError::Unavailable("counter refused to open".into()));
        }
        debug!(streams = self.streams, "counter opened");
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, DeviceError> {
        if self.config.fail_after == Some(self.reads) {
            return Err(DeviceError::Communication(format!(
                "counter failed after {} reads",
                self.reads
            )));
        }
        self.reads += 1;

        // The first read is immediate; later reads are paced.
        if self.config.period_us > 0 && self.reads > 1 {
            std::thread::sleep(Duration::from_micros(self.config.period_us));
        }

        let remaining = match self.config.count {
            Some(count) => count.saturating_sub(self.next),
            None => u64::MAX,
        };
        let n = remaining.min(self.config.batch as u64);
        if n == 0 {
            return Ok(Reading::Nothing);
        }

        let start = self.next;
        self.next += n;
        if n == 1 {
            return Ok(Reading::One(self.sample(start)));
        }
        Ok(Reading::Many((start..start + n).map(|i| self.sample(i)).collect()))
    }

    fn exit(&mut self) {
        debug!(produced = self.next, "counter closed");
    }
}
