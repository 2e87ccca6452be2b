//! Three-axis sine generator, paced at its sampling rate.

use crate::device::{Device, Reading, Sample, StreamValue};
use crate::error::DeviceError;
use evo_common::clock::MonotonicClock;
use evo_common::schema::{DeviceSchema, SchemaError, StreamSpec};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::time::Duration;

/// Sine generator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SineConfig {
    /// Signal frequency in Hz
    pub frequency_hz: f64,
    /// Samples per second
    pub sample_rate_hz: f64,
    /// Peak value
    pub amplitude: f32,
}

impl Default for SineConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 1.0,
            sample_rate_hz: 200.0,
            amplitude: 1.0,
        }
    }
}

/// Simulated accelerometer: `accel` is three sines 120° apart.
pub struct SineDevice {
    config: SineConfig,
    clock: MonotonicClock,
    period: f64,
    origin: f64,
    next_due: f64,
}

impl SineDevice {
    fn channels(&self, t: f64) -> [f32; 3] {
        let phase = TAU * self.config.frequency_hz * (t - self.origin);
        [0.0, 1.0, 2.0].map(|k| self.config.amplitude * (phase + k * TAU / 3.0).sin() as f32)
    }
}

impl Device for SineDevice {
    const NAME: &'static str = "sine";
    type Config = SineConfig;

    fn schema(config: &SineConfig) -> Result<DeviceSchema, SchemaError> {
        let schema = DeviceSchema::new(config.sample_rate_hz)
            .with_stream(StreamSpec::of::<f32>("accel", &[3]));
        schema.validate()?;
        Ok(schema)
    }

    fn new(config: SineConfig, clock: MonotonicClock) -> Result<Self, DeviceError> {
        if !(config.sample_rate_hz > 0.0 && config.sample_rate_hz.is_finite()) {
            return Err(DeviceError::Config(format!(
                "sine sample_rate_hz must be positive, got {}",
                config.sample_rate_hz
            )));
        }
        let period = 1.0 / config.sample_rate_hz;
        Ok(Self {
            config,
            clock,
            period,
            origin: 0.0,
            next_due: 0.0,
        })
    }

    fn enter(&mut self) -> Result<(), DeviceError> {
        self.origin = self.clock.now();
        self.next_due = self.origin;
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, DeviceError> {
        let now = self.clock.now();
        if now < self.next_due {
            std::thread::sleep(Duration::from_secs_f64(self.next_due - now));
        }
        let t = self.clock.now();
        // Skip missed periods instead of bursting to catch up.
        self.next_due = (self.next_due + self.period).max(t);

        let accel = self.channels(t);
        Ok(Reading::One(
            Sample::empty(t, 1).with(0, StreamValue::from_slice(&accel)),
        ))
    }

    fn exit(&mut self) {}
}
