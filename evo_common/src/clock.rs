//! Monotonic clock shared by devices and consumers.
//!
//! Timestamps are seconds since an arbitrary, system-wide origin
//! (`CLOCK_MONOTONIC`), as `f64`. Because the origin is the same for every
//! process on the machine, a sample stamped in the worker process can be
//! compared directly with [`MonotonicClock::now`] in the consumer.
//!
//! The clock is an explicit value handed to each device at construction;
//! there is no process-wide clock instance.

use nix::time::{ClockId, clock_gettime};

/// Source of monotonic timestamps in seconds.
pub trait Clock: Send {
    /// Current time in seconds.
    fn now(&self) -> f64;
}

/// `CLOCK_MONOTONIC` backed clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Create a clock handle.
    pub const fn new() -> Self {
        Self
    }

    /// Current `CLOCK_MONOTONIC` time in seconds.
    ///
    /// `clock_gettime(CLOCK_MONOTONIC)` cannot fail on Linux with a valid
    /// clock id; a failure falls back to `0.0` rather than panicking.
    #[inline]
    pub fn now(&self) -> f64 {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => ts.tv_sec() as f64 + ts.tv_nsec() as f64 * 1e-9,
            Err(_) => 0.0,
        }
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> f64 {
        MonotonicClock::now(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn clock_is_monotonic() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let now = clock.now();
            assert!(now >= prev);
            prev = now;
        }
    }

    #[test]
    fn clock_advances_with_sleep() {
        let clock = MonotonicClock::new();
        let t0 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = clock.now() - t0;
        assert!(elapsed >= 0.004, "elapsed {elapsed}");
    }

    #[test]
    fn clock_through_trait_object() {
        let clock: Box<dyn Clock> = Box::new(MonotonicClock);
        assert!(clock.now() > 0.0);
    }
}
