//! Worker latency tuning: scheduling priority and page locking.
//!
//! Both settings are best effort. A failure is logged as a warning and the
//! session continues untuned. [`TuningGuard`] undoes whatever was applied
//! when the worker leaves its sampling loop.

use bitflags::bitflags;
use nix::errno::Errno;
use tracing::{debug, warn};

/// Nice value requested by [`TuningFlags::RAISE_PRIORITY`].
pub const WORKER_NICE: i32 = -10;

bitflags! {
    /// Optional worker tuning.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TuningFlags: u8 {
        /// Lower the worker's nice value to [`WORKER_NICE`].
        const RAISE_PRIORITY = 0x01;
        /// Lock all worker pages in memory (`mlockall`).
        const LOCK_MEMORY    = 0x02;
    }
}

/// Applied tuning, restored on drop.
#[derive(Debug, Default)]
pub struct TuningGuard {
    previous_nice: Option<i32>,
    memory_locked: bool,
}

impl TuningGuard {
    /// Apply `flags` to the calling process.
    pub fn apply(flags: TuningFlags) -> Self {
        let mut guard = Self::default();

        if flags.contains(TuningFlags::RAISE_PRIORITY) {
            match raise_priority(WORKER_NICE) {
                Ok(previous) => {
                    debug!(previous, nice = WORKER_NICE, "worker priority raised");
                    guard.previous_nice = Some(previous);
                }
                Err(e) => warn!("setpriority({WORKER_NICE}) failed: {e}"),
            }
        }

        if flags.contains(TuningFlags::LOCK_MEMORY) {
            match lock_memory() {
                Ok(()) => {
                    debug!("worker memory locked");
                    guard.memory_locked = true;
                }
                Err(e) => warn!("mlockall failed: {e}"),
            }
        }

        guard
    }

    /// True if anything was actually applied.
    pub fn is_active(&self) -> bool {
        self.previous_nice.is_some() || self.memory_locked
    }
}

impl Drop for TuningGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous_nice.take() {
            if let Err(e) = set_nice(previous) {
                warn!("failed to restore nice value {previous}: {e}");
            }
        }
        if self.memory_locked {
            if let Err(e) = nix::sys::mman::munlockall() {
                warn!("munlockall failed: {e}");
            }
        }
    }
}

/// Current nice value of the calling process.
pub fn current_nice() -> Result<i32, Errno> {
    // getpriority may legitimately return -1; errno tells failures apart.
    Errno::clear();
    let value = unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) };
    if value == -1 && Errno::last_raw() != 0 {
        return Err(Errno::last());
    }
    Ok(value)
}

fn set_nice(value: i32) -> Result<(), Errno> {
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, value) };
    if ret != 0 {
        return Err(Errno::last());
    }
    Ok(())
}

/// Set the nice value to `nice`, returning the previous one.
fn raise_priority(nice: i32) -> Result<i32, Errno> {
    let previous = current_nice()?;
    set_nice(nice)?;
    Ok(previous)
}

fn lock_memory() -> Result<(), Errno> {
    use nix::sys::mman::{MlockAllFlags, mlockall};
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
}
