//! Control words shared between consumer and worker.
//!
//! Everything here is a single atomic in [`SessionHeader`] line 2, except the
//! fault slot, which is published by storing its length with `Release` after
//! the bytes are in place.

use crate::segment::SessionHeader;
use evo::consts::FAULT_SLOT_SIZE;
use evo::fault::FaultRecord;
use evo::lifecycle::WorkerState;
use std::sync::atomic::Ordering;

impl SessionHeader {
    /// Worker state as last published. `None` if the raw value is unknown.
    #[inline]
    pub fn worker_state(&self) -> Option<WorkerState> {
        WorkerState::from_u32(self.state.load(Ordering::Acquire))
    }

    /// Publish a new worker state.
    #[inline]
    pub fn publish_state(&self, state: WorkerState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Raise the one-shot readiness flag. Returns `false` if it was already set.
    #[inline]
    pub fn signal_ready(&self) -> bool {
        self.ready.swap(1, Ordering::AcqRel) == 0
    }

    /// True once the worker has signaled readiness.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) != 0
    }

    /// Ask the worker to leave its sampling loop.
    #[inline]
    pub fn request_stop(&self) {
        self.stop.store(1, Ordering::Release);
    }

    /// True once a stop has been requested.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire) != 0
    }

    /// Worker process ID, 0 until the worker has attached.
    #[inline]
    pub fn worker_pid(&self) -> u32 {
        self.worker_pid.load(Ordering::Acquire)
    }

    /// Record the worker process ID.
    #[inline]
    pub fn set_worker_pid(&self, pid: u32) {
        self.worker_pid.store(pid, Ordering::Release);
    }

    /// Rows committed so far.
    #[inline]
    pub fn committed(&self) -> u64 {
        self.write_counter.load(Ordering::Acquire)
    }

    /// Store a fault record. Only the first fault of a session is kept.
    ///
    /// Returns `false` if a fault was already recorded. Must only be called
    /// by the worker, which is the single writer of the slot.
    pub fn record_fault(&self, record: &FaultRecord) -> bool {
        if self.fault_len.load(Ordering::Acquire) != 0 {
            return false;
        }
        let bytes = record.encode();
        let len = bytes.len().min(FAULT_SLOT_SIZE);
        // SAFETY: the worker is the only writer and the consumer does not
        // read the slot until `fault_len` becomes non-zero.
        unsafe {
            let slot = &mut *self.fault.get();
            slot[..len].copy_from_slice(&bytes[..len]);
        }
        self.fault_len.store(len as u32, Ordering::Release);
        true
    }

    /// Decode the recorded fault, if any.
    ///
    /// A slot that does not decode is reported as an unknown runtime fault.
    pub fn fault(&self) -> Option<FaultRecord> {
        let len = self.fault_len.load(Ordering::Acquire) as usize;
        if len == 0 {
            return None;
        }
        let len = len.min(FAULT_SLOT_SIZE);
        // SAFETY: `fault_len` was stored with Release after the bytes.
        let slot = unsafe { &*self.fault.get() };
        Some(FaultRecord::decode(&slot[..len]).unwrap_or_else(|e| {
            FaultRecord::new(
                evo::fault::FaultKind::Runtime,
                &format!("unreadable fault record: {e}"),
            )
        }))
    }
}
