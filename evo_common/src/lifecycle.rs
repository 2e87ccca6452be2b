//! Worker lifecycle states and transitions.
//!
//! Global session lifecycle:
//! NotStarted → Starting → Ready → Running → Stopping → Stopped,
//! with Starting/Ready/Running → Errored → Stopped when the device fails, and
//! Running → Stopped when the worker loses its parent.
//!
//! The state is published through a single `AtomicU32` in the session header,
//! so it is `#[repr(u32)]` with an explicit decoding function.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a sampling worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u32)]
pub enum WorkerState {
    /// No worker exists for this handle.
    #[default]
    NotStarted = 0,
    /// Worker spawned, device not yet acquired.
    Starting = 1,
    /// Device acquired, readiness signaled.
    Ready = 2,
    /// Sampling loop active.
    Running = 3,
    /// Consumer asked the worker to stop.
    Stopping = 4,
    /// Worker exited.
    Stopped = 5,
    /// Worker captured a device fault.
    Errored = 6,
}

impl WorkerState {
    /// Decode a raw header value. Returns `None` for unknown values.
    #[inline]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::NotStarted),
            1 => Some(Self::Starting),
            2 => Some(Self::Ready),
            3 => Some(Self::Running),
            4 => Some(Self::Stopping),
            5 => Some(Self::Stopped),
            6 => Some(Self::Errored),
            _ => None,
        }
    }

    /// True while the worker is expected to be producing samples.
    #[inline]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    /// True once the worker has left the sampling loop for good.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Errored)
    }
}

/// Event that can trigger a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Consumer spawned the worker process.
    Spawn,
    /// Device acquired, readiness signaled.
    Ready,
    /// Worker entered the sampling loop.
    SamplingBegun,
    /// Device `enter()` or `read()` failed.
    Fault,
    /// Consumer requested stop.
    StopRequested,
    /// Worker process exited.
    Exited,
    /// Worker detected that its parent is gone.
    ParentLost,
    /// Handle returned to the not-started state for reuse.
    Reset,
}

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded, with the new state.
    Ok(WorkerState),
    /// Transition rejected, with the reason.
    Rejected(&'static str),
}

/// Lifecycle state machine holding the current state.
#[derive(Debug, Clone, Default)]
pub struct WorkerStateMachine {
    state: WorkerState,
}

impl WorkerStateMachine {
    /// Create a new machine in `NotStarted`.
    pub const fn new() -> Self {
        Self {
            state: WorkerState::NotStarted,
        }
    }

    /// Current state.
    #[inline]
    pub const fn state(&self) -> WorkerState {
        self.state
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: WorkerEvent) -> TransitionResult {
        use WorkerEvent as E;
        use WorkerState as S;

        let next = match (self.state, event) {
            (S::NotStarted, E::Spawn) => S::Starting,

            (S::Starting, E::Ready) => S::Ready,
            (S::Ready, E::SamplingBegun) => S::Running,

            // Device failure during setup or sampling.
            (S::Starting | S::Ready | S::Running, E::Fault) => S::Errored,

            (S::Starting | S::Ready | S::Running, E::StopRequested) => S::Stopping,
            // Stop after a fault still has to join the process.
            (S::Errored, E::StopRequested) => S::Errored,

            (S::Running, E::ParentLost) => S::Stopped,

            // Exit from any live state; an exit during setup is a crash.
            (S::Starting | S::Ready | S::Running | S::Stopping | S::Errored, E::Exited) => S::Stopped,

            (S::Stopped | S::Errored | S::NotStarted, E::Reset) => S::NotStarted,

            _ => return TransitionResult::Rejected(invalid_transition_reason(self.state, event)),
        };

        self.state = next;
        TransitionResult::Ok(next)
    }
}

fn invalid_transition_reason(state: WorkerState, event: WorkerEvent) -> &'static str {
    use WorkerEvent as E;
    use WorkerState as S;

    match (state, event) {
        (S::Starting | S::Ready | S::Running | S::Stopping, E::Spawn) => "worker already started",
        (S::Stopped | S::Errored, E::Spawn) => "handle must be reset before restarting",
        (S::NotStarted, _) => "worker not started",
        (S::Stopped, _) => "worker already stopped",
        (_, E::Ready) => "readiness is only signaled while starting",
        (_, E::SamplingBegun) => "sampling begins only after readiness",
        (_, E::ParentLost) => "parent loss is only observed while running",
        (_, E::Reset) => "cannot reset a live worker",
        _ => "invalid worker transition",
    }
}
