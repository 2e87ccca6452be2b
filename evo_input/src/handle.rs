//! Consumer handle for a device sampled in a worker process.

use crate::config::SamplerConfig;
use crate::device::Device;
use crate::error::InputError;
use crate::supervisor::WorkerProcess;
use crate::worker::WorkerArgs;
use evo_common::fault::FaultRecord;
use evo_common::lifecycle::{TransitionResult, WorkerEvent, WorkerState, WorkerStateMachine};
use evo_common::schema::DeviceSchema;
use evo_shared_memory::platform::get_current_pid;
use evo_shared_memory::{Batch, RingLayout, RingReader, segment_path};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Level, debug, info, warn};

/// Per-process session counter, part of every segment name.
static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

struct ActiveSession {
    reader: RingReader,
    worker: WorkerProcess,
}

/// Multiprocess device handle.
///
/// The device itself lives in a worker process; this handle owns the shared
/// ring, the read cursor and the worker's lifetime.
///
/// ```rust,no_run
/// use evo_input::MpDevice;
/// use evo_input::drivers::simulation::{CounterConfig, CounterDevice};
///
/// # fn main() -> Result<(), evo_input::InputError> {
/// let mut device = MpDevice::<CounterDevice>::new(CounterConfig::default())?;
/// let mut session = device.session()?;
/// if let Some(batch) = session.read()? {
///     println!("{} rows, {} missed", batch.len(), batch.missed);
/// }
/// session.finish()
/// # }
/// ```
pub struct MpDevice<D: Device> {
    config: D::Config,
    sampler: SamplerConfig,
    layout: RingLayout,
    machine: WorkerStateMachine,
    session: Option<ActiveSession>,
    _device: PhantomData<fn() -> D>,
}

impl<D: Device> MpDevice<D> {
    /// Handle with the default sampler configuration.
    pub fn new(config: D::Config) -> Result<Self, InputError> {
        Self::with_sampler(config, SamplerConfig::default())
    }

    /// Handle with an explicit sampler configuration.
    ///
    /// The ring layout is computed here, so schema and capacity errors
    /// surface before any process exists.
    pub fn with_sampler(config: D::Config, sampler: SamplerConfig) -> Result<Self, InputError> {
        sampler.validate()?;
        let schema = D::schema(&config)?;
        let layout = RingLayout::allocate(&schema, sampler.capacity)?;
        debug!(
            device = D::NAME,
            capacity = layout.capacity(),
            size = layout.total_size(),
            "ring layout computed"
        );
        Ok(Self {
            config,
            sampler,
            layout,
            machine: WorkerStateMachine::new(),
            session: None,
            _device: PhantomData,
        })
    }

    /// Spawn the worker and block until the device is acquired.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` if a session is running; `Setup` with the worker's
    /// captured fault if the device could not be opened; `WorkerExited` if
    /// the worker died without reporting; `ReadyTimeout` if a ready timeout
    /// is configured and was exceeded.
    pub fn start(&mut self) -> Result<(), InputError> {
        if self.session.is_some() {
            return Err(InputError::AlreadyStarted);
        }
        self.transition(WorkerEvent::Reset);

        let parent_pid = get_current_pid();
        let path = segment_path(D::NAME, parent_pid, SESSION_SEQ.fetch_add(1, Ordering::Relaxed));
        let reader = RingReader::new(self.layout.create_segment(&path)?, self.layout.clone())?;

        let mut args = WorkerArgs::new(path, D::NAME, serde_json::to_string(&self.config)?, parent_pid)
            .with_tuning(self.sampler.tuning());
        args.log_level = self.sampler.worker_log_level.map(|l| l.as_directive().to_string());
        args.verbose = tracing::enabled!(Level::DEBUG);

        let program = self.sampler.resolve_worker_program();
        let mut worker = WorkerProcess::spawn(&program, &args)?;
        self.transition(WorkerEvent::Spawn);

        let ready = worker.wait_ready(reader.header(), self.sampler.ready_timeout());

        // A runtime fault raised after readiness is left for the next read.
        if let Some(fault) = reader.header().fault().filter(|f| f.kind.is_setup()) {
            self.close(ActiveSession { reader, worker }, Some(&fault));
            return Err(InputError::from_fault(fault));
        }
        if let Err(e) = ready {
            self.close(ActiveSession { reader, worker }, None);
            return Err(e);
        }

        self.transition(WorkerEvent::Ready);
        info!(
            device = D::NAME,
            pid = worker.pid(),
            capacity = self.layout.capacity(),
            "device started"
        );
        self.session = Some(ActiveSession { reader, worker });
        Ok(())
    }

    /// Copy every row committed since the last `read` or `clear`.
    ///
    /// Returns `Ok(None)` when nothing new was written. A fault captured by
    /// the worker is returned once as an error; the handle is closed after
    /// that.
    pub fn read(&mut self) -> Result<Option<Batch>, InputError> {
        let session = self.check_worker()?;
        Ok(session.reader.read())
    }

    /// Skip every pending row. Returns how many were skipped.
    pub fn clear(&mut self) -> Result<u64, InputError> {
        let session = self.check_worker()?;
        Ok(session.reader.clear())
    }

    /// Stop the worker and release the ring.
    ///
    /// A no-op when not running. Returns a fault the worker captured but
    /// that was not reported yet, or `JoinTimeout` if the worker had to be
    /// killed.
    pub fn stop(&mut self) -> Result<(), InputError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        self.transition(WorkerEvent::StopRequested);
        session.worker.request_stop(session.reader.header());
        let joined = session.worker.join(self.sampler.join_timeout());
        let fault = session.reader.header().fault();
        let rows = session.reader.header().committed();
        self.close(session, fault.as_ref());
        info!(device = D::NAME, rows, "device stopped");

        if let Some(fault) = fault {
            return Err(InputError::from_fault(fault));
        }
        joined.map(|status| debug!(device = D::NAME, %status, "worker joined"))
    }

    /// Start and return a guard that stops the session when dropped.
    pub fn session(&mut self) -> Result<Session<'_, D>, InputError> {
        self.start()?;
        Ok(Session { device: self })
    }

    /// Lifecycle state. While running, this is the state the worker published.
    pub fn state(&self) -> WorkerState {
        self.session
            .as_ref()
            .and_then(|s| s.reader.header().worker_state())
            .unwrap_or(self.machine.state())
    }

    /// True while a session is active.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Ring capacity in rows.
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// Declared streams.
    pub fn schema(&self) -> &DeviceSchema {
        self.layout.schema()
    }

    /// Ring layout.
    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    /// Device configuration.
    pub fn config(&self) -> &D::Config {
        &self.config
    }

    /// Sampler configuration.
    pub fn sampler(&self) -> &SamplerConfig {
        &self.sampler
    }

    /// Worker process ID while running.
    pub fn worker_pid(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.worker.pid())
    }

    /// Segment of the running session.
    pub fn segment_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.reader.segment().path())
    }

    /// The active session, after checking that its worker is healthy.
    ///
    /// A captured fault or a dead worker closes the session.
    fn check_worker(&mut self) -> Result<&mut ActiveSession, InputError> {
        let health = {
            let session = self.session.as_mut().ok_or(InputError::ClosedDevice)?;
            let header = session.reader.header();
            match header.fault() {
                None if session.worker.is_alive() => Ok(()),
                // The worker may have recorded a fault just before exiting.
                fault => Err(fault.or_else(|| header.fault())),
            }
        };

        let fault = match health {
            Ok(()) => return self.session.as_mut().ok_or(InputError::ClosedDevice),
            Err(fault) => fault,
        };
        if let Some(session) = self.session.take() {
            self.close(session, fault.as_ref());
        }
        match fault {
            Some(fault) => Err(InputError::from_fault(fault)),
            None => {
                warn!(device = D::NAME, "worker exited without reporting a fault");
                Err(InputError::ClosedDevice)
            }
        }
    }

    /// Reap the worker and drop the segment.
    fn close(&mut self, mut session: ActiveSession, fault: Option<&FaultRecord>) {
        if let Some(fault) = fault {
            warn!(device = D::NAME, "{fault}");
            self.transition(WorkerEvent::Fault);
        }
        if let Err(e) = session.worker.join(self.sampler.join_timeout()) {
            warn!(device = D::NAME, program = %session.worker.program().display(), "{e}");
        }
        self.transition(WorkerEvent::Exited);
    }

    fn transition(&mut self, event: WorkerEvent) {
        if let TransitionResult::Rejected(reason) = self.machine.handle_event(event) {
            debug!(device = D::NAME, ?event, state = ?self.machine.state(), "{reason}");
        }
    }
}

impl<D: Device> Drop for MpDevice<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(device = D::NAME, "stop on drop failed: {e}");
        }
    }
}

/// A started [`MpDevice`]; stops it when dropped.
pub struct Session<'a, D: Device> {
    device: &'a mut MpDevice<D>,
}

impl<D: Device> Session<'_, D> {
    /// Stop now and report the outcome instead of logging it on drop.
    pub fn finish(self) -> Result<(), InputError> {
        self.device.stop()
    }
}

impl<D: Device> Deref for Session<'_, D> {
    type Target = MpDevice<D>;

    fn deref(&self) -> &Self::Target {
        self.device
    }
}

impl<D: Device> DerefMut for Session<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.device
    }
}

impl<D: Device> Drop for Session<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.stop() {
            warn!(device = D::NAME, "stop at end of session failed: {e}");
        }
    }
}
