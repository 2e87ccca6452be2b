//! Producer worker: owns one device in its own process and fills the ring.
//!
//! ```text
//! attach control ─► attach ring ─► Device::new ─► enter ─► Ready ─► Running
//!                                                             │
//!      ┌──────────────────────────────────────────────────────┘
//!      ▼
//!  stop? parent alive? ─► read() ─► commit rows ─► (loop)
//! ```
//!
//! Any failure is captured as a [`FaultRecord`] in the session header,
//! the state is set to `Errored` and readiness is signaled so a consumer
//! blocked in `start()` wakes up.

use crate::device::{Acquired, Device, Reading, Sample};
use crate::registry::DeviceRegistry;
use crate::tuning::{TuningFlags, TuningGuard};
use clap::Parser;
use evo_common::clock::MonotonicClock;
use evo_common::consts::{LIVENESS_PROBE_INTERVAL, LIVENESS_PROBE_PERIOD, MAX_STREAMS};
use evo_common::fault::{FaultKind, FaultRecord};
use evo_common::lifecycle::{TransitionResult, WorkerEvent, WorkerStateMachine};
use evo_shared_memory::platform::{get_current_pid, is_process_alive};
use evo_shared_memory::{RingLayout, RingWriter, SessionHeader, SharedMemorySegment};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// EVO input worker - samples one device into a shared memory ring
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "evo_input_worker")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Samples one input device into a shared memory ring")]
#[command(long_about = None)]
pub struct WorkerArgs {
    /// Session segment created by the consumer
    #[arg(long, value_name = "PATH")]
    pub segment: PathBuf,

    /// Registered device name
    #[arg(long)]
    pub device: String,

    /// Device configuration as JSON
    #[arg(long, value_name = "JSON")]
    pub config: String,

    /// Consumer process to watch; the worker exits when it is gone (0 disables)
    #[arg(long)]
    pub parent_pid: u32,

    /// Raise scheduling priority while sampling
    #[arg(long)]
    pub raise_priority: bool,

    /// Lock memory while sampling
    #[arg(long)]
    pub lock_memory: bool,

    /// Log level when `RUST_LOG` is unset
    #[arg(long, value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json: bool,
}

impl WorkerArgs {
    /// Arguments for sampling `device` into `segment`.
    pub fn new(segment: PathBuf, device: &str, config: String, parent_pid: u32) -> Self {
        Self {
            segment,
            device: device.to_string(),
            config,
            parent_pid,
            raise_priority: false,
            lock_memory: false,
            log_level: None,
            verbose: false,
            json: false,
        }
    }

    /// Request tuning.
    pub fn with_tuning(mut self, flags: TuningFlags) -> Self {
        self.raise_priority = flags.contains(TuningFlags::RAISE_PRIORITY);
        self.lock_memory = flags.contains(TuningFlags::LOCK_MEMORY);
        self
    }

    /// Requested tuning.
    pub fn tuning(&self) -> TuningFlags {
        let mut flags = TuningFlags::empty();
        flags.set(TuningFlags::RAISE_PRIORITY, self.raise_priority);
        flags.set(TuningFlags::LOCK_MEMORY, self.lock_memory);
        flags
    }

    /// Command line for spawning a worker with these arguments (program name excluded).
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--segment".into(),
            self.segment.clone().into_os_string(),
            "--device".into(),
            self.device.clone().into(),
            "--config".into(),
            self.config.clone().into(),
            "--parent-pid".into(),
            self.parent_pid.to_string().into(),
        ];
        if self.raise_priority {
            args.push("--raise-priority".into());
        }
        if self.lock_memory {
            args.push("--lock-memory".into());
        }
        if let Some(level) = &self.log_level {
            args.push("--log-level".into());
            args.push(level.into());
        }
        if self.verbose {
            args.push("--verbose".into());
        }
        if self.json {
            args.push("--json".into());
        }
        args
    }
}

/// Worker process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerExit {
    /// Stop requested, or the consumer is gone
    Clean = 0,
    /// A fault was captured in the session header
    Faulted = 1,
    /// The session segment could not be attached; nothing was reported
    AttachFailed = 2,
}

impl WorkerExit {
    /// Raw process exit code.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl From<WorkerExit> for ExitCode {
    fn from(exit: WorkerExit) -> Self {
        ExitCode::from(exit as u8)
    }
}

/// Entry point of a worker binary: parse arguments, set up logging, sample.
pub fn run_worker(registry: &DeviceRegistry) -> ExitCode {
    let args = WorkerArgs::parse();
    setup_tracing(&args);
    run_with_args(registry, &args).into()
}

/// Dispatch `args.device` through `registry`.
///
/// An unknown device name is reported as a setup fault.
pub fn run_with_args(registry: &DeviceRegistry, args: &WorkerArgs) -> WorkerExit {
    debug!(
        device = %args.device,
        segment = %args.segment.display(),
        parent_pid = args.parent_pid,
        "worker starting"
    );

    if let Some(runner) = registry.runner(&args.device) {
        return runner(args);
    }

    let control = match attach_control(args) {
        Ok(control) => control,
        Err(exit) => return exit,
    };
    control.header().set_worker_pid(get_current_pid());
    let mut publisher = StatePublisher::new(control.header());
    publisher.advance(WorkerEvent::Spawn);
    let mut known = registry.list_devices();
    known.sort_unstable();
    let record = FaultRecord::new(
        FaultKind::Setup,
        &format!("unknown device '{}' (known: {})", args.device, known.join(", ")),
    );
    publisher.fail(&record)
}

/// Sample device type `D` for the session described by `args`.
pub fn run_device<D: Device>(args: &WorkerArgs) -> WorkerExit {
    let control = match attach_control(args) {
        Ok(control) => control,
        Err(exit) => return exit,
    };
    let header = control.header();
    header.set_worker_pid(get_current_pid());

    let mut publisher = StatePublisher::new(header);
    publisher.advance(WorkerEvent::Spawn);

    match sample::<D>(args, &mut publisher) {
        Ok(SessionEnd::StopRequested) => {
            publisher.advance(WorkerEvent::Exited);
            info!(device = D::NAME, rows = header.committed(), "worker stopped");
            WorkerExit::Clean
        }
        Ok(SessionEnd::ParentLost) => {
            warn!(
                device = D::NAME,
                parent_pid = args.parent_pid,
                "consumer process is gone, worker exiting"
            );
            // Nobody is left to unlink the segment.
            if let Err(e) = control.unlink() {
                warn!(segment = %args.segment.display(), "failed to remove orphaned segment: {e}");
            }
            WorkerExit::Clean
        }
        Err(record) => publisher.fail(&record),
    }
}

enum SessionEnd {
    StopRequested,
    ParentLost,
}

fn sample<D: Device>(
    args: &WorkerArgs,
    publisher: &mut StatePublisher<'_>,
) -> Result<SessionEnd, FaultRecord> {
    let header = publisher.header;

    let config: D::Config = serde_json::from_str(&args.config).map_err(|e| {
        FaultRecord::new(FaultKind::Setup, &format!("invalid device configuration: {e}"))
    })?;
    let schema = D::schema(&config).map_err(|e| FaultRecord::new(FaultKind::Setup, &e.to_string()))?;

    let attach_fault = |e: evo_shared_memory::ShmError| FaultRecord::new(FaultKind::Attach, &e.to_string());
    let layout = RingLayout::with_capacity(&schema, header.capacity as usize).map_err(attach_fault)?;
    let segment = layout.attach_segment(&args.segment).map_err(attach_fault)?;
    let mut writer = RingWriter::new(segment, layout).map_err(attach_fault)?;

    let device = D::new(config, MonotonicClock::new())
        .map_err(|e| FaultRecord::new(FaultKind::Setup, &e.to_string()))?;
    let mut device =
        Acquired::enter(device).map_err(|e| FaultRecord::new(FaultKind::Setup, &e.to_string()))?;

    publisher.advance(WorkerEvent::Ready);
    header.signal_ready();

    let _tuning = TuningGuard::apply(args.tuning());
    publisher.advance(WorkerEvent::SamplingBegun);
    info!(
        device = D::NAME,
        capacity = writer.layout().capacity(),
        pid = get_current_pid(),
        "sampling"
    );

    let mut probe = LivenessProbe::new(args.parent_pid);
    loop {
        if header.stop_requested() {
            publisher.advance(WorkerEvent::StopRequested);
            return Ok(SessionEnd::StopRequested);
        }
        if !probe.parent_alive() {
            publisher.advance(WorkerEvent::ParentLost);
            return Ok(SessionEnd::ParentLost);
        }

        match device.read() {
            Ok(Reading::Nothing) => std::thread::yield_now(),
            Ok(Reading::One(sample)) => commit(&mut writer, &sample)?,
            Ok(Reading::Many(samples)) => {
                for sample in &samples {
                    commit(&mut writer, sample)?;
                }
            }
            Err(e) => return Err(FaultRecord::new(FaultKind::Runtime, &e.to_string())),
        }
    }
}

/// Write one sample, checking it against the schema first.
fn commit(writer: &mut RingWriter, sample: &Sample) -> Result<(), FaultRecord> {
    let invalid = |message: String| FaultRecord::new(FaultKind::InvalidSample, &message);

    let streams = writer.layout().streams();
    if sample.values.len() != streams.len() {
        return Err(invalid(format!(
            "sample has {} values for {} streams",
            sample.values.len(),
            streams.len()
        )));
    }

    let mut values: heapless::Vec<Option<&[u8]>, MAX_STREAMS> = heapless::Vec::new();
    for (stream, value) in streams.iter().zip(&sample.values) {
        let bytes = match value {
            Some(value) if value.element() != &stream.spec.element => {
                return Err(invalid(format!(
                    "stream '{}' expects {:?}, got {:?}",
                    stream.spec.name,
                    stream.spec.element,
                    value.element()
                )));
            }
            Some(value) => Some(value.as_bytes()),
            None => None,
        };
        values
            .push(bytes)
            .map_err(|_| invalid(format!("more than {MAX_STREAMS} streams")))?;
    }

    writer
        .write(sample.time, &values)
        .map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

fn attach_control(args: &WorkerArgs) -> Result<SharedMemorySegment, WorkerExit> {
    SharedMemorySegment::attach(&args.segment).map_err(|e| {
        error!(segment = %args.segment.display(), "cannot attach session segment: {e}");
        WorkerExit::AttachFailed
    })
}

/// Worker-side view of the lifecycle, mirrored into the session header.
struct StatePublisher<'a> {
    header: &'a SessionHeader,
    machine: WorkerStateMachine,
}

impl<'a> StatePublisher<'a> {
    fn new(header: &'a SessionHeader) -> Self {
        Self {
            header,
            machine: WorkerStateMachine::new(),
        }
    }

    fn advance(&mut self, event: WorkerEvent) {
        match self.machine.handle_event(event) {
            TransitionResult::Ok(state) => self.header.publish_state(state),
            TransitionResult::Rejected(reason) => {
                debug!(?event, state = ?self.machine.state(), "ignored transition: {reason}");
            }
        }
    }

    /// Record `record`, publish `Errored` and unblock a waiting consumer.
    fn fail(&mut self, record: &FaultRecord) -> WorkerExit {
        error!("{record}");
        if !self.header.record_fault(record) {
            warn!("fault slot already used, dropping: {record}");
        }
        self.advance(WorkerEvent::Fault);
        self.header.signal_ready();
        WorkerExit::Faulted
    }
}

/// Rate-limited `kill(parent, 0)` check.
struct LivenessProbe {
    parent_pid: u32,
    iterations: u32,
    last_probe: Instant,
}

impl LivenessProbe {
    fn new(parent_pid: u32) -> Self {
        Self {
            parent_pid,
            iterations: 0,
            last_probe: Instant::now(),
        }
    }

    fn parent_alive(&mut self) -> bool {
        if self.parent_pid == 0 {
            return true;
        }
        self.iterations += 1;
        if self.iterations < LIVENESS_PROBE_INTERVAL
            && self.last_probe.elapsed() < LIVENESS_PROBE_PERIOD
        {
            return true;
        }
        self.iterations = 0;
        self.last_probe = Instant::now();
        is_process_alive(self.parent_pid)
    }
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &WorkerArgs) {
    let level = match (args.verbose, &args.log_level) {
        (true, _) => "debug",
        (false, Some(level)) => level.as_str(),
        (false, None) => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if args.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
