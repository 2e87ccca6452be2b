//! End-to-end sessions against the real `evo_input_worker` binary

use evo_common::fault::FaultKind;
use evo_common::lifecycle::WorkerState;
use evo_input::device::Device;
use evo_input::drivers::simulation::{CounterConfig, CounterDevice, CounterEvent};
use evo_input::worker::WorkerArgs;
use evo_input::{Batch, InputError, MpDevice, SamplerConfig};
use evo_shared_memory::{RingLayout, segment_path};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const WORKER: &str = env!("CARGO_BIN_EXE_evo_input_worker");
const DEADLINE: Duration = Duration::from_secs(10);

fn sampler() -> SamplerConfig {
    SamplerConfig::default()
        .with_worker_program(WORKER)
        .with_ready_timeout(DEADLINE)
}

fn counter(config: CounterConfig) -> MpDevice<CounterDevice> {
    MpDevice::with_sampler(config, sampler()).unwrap()
}

fn values(batch: &Batch) -> Vec<f64> {
    batch.stream("value").unwrap().values::<f64>().unwrap()
}

/// Read until at least `rows` rows arrived, returning every batch.
fn read_rows(device: &mut MpDevice<CounterDevice>, rows: usize) -> Vec<Batch> {
    let start = Instant::now();
    let mut batches = Vec::new();
    let mut seen = 0;
    while seen < rows {
        assert!(start.elapsed() < DEADLINE, "only {seen} of {rows} rows arrived");
        match device.read().unwrap() {
            Some(batch) => {
                seen += batch.len();
                batches.push(batch);
            }
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }
    batches
}

fn all_values(batches: &[Batch]) -> Vec<f64> {
    batches.iter().flat_map(values).collect()
}

fn wait_exit(child: &mut std::process::Child) -> ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        assert!(start.elapsed() < DEADLINE, "worker did not exit");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_setup_error_surfaces_from_start() {
    let mut device = counter(CounterConfig {
        fail_on_enter: true,
        ..Default::default()
    });

    let err = device.start().unwrap_err();
    let InputError::Setup(fault) = &err else {
        panic!("expected setup error, got {err:?}");
    };
    assert_eq!(fault.kind, FaultKind::Setup);
    assert!(fault.message.contains("refused to open"), "{}", fault.message);

    assert!(!device.is_running());
    assert_eq!(device.state(), WorkerState::Stopped);
    assert!(matches!(device.read(), Err(InputError::ClosedDevice)));
}

#[test]
fn test_runtime_error_surfaces_on_next_read() {
    let mut device = counter(CounterConfig {
        fail_after: Some(3),
        ..Default::default()
    });
    device.start().unwrap();

    let start = Instant::now();
    let mut rows = Vec::new();
    let err = loop {
        assert!(start.elapsed() < DEADLINE, "runtime fault never surfaced");
        match device.read() {
            Ok(Some(batch)) => rows.extend(values(&batch)),
            Ok(None) => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => break e,
        }
    };

    let InputError::Runtime(fault) = &err else {
        panic!("expected runtime error, got {err:?}");
    };
    assert!(fault.message.contains("after 3 reads"), "{}", fault.message);
    assert!(rows.len() <= 3);

    // Reported once; the handle is closed afterwards.
    assert!(matches!(device.read(), Err(InputError::ClosedDevice)));
    assert!(device.stop().is_ok());
}

#[test]
fn test_immediate_runtime_error_does_not_fail_start() {
    for _ in 0..5 {
        let mut device = counter(CounterConfig {
            fail_after: Some(0),
            ..Default::default()
        });
        device.start().unwrap();

        let start = Instant::now();
        let err = loop {
            assert!(start.elapsed() < DEADLINE, "runtime fault never surfaced");
            match device.read() {
                Ok(None) => std::thread::sleep(Duration::from_millis(1)),
                Ok(Some(batch)) => panic!("unexpected rows: {:?}", batch.times),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, InputError::Runtime(_)), "got {err:?}");
        assert!(!device.is_running());
    }
}

#[test]
fn test_finite_stream_is_read_in_order() {
    let mut device = counter(CounterConfig {
        count: Some(50),
        batch: 7,
        ..Default::default()
    });
    device.start().unwrap();

    let batches = read_rows(&mut device, 50);
    let expected: Vec<f64> = (0..50).map(f64::from).collect();
    assert_eq!(all_values(&batches), expected);
    assert!(batches.iter().all(|b| b.missed == 0));

    let times: Vec<f64> = batches.iter().flat_map(|b| b.times.clone()).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));

    device.stop().unwrap();
    assert_eq!(device.state(), WorkerState::Stopped);
}

#[test]
fn test_scenario_clear_between_worker_bursts() {
    // Two bursts of 10 rows, 200 ms apart.
    let mut device = counter(CounterConfig {
        count: Some(20),
        batch: 10,
        period_us: 200_000,
        ..Default::default()
    });
    device.start().unwrap();

    let first = all_values(&read_rows(&mut device, 10));
    assert_eq!(first, (0..10).map(f64::from).collect::<Vec<_>>());

    assert_eq!(device.clear().unwrap(), 0);

    let second = all_values(&read_rows(&mut device, 10));
    assert_eq!(second, (10..20).map(f64::from).collect::<Vec<_>>());
    device.stop().unwrap();
}

#[test]
fn test_capacity_clamp_through_worker() {
    let mut device = counter(CounterConfig {
        count: Some(25),
        frequency_hz: 10.0,
        ..Default::default()
    });
    assert_eq!(device.capacity(), 10);
    device.start().unwrap();
    std::thread::sleep(Duration::from_millis(500));

    let batch = device.read().unwrap().expect("rows pending");
    assert_eq!(values(&batch), (15..25).map(f64::from).collect::<Vec<_>>());
    assert_eq!(batch.missed, 15);
    assert!(device.read().unwrap().is_none());
    device.stop().unwrap();
}

#[test]
fn test_double_start_stop_and_restart() {
    let mut device = counter(CounterConfig::default());
    device.start().unwrap();
    assert!(device.is_running());
    assert!(device.worker_pid().is_some());
    assert!(matches!(device.start(), Err(InputError::AlreadyStarted)));

    device.stop().unwrap();
    assert!(matches!(device.read(), Err(InputError::ClosedDevice)));
    assert!(matches!(device.clear(), Err(InputError::ClosedDevice)));
    assert!(device.stop().is_ok());

    device.start().unwrap();
    assert!(!read_rows(&mut device, 1).is_empty());
    device.stop().unwrap();
}

#[test]
fn test_scoped_session_stops_on_drop() {
    let mut device = counter(CounterConfig::default());
    let path = {
        let mut session = device.session().unwrap();
        let path = session.segment_path().unwrap().to_path_buf();
        assert!(path.exists());
        assert!(session.read().is_ok());
        path
    };
    assert!(!device.is_running());
    assert!(!path.exists());
    assert_eq!(device.state(), WorkerState::Stopped);
}

#[test]
fn test_join_timeout_is_reported() {
    let sampler = sampler().with_join_timeout(Duration::from_millis(100));
    let mut device = MpDevice::<CounterDevice>::with_sampler(
        CounterConfig {
            period_us: 3_000_000,
            ..Default::default()
        },
        sampler,
    )
    .unwrap();
    device.start().unwrap();

    // The first row is immediate; the worker then sleeps inside its next read.
    read_rows(&mut device, 1);
    std::thread::sleep(Duration::from_millis(50));

    assert!(matches!(device.stop(), Err(InputError::JoinTimeout(_))));
    assert!(!device.is_running());
}

#[test]
fn test_absent_streams_read_back_as_fill() {
    let mut device = counter(CounterConfig {
        count: Some(9),
        pos_every: Some(3),
        ..Default::default()
    });
    device.start().unwrap();

    let batches = read_rows(&mut device, 9);
    let mut present = Vec::new();
    let mut rows = Vec::new();
    for batch in &batches {
        let pos = batch.stream("pos").unwrap();
        present.extend(pos.present.iter().copied());
        for i in 0..pos.len() {
            rows.push(pos.row::<i32>(i).unwrap());
        }
        // Absent rows hold the zero fill pattern.
        assert_eq!(pos.values::<i32>().unwrap().len(), pos.len() * 2);
    }

    assert_eq!(
        present,
        vec![true, false, false, true, false, false, true, false, false]
    );
    assert_eq!(rows[0], Some(vec![0, 0]));
    assert_eq!(rows[1], None);
    assert_eq!(rows[3], Some(vec![3, -3]));
    assert_eq!(rows[6], Some(vec![6, -6]));
    device.stop().unwrap();
}

#[test]
fn test_record_elements_round_trip() {
    let mut device = counter(CounterConfig {
        count: Some(4),
        event: true,
        ..Default::default()
    });
    device.start().unwrap();

    let batches = read_rows(&mut device, 4);
    let mut events = Vec::new();
    let mut times = Vec::new();
    for batch in &batches {
        events.extend(batch.stream("event").unwrap().values::<CounterEvent>().unwrap());
        times.extend(batch.times.iter().copied());
    }

    assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert_eq!(events.iter().map(|e| e.flags).collect::<Vec<_>>(), vec![0, 1, 0, 1]);
    for (event, time) in events.iter().zip(&times) {
        assert_eq!(event.stamp, *time);
    }

    let batch = &batches[0];
    assert!(matches!(
        batch.stream("event").unwrap().values::<f64>(),
        Err(evo_shared_memory::ShmError::ElementMismatch { .. })
    ));
    device.stop().unwrap();
}

#[test]
fn test_orphaned_worker_exits_cleanly() {
    // A pid that is guaranteed dead: a reaped child.
    let mut gone = Command::new("true").spawn().unwrap();
    let dead_pid = gone.id();
    gone.wait().unwrap();

    let config = CounterConfig::default();
    let layout = RingLayout::allocate(&CounterDevice::schema(&config).unwrap(), None).unwrap();
    let path = segment_path("orphan_test", std::process::id(), 0);
    let segment = layout.create_segment(&path).unwrap();

    let args = WorkerArgs::new(
        path.clone(),
        CounterDevice::NAME,
        serde_json::to_string(&config).unwrap(),
        dead_pid,
    );
    let mut worker = Command::new(WORKER)
        .args(args.to_args())
        .stdout(Stdio::null())
        .spawn()
        .unwrap();

    let status = wait_exit(&mut worker);
    assert_eq!(status.code(), Some(0));
    assert_eq!(segment.header().worker_state(), Some(WorkerState::Stopped));
    assert!(segment.header().fault().is_none());
    assert!(segment.header().committed() > 0);
    // The orphaned worker removes the segment name on its way out.
    assert!(!path.exists());
}

#[test]
fn test_unknown_device_exits_with_fault() {
    let config = CounterConfig::default();
    let layout = RingLayout::allocate(&CounterDevice::schema(&config).unwrap(), None).unwrap();
    let path = segment_path("unknown_device_test", std::process::id(), 0);
    let segment = layout.create_segment(&path).unwrap();

    let args = WorkerArgs::new(path, "trackball", "{}".to_string(), std::process::id());
    let mut worker = Command::new(WORKER)
        .args(args.to_args())
        .stdout(Stdio::null())
        .spawn()
        .unwrap();

    let status = wait_exit(&mut worker);
    assert_eq!(status.code(), Some(1));
    assert!(segment.header().is_ready());
    assert_eq!(segment.header().worker_state(), Some(WorkerState::Errored));
    let fault = segment.header().fault().unwrap();
    assert_eq!(fault.kind, FaultKind::Setup);
    assert!(fault.message.contains("trackball"));
}

#[test]
fn test_missing_segment_exit_code() {
    let args = WorkerArgs::new(
        segment_path("missing_segment_test", std::process::id(), 0),
        CounterDevice::NAME,
        "{}".to_string(),
        std::process::id(),
    );
    let status = Command::new(WORKER)
        .args(args.to_args())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}
