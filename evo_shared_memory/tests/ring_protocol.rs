//! Ring protocol tests over real `/dev/shm` segments

use evo::schema::{DeviceSchema, StreamSpec};
use evo_shared_memory::{RingLayout, RingReader, RingWriter, ShmResult, segment_path};
use proptest::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQ: AtomicU64 = AtomicU64::new(0);

fn schema() -> DeviceSchema {
    DeviceSchema::new(100.0)
        .with_stream(StreamSpec::of::<f64>("value", &[1]))
        .with_stream(StreamSpec::of::<u32>("index", &[1]))
}

fn ring(name: &str, capacity: usize) -> ShmResult<(RingWriter, RingReader)> {
    let layout = RingLayout::with_capacity(&schema(), capacity)?;
    let path = segment_path(name, std::process::id(), SEQ.fetch_add(1, Ordering::Relaxed));
    let reader = RingReader::new(layout.create_segment(&path)?, layout.clone())?;
    let writer = RingWriter::new(layout.attach_segment(&path)?, layout)?;
    Ok((writer, reader))
}

fn write_sample(writer: &mut RingWriter, time: f64, index: u32) -> ShmResult<u64> {
    let value = (time * 10.0).to_ne_bytes();
    let index = index.to_ne_bytes();
    writer.write(time, &[Some(&value[..]), Some(&index[..])])
}

fn indices(batch: &evo_shared_memory::Batch) -> Vec<u32> {
    batch.stream("index").unwrap().values::<u32>().unwrap()
}

#[test]
fn test_scenario_capacity_clamp() -> ShmResult<()> {
    let (mut writer, mut reader) = ring("test_scenario_a", 5)?;
    for i in 1..=7u32 {
        write_sample(&mut writer, f64::from(i) / 10.0, i)?;
    }

    let batch = reader.read().expect("rows pending");
    assert_eq!(batch.times, vec![0.3, 0.4, 0.5, 0.6, 0.7]);
    assert_eq!(indices(&batch), vec![3, 4, 5, 6, 7]);
    assert_eq!(batch.missed, 2);
    assert!(reader.read().is_none());
    Ok(())
}

#[test]
fn test_scenario_clear_between_reads() -> ShmResult<()> {
    let (mut writer, mut reader) = ring("test_scenario_b", 100)?;
    for i in 0..10u32 {
        write_sample(&mut writer, f64::from(i), i)?;
    }
    let first = reader.read().expect("first batch");
    assert_eq!(first.len(), 10);
    assert!(first.times.windows(2).all(|w| w[0] < w[1]));

    reader.clear();
    for i in 10..20u32 {
        write_sample(&mut writer, f64::from(i), i)?;
    }
    let second = reader.read().expect("second batch");
    assert_eq!(indices(&second), (10..20).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_exactly_full_ring_returns_everything() -> ShmResult<()> {
    let (mut writer, mut reader) = ring("test_exactly_full", 10)?;
    for i in 0..10u32 {
        write_sample(&mut writer, f64::from(i), i)?;
    }
    let batch = reader.read().expect("full ring");
    assert_eq!(indices(&batch), (0..10).collect::<Vec<_>>());
    assert_eq!(batch.missed, 0);
    Ok(())
}

#[test]
fn test_empty_read() -> ShmResult<()> {
    let (mut writer, mut reader) = ring("test_empty_read", 10)?;
    assert!(reader.read().is_none());
    write_sample(&mut writer, 1.0, 1)?;
    assert!(reader.read().is_some());
    assert!(reader.read().is_none());
    Ok(())
}

#[test]
fn test_concurrent_writer_thread() -> ShmResult<()> {
    const TOTAL: u32 = 50_000;
    let (mut writer, mut reader) = ring("test_concurrent", 64)?;

    let producer = std::thread::spawn(move || -> ShmResult<()> {
        for i in 0..TOTAL {
            write_sample(&mut writer, f64::from(i), i)?;
        }
        Ok(())
    });

    let mut last: Option<u32> = None;
    let mut seen = 0u64;
    let mut missed = 0u64;
    loop {
        match reader.read() {
            Some(batch) => {
                missed += batch.missed;
                for (time, index) in batch.times.iter().zip(indices(&batch)) {
                    // Every returned row is internally consistent and strictly newer.
                    assert_eq!(*time, f64::from(index));
                    if let Some(prev) = last {
                        assert!(index > prev, "row {index} after {prev}");
                    }
                    last = Some(index);
                    seen += 1;
                }
            }
            None if producer.is_finished() && reader.pending() == 0 => break,
            None => std::thread::yield_now(),
        }
    }
    producer.join().expect("producer thread")?;

    assert_eq!(last, Some(TOTAL - 1));
    assert_eq!(seen + missed, u64::from(TOTAL));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_read_returns_newest_rows(capacity in 1usize..32, writes in 0u32..100) {
        let (mut writer, mut reader) = ring("prop_newest", capacity).unwrap();
        for i in 0..writes {
            write_sample(&mut writer, f64::from(i), i).unwrap();
        }
        let expected_len = (writes as usize).min(capacity);
        match reader.read() {
            None => prop_assert_eq!(writes, 0),
            Some(batch) => {
                let first = writes - expected_len as u32;
                prop_assert_eq!(indices(&batch), (first..writes).collect::<Vec<_>>());
                prop_assert_eq!(batch.missed, u64::from(first));
            }
        }
    }

    #[test]
    fn prop_reads_never_overlap(capacity in 1usize..16, chunks in prop::collection::vec(0u32..24, 1..12)) {
        let (mut writer, mut reader) = ring("prop_overlap", capacity).unwrap();
        let mut next = 0u32;
        let mut last_seen: Option<u32> = None;
        for chunk in chunks {
            for _ in 0..chunk {
                write_sample(&mut writer, f64::from(next), next).unwrap();
                next += 1;
            }
            if let Some(batch) = reader.read() {
                let rows = indices(&batch);
                prop_assert!(rows.windows(2).all(|w| w[1] == w[0] + 1));
                if let Some(prev) = last_seen {
                    prop_assert_eq!(rows[0] as u64, prev as u64 + 1 + batch.missed);
                }
                last_seen = rows.last().copied();
            }
        }
    }

    #[test]
    fn prop_wrap_equals_clear_then_write(capacity in 2usize..32, k_seed in 1usize..31) {
        let k = 1 + k_seed % (capacity - 1);

        let (mut wrapped_writer, mut wrapped_reader) = ring("prop_wrap_a", capacity).unwrap();
        for i in 0..(capacity + k) as u32 {
            write_sample(&mut wrapped_writer, f64::from(i), i).unwrap();
        }
        let (mut cleared_writer, mut cleared_reader) = ring("prop_wrap_b", capacity).unwrap();
        for i in 0..capacity as u32 {
            write_sample(&mut cleared_writer, f64::from(i), i).unwrap();
        }
        cleared_reader.clear();
        for i in capacity as u32..(capacity + k) as u32 {
            write_sample(&mut cleared_writer, f64::from(i), i).unwrap();
        }

        // Wrapped reader sees the newest N rows; their last k equal the cleared read.
        let wrapped = wrapped_reader.read().unwrap();
        let cleared = cleared_reader.read().unwrap();
        let tail = &indices(&wrapped)[capacity - k..];
        prop_assert_eq!(tail, &indices(&cleared)[..]);
        prop_assert_eq!(&wrapped.times[capacity - k..], &cleared.times[..]);
    }
}
