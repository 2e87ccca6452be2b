//! Ring write/read throughput benchmarks

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use evo::schema::{DeviceSchema, StreamSpec};
use evo_shared_memory::{RingLayout, RingReader, RingWriter, segment_path};
use std::hint::black_box;

fn open(name: &str, capacity: usize) -> (RingWriter, RingReader) {
    let schema = DeviceSchema::new(1000.0)
        .with_stream(StreamSpec::of::<f64>("value", &[1]))
        .with_stream(StreamSpec::of::<f32>("accel", &[3]));
    let layout = RingLayout::with_capacity(&schema, capacity).unwrap();
    let path = segment_path(name, std::process::id(), capacity as u64);
    let reader = RingReader::new(layout.create_segment(&path).unwrap(), layout.clone()).unwrap();
    let writer = RingWriter::new(layout.attach_segment(&path).unwrap(), layout).unwrap();
    (writer, reader)
}

/// Benchmark committing single rows
fn bench_write(c: &mut Criterion) {
    let (mut writer, _reader) = open("bench_write", 1024);
    let value = 1.0f64.to_ne_bytes();
    let accel: Vec<u8> = bytemuck::cast_slice(&[0.1f32, 0.2, 9.81]).to_vec();

    c.bench_function("ring_write_row", |b| {
        b.iter(|| {
            black_box(
                writer
                    .write(0.0, &[Some(&value[..]), Some(&accel[..])])
                    .unwrap(),
            );
        });
    });
}

/// Benchmark draining batches of various sizes
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_read_batch");
    for rows in [1usize, 64, 1024] {
        let (mut writer, mut reader) = open("bench_read", 1024);
        let value = 1.0f64.to_ne_bytes();
        let accel: Vec<u8> = bytemuck::cast_slice(&[0.1f32, 0.2, 9.81]).to_vec();

        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                for _ in 0..rows {
                    writer
                        .write(0.0, &[Some(&value[..]), Some(&accel[..])])
                        .unwrap();
                }
                black_box(reader.read());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_write, bench_read);
criterion_main!(benches);
