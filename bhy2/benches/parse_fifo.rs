use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use bhy2::{parse_fifo, EventSizeTable, FifoBuffer, FifoEvent, FifoType, Registry};
use bhy2_test_data::{
    accelerometer_gyroscope_stream, ACCELEROMETER_ID, GYROSCOPE_ID, VECTOR_EVENT_SIZE,
};

/// Feed `stream` through `work_buffer` a piece at a time, the way the driver drains a FIFO.
fn parse_in_pieces(
    stream: &[u8],
    work_buffer: &mut [u8],
    sizes: &EventSizeTable,
    registry: &mut Registry<'_>,
) -> u64 {
    let mut buffer = FifoBuffer::new(work_buffer);
    let mut timestamp = 0;
    let mut remaining = stream;
    while !remaining.is_empty() || !buffer.unparsed().is_empty() {
        buffer.compact();
        let copied = buffer.extend_from_slice(remaining);
        remaining = &remaining[copied..];
        parse_fifo(
            &mut buffer,
            FifoType::NonWakeUp,
            &mut timestamp,
            sizes,
            registry,
        );
        if copied == 0 {
            break;
        }
    }
    timestamp
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut sizes = EventSizeTable::new();
    sizes.set_event_size(ACCELEROMETER_ID, VECTOR_EVENT_SIZE).unwrap();
    sizes.set_event_size(GYROSCOPE_ID, VECTOR_EVENT_SIZE).unwrap();
    let (stream, _) = accelerometer_gyroscope_stream(500);

    let mut sum = 0i64;
    let mut on_vector = |event: &FifoEvent<'_>| {
        sum += i16::from_le_bytes([event.data[0], event.data[1]]) as i64;
    };
    let mut registry = Registry::new();
    registry.register(ACCELEROMETER_ID, &mut on_vector).unwrap();

    let mut group = c.benchmark_group("FIFO Parsing");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    for capacity in [64usize, 512, 4096] {
        let mut work_buffer = vec![0u8; capacity];
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &stream,
            |b, stream| {
                b.iter(|| {
                    parse_in_pieces(
                        black_box(stream),
                        &mut work_buffer,
                        &sizes,
                        &mut registry,
                    )
                })
            },
        );
    }
    group.finish();
    drop(registry);
    black_box(sum);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
