use std::time::Duration;

use criterion::{black_box, BatchSize, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};
use tempfile::tempdir;

use twinq::{FileQueueConfig, FileQueueService, InMemoryQueueService, QueueService, SystemClock};

const MESSAGES_PER_ITER: usize = 1_000;

fn cycle(service: &dyn QueueService, payload: &[u8]) {
    let queue = service
        .create_queue("bench", Duration::from_secs(60))
        .expect("create");
    for _ in 0..MESSAGES_PER_ITER {
        service.push(&queue, black_box(payload)).expect("push");
    }
    while let Some(message) = service.pull(&queue).expect("pull") {
        service.delete(&queue, &message).expect("delete");
    }
}

fn bench_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_push_pull_delete");
    for &size in &[64_usize, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || (InMemoryQueueService::default(), vec![0u8; size]),
                |(service, payload)| cycle(&service, &payload),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_push_pull_delete");
    group.sample_size(10);
    for &size in &[64_usize, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let dir = tempdir().expect("tempdir");
                    let config = FileQueueConfig {
                        sync_writes: false,
                        ..FileQueueConfig::default()
                    };
                    let service = FileQueueService::with_config(dir.path(), SystemClock, config);
                    (dir, service, vec![0u8; size])
                },
                |(_dir, service, payload)| cycle(&service, &payload),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_memory, bench_file);
criterion_main!(benches);
