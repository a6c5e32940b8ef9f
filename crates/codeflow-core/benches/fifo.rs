use codeflow_core::{Fifo, LockFreeFifo, MsgQFifo, SoftFifo};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

const OPS_PER_ITER: u64 = 10_000;

// ============================================================================
// 1. Single-thread push/pop cycles
// ============================================================================

fn cycle<Q: Fifo<u64>>(q: &Q, burst: u64) {
    let mut i = 0;
    while i < OPS_PER_ITER {
        for v in 0..burst {
            let _ = q.push(black_box(i + v));
        }
        for _ in 0..burst {
            black_box(q.pop().ok());
        }
        i += burst;
    }
}

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo/single_thread");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    for burst in [1u64, 10] {
        group.bench_with_input(BenchmarkId::new("soft", burst), &burst, |b, &burst| {
            let q = SoftFifo::<u64>::new(10);
            b.iter(|| cycle(&q, burst))
        });
        group.bench_with_input(BenchmarkId::new("lockfree", burst), &burst, |b, &burst| {
            let q = LockFreeFifo::<u64>::new(10);
            b.iter(|| cycle(&q, burst))
        });
        group.bench_with_input(BenchmarkId::new("msgq", burst), &burst, |b, &burst| {
            let q = MsgQFifo::<u64>::new();
            b.iter(|| cycle(&q, burst))
        });
    }

    group.finish();
}

// ============================================================================
// 2. Producer thread -> consumer thread, capacity 10 like a wired stream
// ============================================================================

fn spsc_transfer<Q>(q: Arc<Q>)
where
    Q: Fifo<u64> + 'static,
{
    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            for i in 0..OPS_PER_ITER {
                let mut v = i;
                while let Err(e) = q.push(v) {
                    v = e.into_inner();
                    std::hint::spin_loop();
                }
            }
        })
    };
    let mut got = 0;
    while got < OPS_PER_ITER {
        if let Ok(v) = q.pop() {
            black_box(v);
            got += 1;
        }
    }
    let _ = producer.join();
}

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo/spsc");
    group.throughput(Throughput::Elements(OPS_PER_ITER));
    group.sample_size(20);

    group.bench_function("soft", |b| b.iter(|| spsc_transfer(Arc::new(SoftFifo::<u64>::new(10)))));
    group.bench_function("lockfree", |b| {
        b.iter(|| spsc_transfer(Arc::new(LockFreeFifo::<u64>::new(10))))
    });
    group.bench_function("msgq", |b| b.iter(|| spsc_transfer(Arc::new(MsgQFifo::<u64>::new()))));

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_spsc);
criterion_main!(benches);
