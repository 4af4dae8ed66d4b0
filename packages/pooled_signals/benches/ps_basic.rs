//! Basic benchmarks for the `pooled_signals` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use pooled_signals::{
    BlockAllocator, FixedPool, Observer, PreallocatedPool, SharedPool, Signal, Subscriber,
};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const SUBSCRIBER_COUNT: usize = 64;

struct Sink {
    observer: Observer,
    total: Cell<u64>,
}

impl Sink {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            observer: Observer::new(),
            total: Cell::new(0),
        })
    }

    fn on_value(&self, value: u64) {
        self.total.set(self.total.get().wrapping_add(value));
    }
}

impl Subscriber for Sink {
    fn observer(&self) -> &Observer {
        &self.observer
    }
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("ps_basic");

    let pool = PreallocatedPool::builder().capacity(1024).stride(64).build();

    let allocs_op = allocs.operation("pool_alloc_free");
    group.bench_function("pool_alloc_free", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let block = black_box(pool.alloc()).expect("pool has vacant blocks");
                // SAFETY: The block was allocated from this pool and is not used afterwards.
                unsafe { pool.free(block) };
            }

            start.elapsed()
        });
    });

    let fixed = FixedPool::<64, 1024>::new();

    let allocs_op = allocs.operation("fixed_pool_alloc_free");
    group.bench_function("fixed_pool_alloc_free", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let block = black_box(fixed.alloc()).expect("pool has vacant blocks");
                // SAFETY: The block was allocated from this pool and is not used afterwards.
                unsafe { fixed.free(block) };
            }

            start.elapsed()
        });
    });

    let connections = SharedPool::for_connections(SUBSCRIBER_COUNT);
    let signal = Signal::<(u64,)>::with_pool(&connections);
    let sink = Sink::new();

    let allocs_op = allocs.operation("connect_disconnect");
    group.bench_function("connect_disconnect", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                signal
                    .connect(&sink, Sink::on_value)
                    .expect("pool has vacant blocks");
                signal.disconnect(black_box(&*sink));
            }

            start.elapsed()
        });
    });

    let sinks: Vec<_> = (0..SUBSCRIBER_COUNT).map(|_| Sink::new()).collect();

    for sink in &sinks {
        signal
            .connect(sink, Sink::on_value)
            .expect("pool has room for every sink");
    }

    let allocs_op = allocs.operation("emit_to_many");
    group.bench_function("emit_to_many", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for i in 0..iters {
                signal.emit(black_box(i));
            }

            start.elapsed()
        });
    });

    group.finish();

    drop(sinks);

    allocs.print_to_stdout();
}
