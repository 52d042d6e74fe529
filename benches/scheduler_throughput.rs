use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use timewarp_kernel::config::{GvtMode, KernelConfig};
use timewarp_kernel::event::{Event, Polarity};
use timewarp_kernel::kernel::Kernel;
use timewarp_kernel::lp::{LPState, LogicalProcess};
use timewarp_kernel::partition::RoundRobinPartitioner;

#[derive(Clone, Default)]
struct Counter(u64);

/// Schedules one self-timeout per step, like the teacher's
/// `ThroughputAgent`: minimal per-event work so the benchmark measures
/// scheduling/rollback overhead rather than model cost.
struct ThroughputLp {
    state: Counter,
    limit: u64,
}

impl LogicalProcess for ThroughputLp {
    fn initial_events(&mut self, self_id: usize) -> Vec<Event> {
        vec![Event::new(self_id, self_id, 1, 0, 0, Polarity::Positive, 0)]
    }

    fn receive_event(&mut self, event: &Event) -> Vec<Event> {
        self.state.0 += 1;
        if event.receive_time < self.limit {
            vec![Event::new(
                event.receiver_lp,
                event.receiver_lp,
                event.receive_time + 1,
                0,
                0,
                Polarity::Positive,
                0,
            )]
        } else {
            Vec::new()
        }
    }

    fn state(&mut self) -> &mut dyn LPState {
        &mut self.state
    }
}

fn build_kernel(num_lps: usize, horizon: u64, num_workers: usize) -> Kernel {
    let config = KernelConfig::new(num_lps, num_workers)
        .with_time_bound(horizon)
        .with_checkpoint_period(16)
        .with_gvt_cycle(5, GvtMode::Async)
        .with_arenas(1 << 16, 1 << 12);

    let lps = (0..num_lps)
        .map(|i| {
            (
                format!("lp-{i}"),
                Box::new(ThroughputLp {
                    state: Counter(0),
                    limit: horizon,
                }) as Box<dyn LogicalProcess>,
            )
        })
        .collect();

    Kernel::build(config, Box::new(RoundRobinPartitioner), lps).unwrap()
}

fn bench_lp_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("lp_scaling");
    let horizon = 2_000;

    for num_lps in [1, 10, 100].iter() {
        group.bench_with_input(BenchmarkId::new("lps", num_lps), num_lps, |b, &num_lps| {
            b.iter_with_setup(
                || build_kernel(num_lps, horizon, 1),
                |kernel| {
                    black_box(kernel.run().unwrap());
                },
            );
        });
    }

    group.finish();
}

fn bench_worker_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_scaling");
    group.sample_size(10);
    let horizon = 5_000;

    for num_workers in [1, 2, 4].iter() {
        group.bench_with_input(
            BenchmarkId::new("workers", num_workers),
            num_workers,
            |b, &num_workers| {
                b.iter_with_setup(
                    || build_kernel(50, horizon, num_workers),
                    |kernel| {
                        black_box(kernel.run().unwrap());
                    },
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_lp_scaling, bench_worker_scaling);
criterion_main!(benches);
