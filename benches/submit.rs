use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use orchestrator_rs::{
    HeapRegion, KernelOutcome, Orchestrator, OrchestratorConfig, Param, TensorMapConfig,
    WorkerType,
};

const TASKS: u32 = 256;

fn build() -> Orchestrator<'static> {
    static ARGS: [u64; 2] = [0, 0];
    Orchestrator::new(
        &ARGS,
        OrchestratorConfig {
            expected_arg_count: 2,
            task_window_capacity: TASKS,
            dep_pool_capacity: TASKS * 4,
            tensor_map: TensorMapConfig::default(),
            heap: HeapRegion::host_alloc(4 * 1024 * 1024),
        },
    )
    .unwrap()
}

/// Submission + hazard resolution for a linear chain: every task reads the
/// previous task's output, so each submission walks the overlap index and
/// records one edge.
fn bench_submit_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");
    group.throughput(Throughput::Elements(u64::from(TASKS)));

    group.bench_function("linear_chain", |b| {
        b.iter_batched(
            build,
            |mut orch| {
                let mut prev = orch.alloc(1024).unwrap();
                for i in 0..TASKS {
                    let next = orch.alloc(1024).unwrap();
                    orch.submit_task(
                        i,
                        WorkerType::Vector,
                        "kernel_copy",
                        &[Param::input(&prev), Param::output(&next)],
                    )
                    .unwrap();
                    prev = next;
                }
                black_box(orch.metrics_snapshot())
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("independent", |b| {
        b.iter_batched(
            build,
            |mut orch| {
                for i in 0..TASKS {
                    let buf = orch.alloc(1024).unwrap();
                    orch.submit_task(
                        i,
                        WorkerType::Vector,
                        "kernel_fill",
                        &[Param::output(&buf), Param::scalar(u64::from(i))],
                    )
                    .unwrap();
                }
                black_box(orch.metrics_snapshot())
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Full submit -> dispatch -> complete cycle, the steady-state loop a
/// device scheduler runs.
fn bench_submit_complete_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle");
    group.throughput(Throughput::Elements(u64::from(TASKS)));

    group.bench_function("submit_complete", |b| {
        b.iter_batched(
            build,
            |mut orch| {
                let sink = orch.completion_sink();
                let mut prev = orch.alloc(1024).unwrap();
                for i in 0..TASKS {
                    let next = orch.alloc(1024).unwrap();
                    orch.submit_task(
                        i,
                        WorkerType::Vector,
                        "kernel_copy",
                        &[Param::input(&prev), Param::output(&next)],
                    )
                    .unwrap();
                    prev = next;

                    while let Some(record) = orch.pop_ready(WorkerType::Vector) {
                        sink.signal(record.task, KernelOutcome::Success);
                    }
                    orch.drain_completions().unwrap();
                }
                black_box(orch.metrics_snapshot())
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_submit_chain, bench_submit_complete_cycle);
criterion_main!(benches);
