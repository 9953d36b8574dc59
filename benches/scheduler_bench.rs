//! Performance benchmarks for the cyclebench scheduler.
//!
//! Run with: `cargo bench`
//! Or for specific bench: `cargo bench --bench scheduler_bench`

use std::cell::RefCell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use cyclebench::agent::{Agent, DriverBuilder};
use cyclebench::{Args, BenchConfig, CallOptions, CountingDut, Env, Executor, ExitPolicy, Model};

// ============================================================================
// Clock Loop Benchmarks
// ============================================================================

/// Cycles per second with N tasks each waiting on every clock event.
fn bench_clock_with_tasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("clock_with_tasks");
    const CYCLES: u64 = 200;

    for num_tasks in [0usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(CYCLES));
        group.bench_with_input(
            BenchmarkId::new("tasks", num_tasks),
            num_tasks,
            |b, &num_tasks| {
                b.iter(|| {
                    cyclebench::run(BenchConfig::default(), move |sched| async move {
                        sched
                            .start_clock(Rc::new(RefCell::new(CountingDut::new())))
                            .unwrap();
                        for i in 0..num_tasks {
                            let s = sched.clone();
                            sched.spawn(format!("waiter{i}"), async move {
                                loop {
                                    s.step().await;
                                }
                            });
                        }
                        sched.clock_cycles(black_box(CYCLES)).await;
                    })
                    .unwrap()
                });
            },
        );
    }

    group.finish();
}

/// Queue hand-offs that must settle inside one cycle.
fn bench_settle_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("settle_chain");

    for depth in [1usize, 10, 50].iter() {
        group.throughput(Throughput::Elements(*depth as u64));
        group.bench_with_input(BenchmarkId::new("depth", depth), depth, |b, &depth| {
            b.iter(|| {
                cyclebench::run(BenchConfig::default(), move |sched| async move {
                    sched
                        .start_clock(Rc::new(RefCell::new(CountingDut::new())))
                        .unwrap();
                    let head = sched.queue::<u64>();
                    let mut input = head.clone();
                    for stage in 0..depth {
                        let output = sched.queue::<u64>();
                        let (rx, tx) = (input.clone(), output.clone());
                        sched.spawn(format!("stage{stage}"), async move {
                            loop {
                                tx.put(rx.get().await + 1);
                            }
                        });
                        input = output;
                    }
                    for round in 0..20u64 {
                        head.put(round);
                        black_box(input.get().await);
                        sched.step().await;
                    }
                })
                .unwrap()
            });
        });
    }

    group.finish();
}

// ============================================================================
// Executor Benchmarks
// ============================================================================

/// Driver calls per cycle through the priority drain.
fn bench_executor_drivers(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor_drivers");

    for num_drivers in [1usize, 8, 32].iter() {
        group.throughput(Throughput::Elements(*num_drivers as u64));
        group.bench_with_input(
            BenchmarkId::new("drivers", num_drivers),
            num_drivers,
            |b, &num_drivers| {
                b.iter(|| {
                    cyclebench::run(BenchConfig::default(), move |sched| async move {
                        sched
                            .start_clock(Rc::new(RefCell::new(CountingDut::new())))
                            .unwrap();

                        let mut builder = Agent::builder("bus");
                        let mut model = Model::builder(&sched, "ref");
                        for i in 0..num_drivers {
                            let name = format!("write{i}");
                            builder = builder.driver(
                                DriverBuilder::new(name.clone())
                                    .params(&["data"])
                                    .build(|args| async move { Some(args["data"].clone()) })
                                    .unwrap(),
                            );
                            model = model.driver_hook(("bus", name.as_str()), |args| {
                                Some(args["data"].clone())
                            });
                        }
                        let agent = builder.build(&sched).unwrap();
                        let env = Env::builder(&sched).agent(agent.clone()).build().unwrap();
                        env.attach(&model.build().unwrap()).unwrap();

                        for round in 0..10u64 {
                            let mut exec = Executor::new(&sched, ExitPolicy::All);
                            for i in 0..num_drivers {
                                let call = agent
                                    .call(&format!("write{i}"), vec![json!(round)], Args::new())
                                    .unwrap();
                                exec.call(call, CallOptions::new().priority((i % 100) as u8))
                                    .unwrap();
                            }
                            black_box(exec.execute().await);
                        }
                    })
                    .unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_clock_with_tasks,
    bench_settle_chain,
    bench_executor_drivers,
);

criterion_main!(benches);
