//! Benchmarks for flow execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use stepflow::merge::{merge_all, MergeStrategy};
use stepflow::prelude::*;

fn compute_flow(steps: usize) -> Flow<u64, ()> {
    let mut builder = FlowBuilder::<u64, ()>::new("bench");
    for i in 0..steps {
        builder = builder.compute(format!("step_{i}"), move |ctx| async move {
            Ok(as_state(json!({ (format!("k{i}")): *ctx.input() + i as u64 })))
        });
    }
    match builder.build() {
        Ok(flow) => flow,
        Err(err) => panic!("bench flow failed to build: {err}"),
    }
}

fn flow_benchmark(c: &mut Criterion) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => panic!("failed to start runtime: {err}"),
    };
    let options = RunOptions::default();

    for steps in [1, 10, 50] {
        let flow = compute_flow(steps);
        c.bench_function(&format!("run_{steps}_compute_steps"), |b| {
            b.iter(|| runtime.block_on(flow.run(black_box(7), (), &options)));
        });
    }
}

fn merge_benchmark(c: &mut Criterion) {
    let partials: Vec<State> = (0..20)
        .filter_map(|i| as_state(json!({ "items": [i], "nested": { (format!("k{i}")): i } })))
        .collect();

    c.bench_function("deep_merge_20_partials", |b| {
        b.iter(|| merge_all(black_box(partials.clone()), MergeStrategy::Deep));
    });
}

criterion_group!(benches, flow_benchmark, merge_benchmark);
criterion_main!(benches);
