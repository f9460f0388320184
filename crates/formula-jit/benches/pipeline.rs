//! Compile and evaluation throughput for the core pipeline. The evaluate
//! benchmarks model the compile-once/evaluate-many workload.

use criterion::{criterion_group, criterion_main, Criterion};
use formula_jit::{Engine, Vm};
use std::hint::black_box;

const CURVE: &str = "x0+x1*(sin(x2*x3)^x4+exp(-x2*(x0^x6+x1)/x5))";
const DEDUP_HEAVY: &str = "(X0+X1)*exp(X1/(2.34-X2))+X3-3/exp(X1/(2.34-X2))+(X0+X1)";

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile/curve", |b| {
        b.iter(|| {
            let mut engine = Engine::new();
            engine.compile(black_box(CURVE)).expect("compile");
            engine
        })
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let mut engine = Engine::new();
    engine.compile(CURVE).expect("compile");
    let program = engine.program().expect("program");
    let args = [1.1, 2.2, 0.3, 0.4, 2.0, 1.7, 3.0];

    let mut vm = Vm::with_capacity(32);
    c.bench_function("evaluate/curve", |b| {
        b.iter(|| vm.eval(black_box(program), black_box(&args), &[]))
    });

    let mut dedup_engine = Engine::new();
    dedup_engine.compile(DEDUP_HEAVY).expect("compile");
    let dedup_program = dedup_engine.program().expect("program");
    let dedup_args = [1.0, 2.0, 0.5, 3.0];
    c.bench_function("evaluate/dedup_heavy", |b| {
        b.iter(|| vm.eval(black_box(dedup_program), black_box(&dedup_args), &[]))
    });
}

criterion_group!(benches, bench_compile, bench_evaluate);
criterion_main!(benches);
