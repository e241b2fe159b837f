//! Effect runtime benchmarks using criterion.
//!
//! Benchmarks for the tail-noop fast path, general capture and resume, and
//! request round trips through the event loop.
//!
//! Run with: cargo bench --bench effects_bench

use std::rc::Rc;

use blood_effects::async_io;
use blood_effects::{
    async_handler, await_request, drive, install, perform, Effect, EffectDecl, EventLoop,
    HandlerDef, IoOp, OpKind, OpTag, ReactorConfig, Resumption, Value,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

static COUNTER: EffectDecl = EffectDecl::new("counter", &["next"]);
static NEXT: OpTag = OpTag::new(&COUNTER, 0);

fn counter_def(kind: OpKind) -> Rc<HandlerDef> {
    HandlerDef::builder(Effect::of(&COUNTER))
        .op_sync(kind, NEXT, |r, local, _| {
            let n = local.expect_int();
            r.resume_tail(Value::Int(n + 1), Value::Int(n))
        })
        .build()
}

fn count_to(def: &Rc<HandlerDef>, yields: u64) -> Value {
    let out = drive(install(
        def,
        Value::Int(0),
        move |_| async move {
            let mut last = 0;
            for _ in 0..yields {
                last = perform(NEXT, Value::Null).await.expect_int();
            }
            Ok(Value::Int(last))
        },
        Value::Null,
    ));
    out.unwrap_or_default()
}

/// Benchmark yields answered by tail resumption
fn bench_tail_yield(c: &mut Criterion) {
    let mut group = c.benchmark_group("tail_yield");

    for yields in [1u64, 100, 1000] {
        group.throughput(Throughput::Elements(yields));

        // Synchronous tail-noop: runs in place at the yield site
        let noop = counter_def(OpKind::TailNoop);
        group.bench_with_input(BenchmarkId::new("tail_noop", yields), &yields, |b, &n| {
            b.iter(|| black_box(count_to(&noop, n)));
        });

        // Tail: captured and trampolined by the frame
        let tail = counter_def(OpKind::Tail);
        group.bench_with_input(BenchmarkId::new("tail", yields), &yields, |b, &n| {
            b.iter(|| black_box(count_to(&tail, n)));
        });
    }

    group.finish();
}

/// Benchmark general capture with an immediate resume
fn bench_general_resume(c: &mut Criterion) {
    let mut group = c.benchmark_group("general_resume");

    let def = HandlerDef::builder(Effect::of(&COUNTER))
        .op(OpKind::General, NEXT, |r: Resumption, local: Value, _| async move {
            r.release_resume(local, Value::Int(1)).await
        })
        .build();

    group.bench_function("capture_and_release_resume", |b| {
        b.iter(|| black_box(count_to(&def, 1)));
    });

    group.bench_function("capture_and_release", |b| {
        let discard = HandlerDef::builder(Effect::of(&COUNTER))
            .op_sync(OpKind::General, NEXT, |r, _, _| {
                r.release();
                Ok(Value::Int(0))
            })
            .build();
        b.iter(|| black_box(count_to(&discard, 1)));
    });

    group.finish();
}

/// Benchmark submit, park and completion of one request
fn bench_request_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_round_trip");

    group.bench_function("manual_request", |b| {
        let lp = EventLoop::new(ReactorConfig::default());
        b.iter(|| {
            let loop_ref = lp.clone();
            let parked = drive(async_handler(&lp, move || async move {
                let req = async_io::submit(&loop_ref, IoOp::Manual)?;
                loop_ref.complete(req, 0)?;
                Ok(Value::Int(await_request(&loop_ref, req).await.into()))
            }));
            let _ = lp.run();
            black_box(parked)
        });
        let _ = lp.close();
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_tail_yield,
    bench_general_resume,
    bench_request_round_trip,
);
criterion_main!(benches);
