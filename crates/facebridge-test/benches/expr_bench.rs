//! Benchmarks for expression parsing and evaluation

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use facebridge_rules::Expr;

const SIMPLE: &str = "-HeadRotY";
const COMPOUND: &str = "clamp(1 - EyeBlinkLeft * 1.2, 0, 1) * (HeadRotX > 10 ? 0.5 : 1)";

fn lookup(name: &str) -> Option<f64> {
    match name {
        "HeadRotX" => Some(12.0),
        "HeadRotY" => Some(-4.5),
        "EyeBlinkLeft" => Some(0.3),
        _ => None,
    }
}

fn bench_parse_simple(c: &mut Criterion) {
    c.bench_function("expr_parse_simple", |b| {
        b.iter(|| black_box(Expr::parse(black_box(SIMPLE))))
    });
}

fn bench_parse_compound(c: &mut Criterion) {
    c.bench_function("expr_parse_compound", |b| {
        b.iter(|| black_box(Expr::parse(black_box(COMPOUND))))
    });
}

fn bench_eval_compound(c: &mut Criterion) {
    let expr = Expr::parse(COMPOUND).unwrap();

    c.bench_function("expr_eval_compound", |b| {
        b.iter(|| black_box(expr.eval(lookup)))
    });
}

criterion_group!(
    benches,
    bench_parse_simple,
    bench_parse_compound,
    bench_eval_compound,
);
criterion_main!(benches);
