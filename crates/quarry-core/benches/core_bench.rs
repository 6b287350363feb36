//! Criterion benchmarks for the extraction and retrieval hot paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use quarry_core::indexer::chunks::extract_chunks;
use quarry_core::indexer::parser::parse_source;
use quarry_core::models::ContextQuery;
use quarry_core::query::context::build_context;
use quarry_core::query::rank::rank_chunks;

/// Synthesize a module with `classes` classes of `methods` methods each,
/// plus the same number of top-level functions.
fn synthetic_module(classes: usize, methods: usize) -> String {
    let mut src = String::from("\"\"\"Synthetic benchmark module.\"\"\"\nimport os\nimport json\n\n");
    for c in 0..classes {
        src.push_str(&format!("class Service{c}:\n    \"\"\"Service number {c}\"\"\"\n\n"));
        for m in 0..methods {
            src.push_str(&format!(
                "    def handle_{m}(self, request, timeout={m}):\n        \"\"\"Handles request {m}\"\"\"\n        return request + {m}\n\n"
            ));
        }
    }
    for f in 0..classes {
        src.push_str(&format!(
            "def helper_{f}(value):\n    return value * {f}\n\n"
        ));
    }
    src
}

fn bench_parse_extract(c: &mut Criterion) {
    let source = synthetic_module(20, 10);
    c.bench_function("parse_and_extract_module", |b| {
        b.iter(|| {
            let tree = parse_source(black_box(&source)).unwrap();
            let chunks = extract_chunks(&tree, &source, "bench.py");
            black_box(chunks.len())
        })
    });
}

fn bench_rank(c: &mut Criterion) {
    let source = synthetic_module(40, 10);
    let tree = parse_source(&source).unwrap();
    let snapshot = extract_chunks(&tree, &source, "bench.py");
    let query = ContextQuery::new("handle request timeout", 16_000);
    c.bench_function("rank_snapshot", |b| {
        b.iter(|| {
            let ranked = rank_chunks(black_box(&query), snapshot.clone());
            black_box(ranked.len())
        })
    });
}

fn bench_assemble(c: &mut Criterion) {
    let source = synthetic_module(40, 10);
    let tree = parse_source(&source).unwrap();
    let snapshot = extract_chunks(&tree, &source, "bench.py");
    let query = ContextQuery::new("handle request timeout", 16_000);
    c.bench_function("build_context", |b| {
        b.iter(|| {
            let ctx = build_context(black_box(&query), snapshot.clone());
            black_box(ctx.rendered_chars)
        })
    });
}

criterion_group!(benches, bench_parse_extract, bench_rank, bench_assemble);
criterion_main!(benches);
