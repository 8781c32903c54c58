//! Performance benchmarks for cinesync-store

use cinesync_store::{parse, Args, Store};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

const LIST_QUERY: &str = "SELECT * FROM movies WHERE watched = true AND NOT deleted ORDER BY title ASC";

fn doc_args(doc: Value) -> Args {
    let mut args = Args::new();
    args.insert("doc".into(), doc);
    args
}

fn populated_store(count: usize) -> Store {
    let store = Store::new("node1");
    for i in 0..count {
        store
            .execute(
                "INSERT INTO movies DOCUMENTS (:doc)",
                &doc_args(json!({
                    "_id": format!("movie_{}", i),
                    "title": format!("Movie {}", count - i),
                    "watched": i % 2 == 0,
                    "deleted": i % 10 == 0,
                })),
            )
            .unwrap();
    }
    store
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_select", |b| b.iter(|| parse(black_box(LIST_QUERY))));
}

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");

    group.bench_function("insert", |b| {
        let store = Store::new("node1");
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            store.execute(
                "INSERT INTO movies DOCUMENTS (:doc)",
                &doc_args(json!({"_id": format!("movie_{}", id), "title": "Heat"})),
            )
        })
    });

    group.bench_function("update_by_id", |b| {
        let store = populated_store(1000);
        let mut args = Args::new();
        args.insert("id".into(), json!("movie_500"));
        args.insert("watched".into(), json!(true));
        b.iter(|| {
            store.execute(
                black_box("UPDATE movies SET watched = :watched WHERE _id = :id"),
                &args,
            )
        })
    });

    group.finish();
}

fn bench_select_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_scaling");

    for size in [100, 1000, 10000].iter() {
        let store = populated_store(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| store.execute(black_box(LIST_QUERY), &Args::new()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse, bench_store_operations, bench_select_scaling);
criterion_main!(benches);
