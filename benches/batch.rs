//! Benchmarks for case batches and evidence parsing.

use std::path::PathBuf;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bnserve::backend::enumerate::EnumerationBackend;
use bnserve::batch::run_batch;
use bnserve::engine::EngineHandle;
use bnserve::evidence::{Case, Evidence};
use bnserve::registry::NetworkRegistry;

fn registry() -> NetworkRegistry {
    let engine = EngineHandle::initialize(Arc::new(EnumerationBackend::new()), None).unwrap();
    let registry = NetworkRegistry::new(engine);
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("networks");
    registry.load_dir(&dir, &["toml".to_string()]).unwrap();
    registry
}

fn case(pairs: &[(&str, &str)]) -> Case {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_evidence", |bench| {
        bench.iter(|| {
            black_box(Evidence::parse(black_box("12.5")));
            black_box(Evidence::parse(black_box("#2")));
            black_box(Evidence::parse(black_box("Medium")));
        })
    });
}

fn bench_sprinkler_batch(c: &mut Criterion) {
    let registry = registry();
    let network = registry.resolve("Sprinkler").unwrap();
    let cases: Vec<Case> = (0..100)
        .map(|i| {
            if i % 2 == 0 {
                case(&[("Cloudy", "yes"), ("Sprinkler", "off")])
            } else {
                case(&[("Rain", "no")])
            }
        })
        .collect();

    c.bench_function("sprinkler_batch_100", |bench| {
        bench.iter(|| black_box(run_batch(&network, "WetGrass", &cases).unwrap()))
    });
}

fn bench_credit_batch(c: &mut Criterion) {
    let registry = registry();
    let network = registry.resolve("Credit").unwrap();
    let cases: Vec<Case> = (0..100)
        .map(|i| {
            let income = format!("{}", 10 + i * 3);
            case(&[("History", "good"), ("Income", income.as_str())])
        })
        .collect();

    c.bench_function("credit_batch_100", |bench| {
        bench.iter(|| black_box(run_batch(&network, "Limit", &cases).unwrap()))
    });
}

criterion_group!(benches, bench_parse, bench_sprinkler_batch, bench_credit_batch);
criterion_main!(benches);
