use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gens_core::{
    EngineConfig, GenomeBuild, MemoryTrackStore, TrackKind, TrackRequest, TrackService,
};
use std::sync::Arc;

fn generate_coverage_rows(length: u64, step: u64) -> Vec<String> {
    (0..length)
        .step_by(step as usize)
        .map(|start| {
            let value = ((start / step) % 29) as f64 / 5.0 - 3.0;
            format!("{}\t{}\t{}", start, start + step, value)
        })
        .collect()
}

fn generate_gene_rows(count: u64, span: u64) -> Vec<String> {
    (0..count)
        .map(|i| {
            let start = (i * 7_919_993) % span;
            let len = 500 + (i * 31) % 50_000;
            format!("{}\t{}\tGENE{}\tgene", start, start + len, i)
        })
        .collect()
}

fn service() -> TrackService {
    let store = Arc::new(MemoryTrackStore::new());
    let service =
        TrackService::with_config(store, Arc::new(GenomeBuild::Hg38), EngineConfig::default())
            .expect("service");
    service
        .ingest_rows("S1", TrackKind::Coverage, "1", generate_coverage_rows(50_000_000, 100))
        .expect("coverage rows");
    service
        .ingest_rows("S1", TrackKind::Gene, "1", generate_gene_rows(20_000, 50_000_000))
        .expect("gene rows");
    service
}

fn request(kind: TrackKind, start: u64, end: u64) -> TrackRequest {
    TrackRequest {
        sample_id: "S1".to_string(),
        case_id: None,
        track_kind: kind,
        chromosome: "1".to_string(),
        start,
        end,
        viewport_width: 1920,
    }
}

fn bench_cold_queries(c: &mut Criterion) {
    let service = service();
    let mut group = c.benchmark_group("cold_track");

    for span in [100_000u64, 1_000_000, 10_000_000] {
        group.bench_with_input(BenchmarkId::new("coverage", span), &span, |b, &span| {
            let req = request(TrackKind::Coverage, 5_000_000, 5_000_000 + span);
            b.iter(|| {
                service.cache().clear();
                black_box(service.track(black_box(&req)).expect("track"))
            })
        });
    }
    group.finish();
}

fn bench_warm_queries(c: &mut Criterion) {
    let service = service();
    let mut group = c.benchmark_group("warm_track");

    for kind in [TrackKind::Coverage, TrackKind::Gene] {
        let req = request(kind, 10_000_000, 20_000_000);
        service.track(&req).expect("warm-up");
        group.bench_function(kind.as_str(), |b| {
            b.iter(|| black_box(service.track(black_box(&req)).expect("track")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cold_queries, bench_warm_queries);
criterion_main!(benches);
