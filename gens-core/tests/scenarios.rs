use gens_core::store::{Fetched, MemoryTrackStore, TrackStore};
use gens_core::{
    ChromosomeSizes, EngineConfig, GenomeBuild, GenomicPos, GenomicRange, OverviewDocument,
    TrackAggregator, TrackCache, TrackKind, TrackPayload, TrackRequest, TrackResult,
    TrackService,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Store wrapper counting reads and slowing them down so requests overlap.
struct CountingStore {
    inner: MemoryTrackStore,
    reads: AtomicUsize,
    delay: Duration,
}

impl TrackStore for CountingStore {
    fn fetch(
        &self,
        kind: TrackKind,
        sample_id: &str,
        chromosome: &str,
        start: GenomicPos,
        end: GenomicPos,
    ) -> TrackResult<Fetched> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.inner.fetch(kind, sample_id, chromosome, start, end)
    }
}

fn coverage_rows(from: GenomicPos, to: GenomicPos, step: GenomicPos) -> Vec<String> {
    (from..to)
        .step_by(step as usize)
        .map(|start| {
            let value = ((start / step) % 17) as f64 / 4.0 - 2.0;
            format!("{}\t{}\t{}", start, start + step, value)
        })
        .collect()
}

fn service() -> TrackService {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(MemoryTrackStore::new());
    TrackService::with_config(store, Arc::new(GenomeBuild::Hg38), EngineConfig::default()).unwrap()
}

fn request(kind: TrackKind, start: GenomicPos, end: GenomicPos, width: u64) -> TrackRequest {
    TrackRequest {
        sample_id: "S1".to_string(),
        case_id: None,
        track_kind: kind,
        chromosome: "chr1".to_string(),
        start,
        end,
        viewport_width: width,
    }
}

#[test]
fn coverage_megabase_at_thousand_pixels() {
    let service = service();
    service
        .ingest_rows("S1", TrackKind::Coverage, "1", coverage_rows(1_000_000, 2_000_000, 100))
        .unwrap();

    let response = service
        .track(&request(TrackKind::Coverage, 1_000_000, 2_000_000, 1000))
        .unwrap();
    assert_eq!(response.level, 5);
    assert_eq!(response.bucket_width, 1024);

    let points = response.payload.points().unwrap();
    assert!(points.len() <= 1000);
    assert!(points.len() >= 970);
    assert!(points.iter().all(|p| p.position >= 1_000_000 && p.position < 2_000_000));

    let keys = service
        .aggregator()
        .tile_keys("S1", TrackKind::Coverage, &GenomicRange::new("1", 1_000_000, 2_000_000), 1000)
        .unwrap();
    assert!(keys.iter().all(|key| service.cache().contains(key)));
    assert_eq!(service.stats().cache.misses, keys.len() as u64);
}

#[test]
fn concurrent_requests_share_one_read() {
    let store = CountingStore {
        inner: MemoryTrackStore::new(),
        reads: AtomicUsize::new(0),
        delay: Duration::from_millis(100),
    };
    let baf: Vec<String> = (0..200u64)
        .map(|i| format!("{}\t{}\t{}", i * 10, i * 10 + 10, (i % 10) as f64 / 10.0))
        .collect();
    store.inner.ingest_rows("S1", TrackKind::Baf, "2", &baf).unwrap();
    let store = Arc::new(store);

    let config = EngineConfig::default();
    let cache = Arc::new(TrackCache::new(config.cache.clone()));
    let sizes: Arc<dyn ChromosomeSizes> = Arc::new(GenomeBuild::Hg38);
    let aggregator = Arc::new(TrackAggregator::new(cache, store.clone(), sizes, config));

    let range = GenomicRange::new("2", 0, 1000);
    let keys = aggregator.tile_keys("S1", TrackKind::Baf, &range, 1000).unwrap();
    assert_eq!(keys.len(), 1);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let aggregator = Arc::clone(&aggregator);
            let barrier = Arc::clone(&barrier);
            let range = range.clone();
            thread::spawn(move || {
                barrier.wait();
                aggregator.get_track("S1", TrackKind::Baf, &range, 1000).unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    assert_eq!(results[0], results[1]);
    let stats = aggregator.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits + stats.coalesced, 1);
}

#[test]
fn invalidation_forces_recompute() {
    let service = service();
    service
        .ingest_rows("S1", TrackKind::Coverage, "1", coverage_rows(0, 100_000, 100))
        .unwrap();
    let req = request(TrackKind::Coverage, 0, 100_000, 500);

    let first = service.track(&req).unwrap();
    let misses = service.stats().cache.misses;
    service.track(&req).unwrap();
    assert_eq!(service.stats().cache.misses, misses);

    let removed = service.invalidate(&gens_core::InvalidateRequest {
        sample_id: "S1".to_string(),
        track_kind: TrackKind::Coverage,
        chromosome: Some("chr1".to_string()),
    });
    assert!(removed.removed > 0);

    let again = service.track(&req).unwrap();
    assert_eq!(service.stats().cache.misses, misses * 2);
    assert_eq!(first.fingerprint, again.fingerprint);
}

#[test]
fn malformed_row_is_skipped_and_counted() {
    let service = service();
    let rows = vec![
        "100\t200\t0.5".to_string(),
        "200\t300\tnot-a-number".to_string(),
        "300\t400\t-0.25".to_string(),
    ];
    service.ingest_rows("S1", TrackKind::Coverage, "1", rows).unwrap();

    let response = service.track(&request(TrackKind::Coverage, 0, 1000, 2000)).unwrap();
    let points = response.payload.points().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].position, 150);
    assert_eq!(points[1].position, 350);
    assert_eq!(service.stats().corrupt_records, 1);
}

#[test]
fn out_of_range_flag_survives_coarse_levels() {
    let service = service();
    let mut rows = coverage_rows(0, 10_000, 10);
    // One extreme value inside otherwise normal data
    rows[500] = "5000\t5010\t12.0".to_string();
    service.ingest_rows("S1", TrackKind::Coverage, "1", rows).unwrap();

    for width in [5000, 500, 20] {
        let response = service.track(&request(TrackKind::Coverage, 0, 10_000, width)).unwrap();
        let points = response.payload.points().unwrap();
        let bucket = response.bucket_width;
        let flagged: Vec<_> = points.iter().filter(|p| p.out_of_range).collect();
        assert!(
            flagged
                .iter()
                .any(|p| p.position / bucket == 5005 / bucket),
            "width {}",
            width
        );
    }
}

#[test]
fn identical_requests_have_identical_fingerprints() {
    let a = service();
    let b = service();
    for service in [&a, &b] {
        service
            .ingest_rows("S1", TrackKind::Coverage, "1", coverage_rows(0, 500_000, 250))
            .unwrap();
    }
    let req = request(TrackKind::Coverage, 12_345, 456_789, 640);
    assert_eq!(a.track(&req).unwrap().fingerprint, b.track(&req).unwrap().fingerprint);
    assert_eq!(a.track(&req).unwrap().fingerprint, a.track(&req).unwrap().fingerprint);
}

#[test]
fn overview_from_gzip_file() {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut file = NamedTempFile::new().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(br#"{"1": {"cov": [[1000, 0.1], [2000, -4.0]], "baf": [[1500, 0.5]]}}"#)
        .unwrap();
    file.write_all(&encoder.finish().unwrap()).unwrap();
    file.as_file().sync_all().unwrap();

    let service = service();
    let document = OverviewDocument::from_path(file.path()).unwrap();
    service.ingest_overview("S1", document);

    let response = service.track(&request(TrackKind::Overview, 0, 1800, 10)).unwrap();
    match response.payload {
        TrackPayload::Overview(overview) => {
            assert_eq!(overview.coverage.len(), 1);
            assert_eq!(overview.baf.len(), 1);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    let full = service.track(&request(TrackKind::Overview, 0, 10_000, 10)).unwrap();
    match full.payload {
        TrackPayload::Overview(overview) => assert!(overview.coverage[1].out_of_range),
        other => panic!("unexpected payload {:?}", other),
    }
    assert_eq!(service.stats().cache.misses, 1);
}
