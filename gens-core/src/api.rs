//! Request/response surface of the track engine
//!
//! `TrackService` is the single entry point used by the CLI and by any HTTP
//! layer put in front of it. Loading goes through the service as well, so
//! every write to the store is followed by invalidation of the cached tiles
//! it affects.

use crate::aggregator::TrackAggregator;
use crate::cache::{CacheKey, CacheStats, Evictor, TrackCache};
use crate::config::EngineConfig;
use crate::coords::{ChromosomeSizes, GenomicRange};
use crate::error::TrackError;
use crate::highlight::{highlight, HighlightSet};
use crate::overview::OverviewDocument;
use crate::store::{IngestSummary, MemoryTrackStore, StoreStats};
use crate::types::{GenomicPos, ResolutionLevel, TrackKind, TrackPayload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRequest {
    pub sample_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    pub track_kind: TrackKind,
    pub chromosome: String,
    pub start: GenomicPos,
    pub end: GenomicPos,
    pub viewport_width: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackResponse {
    pub sample_id: String,
    pub track_kind: TrackKind,
    pub chromosome: String,
    pub start: GenomicPos,
    pub end: GenomicPos,
    pub level: ResolutionLevel,
    pub bucket_width: GenomicPos,
    pub payload: TrackPayload,
    /// Hex xxh64 of the payload
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidateRequest {
    pub sample_id: String,
    pub track_kind: TrackKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chromosome: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightRequest {
    pub sample_id: String,
    pub annotation_kind: TrackKind,
    pub chromosome: String,
    pub start: GenomicPos,
    pub end: GenomicPos,
    pub viewport_width: u64,
}

/// Error returned across the API boundary, with an HTTP-style status code.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

impl From<TrackError> for ApiError {
    fn from(err: TrackError) -> Self {
        let status = match &err {
            TrackError::OutOfBounds { .. } => 400,
            TrackError::DataUnavailable { .. } => 404,
            TrackError::ResolutionError { .. } => 422,
            _ => 500,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Observability snapshot of the whole engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub store_fetches: u64,
    pub store_corrupt_rows: u64,
    pub corrupt_records: u64,
}

pub struct TrackService {
    aggregator: TrackAggregator,
    store: Arc<MemoryTrackStore>,
    _evictor: Option<Evictor<CacheKey, TrackPayload>>,
}

impl TrackService {
    /// Wire a service around an explicitly constructed cache and store.
    ///
    /// Starts the background evictor when the cache config asks for one.
    pub fn new(
        cache: Arc<TrackCache>,
        store: Arc<MemoryTrackStore>,
        sizes: Arc<dyn ChromosomeSizes>,
        config: EngineConfig,
    ) -> Result<Self, TrackError> {
        config.validate()?;
        let evictor = if config.cache.background_eviction {
            Some(cache.spawn_evictor()?)
        } else {
            None
        };
        let aggregator = TrackAggregator::new(cache, store.clone(), sizes, config);
        Ok(Self {
            aggregator,
            store,
            _evictor: evictor,
        })
    }

    /// Service with a fresh cache sized from `config`
    pub fn with_config(
        store: Arc<MemoryTrackStore>,
        sizes: Arc<dyn ChromosomeSizes>,
        config: EngineConfig,
    ) -> Result<Self, TrackError> {
        let cache = Arc::new(TrackCache::new(config.cache.clone()));
        Self::new(cache, store, sizes, config)
    }

    pub fn aggregator(&self) -> &TrackAggregator {
        &self.aggregator
    }

    pub fn cache(&self) -> &Arc<TrackCache> {
        self.aggregator.cache()
    }

    pub fn store(&self) -> &Arc<MemoryTrackStore> {
        &self.store
    }

    pub fn track(&self, request: &TrackRequest) -> ApiResult<TrackResponse> {
        log::debug!(
            "Track request {} {} {}:{}-{} width {}{}",
            request.sample_id,
            request.track_kind,
            request.chromosome,
            request.start,
            request.end,
            request.viewport_width,
            request
                .case_id
                .as_ref()
                .map(|c| format!(" (case {})", c))
                .unwrap_or_default()
        );
        let range = GenomicRange::new(&request.chromosome, request.start, request.end);
        let track = self
            .aggregator
            .get_track(&request.sample_id, request.track_kind, &range, request.viewport_width)?;
        let fingerprint = track.payload.fingerprint()?;

        Ok(TrackResponse {
            sample_id: request.sample_id.clone(),
            track_kind: request.track_kind,
            chromosome: range.chromosome,
            start: range.start,
            end: range.end,
            level: track.level,
            bucket_width: track.bucket_width,
            payload: track.payload,
            fingerprint: format!("{:016x}", fingerprint),
        })
    }

    pub fn invalidate(&self, request: &InvalidateRequest) -> InvalidateResponse {
        let removed = self.cache().invalidate(
            &request.sample_id,
            request.track_kind,
            request.chromosome.as_deref(),
        );
        InvalidateResponse { removed }
    }

    /// Annotation ranges intersecting the requested region.
    pub fn highlight(&self, request: &HighlightRequest) -> ApiResult<HighlightSet> {
        let range = GenomicRange::new(&request.chromosome, request.start, request.end);
        if !request.annotation_kind.is_feature() {
            range.validate(self.aggregator.sizes().as_ref())?;
            return Ok(HighlightSet {
                chromosome: range.chromosome,
                ranges: Vec::new(),
            });
        }
        let track = self.aggregator.get_track(
            &request.sample_id,
            request.annotation_kind,
            &range,
            request.viewport_width,
        )?;
        Ok(highlight(&range, &track.payload))
    }

    /// Replace the rows of one chromosome and drop its cached tiles.
    pub fn ingest_rows<I, S>(
        &self,
        sample_id: &str,
        kind: TrackKind,
        chromosome: &str,
        rows: I,
    ) -> ApiResult<IngestSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let summary = self.store.ingest_rows(sample_id, kind, chromosome, rows)?;
        self.cache().invalidate(sample_id, kind, Some(chromosome));
        Ok(summary)
    }

    pub fn ingest_overview(&self, sample_id: &str, document: OverviewDocument) -> usize {
        self.store.ingest_overview(sample_id, document);
        self.cache().invalidate(sample_id, TrackKind::Overview, None)
    }

    pub fn remove_track(&self, sample_id: &str, kind: TrackKind) -> bool {
        let removed = self.store.remove_track(sample_id, kind);
        self.cache().invalidate(sample_id, kind, None);
        removed
    }

    pub fn stats(&self) -> ServiceStats {
        let StoreStats { fetches, corrupt_rows } = self.store.stats();
        ServiceStats {
            cache: self.cache().stats(),
            store_fetches: fetches,
            store_corrupt_rows: corrupt_rows,
            corrupt_records: self.aggregator.corrupt_records(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::GenomeBuild;

    fn service() -> TrackService {
        let store = Arc::new(MemoryTrackStore::new());
        TrackService::with_config(store, Arc::new(GenomeBuild::Hg38), EngineConfig::default()).unwrap()
    }

    fn request(kind: TrackKind, start: GenomicPos, end: GenomicPos, width: u64) -> TrackRequest {
        TrackRequest {
            sample_id: "S1".to_string(),
            case_id: Some("case-7".to_string()),
            track_kind: kind,
            chromosome: "chr1".to_string(),
            start,
            end,
            viewport_width: width,
        }
    }

    #[test]
    fn test_status_codes() {
        let service = service();
        service
            .ingest_rows("S1", TrackKind::Coverage, "1", ["100\t200\t0.5"])
            .unwrap();

        let err = service.track(&request(TrackKind::Coverage, 0, u64::MAX, 100)).unwrap_err();
        assert_eq!(err.status, 400);
        let err = service.track(&request(TrackKind::Baf, 0, 1000, 100)).unwrap_err();
        assert_eq!(err.status, 404);
        let err = service.track(&request(TrackKind::Coverage, 0, 1000, 0)).unwrap_err();
        assert_eq!(err.status, 422);
        assert!(err.is_client_error());

        let internal: ApiError = TrackError::storage("disk").into();
        assert_eq!(internal.status, 500);
    }

    #[test]
    fn test_track_response() {
        let service = service();
        service
            .ingest_rows("S1", TrackKind::Coverage, "1", ["100\t200\t0.5", "200\t300\t9.0"])
            .unwrap();
        let response = service.track(&request(TrackKind::Coverage, 0, 1000, 2000)).unwrap();
        assert_eq!(response.chromosome, "1");
        assert_eq!(response.level, 0);
        assert_eq!(response.payload.len(), 2);
        assert_eq!(response.fingerprint.len(), 16);

        let again = service.track(&request(TrackKind::Coverage, 0, 1000, 2000)).unwrap();
        assert_eq!(response.fingerprint, again.fingerprint);
    }

    #[test]
    fn test_ingest_invalidates() {
        let service = service();
        service
            .ingest_rows("S1", TrackKind::Coverage, "1", ["100\t200\t0.5"])
            .unwrap();
        let before = service.track(&request(TrackKind::Coverage, 0, 1000, 2000)).unwrap();
        assert!(service.cache().len() > 0);

        service
            .ingest_rows("S1", TrackKind::Coverage, "1", ["100\t200\t-0.5"])
            .unwrap();
        assert_eq!(service.cache().len(), 0);
        let after = service.track(&request(TrackKind::Coverage, 0, 1000, 2000)).unwrap();
        assert_ne!(before.fingerprint, after.fingerprint);
    }

    #[test]
    fn test_invalidate_request() {
        let service = service();
        service
            .ingest_rows("S1", TrackKind::Coverage, "1", ["100\t200\t0.5"])
            .unwrap();
        service.track(&request(TrackKind::Coverage, 0, 256, 2000)).unwrap();

        let invalidate = InvalidateRequest {
            sample_id: "S1".to_string(),
            track_kind: TrackKind::Coverage,
            chromosome: None,
        };
        assert_eq!(service.invalidate(&invalidate).removed, 1);
        assert_eq!(service.invalidate(&invalidate).removed, 0);
    }

    #[test]
    fn test_highlight_request() {
        let service = service();
        service
            .ingest_rows(
                "S1",
                TrackKind::SampleAnnotation,
                "1",
                ["1000\t5000\tdel\tannotation\t#ff0000", "9000\t9100\tdup\tannotation"],
            )
            .unwrap();
        let set = service
            .highlight(&HighlightRequest {
                sample_id: "S1".to_string(),
                annotation_kind: TrackKind::SampleAnnotation,
                chromosome: "1".to_string(),
                start: 4000,
                end: 10_000,
                viewport_width: 1000,
            })
            .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!((set.ranges[0].start, set.ranges[0].end), (4000, 5000));
        assert_eq!(set.ranges[0].color.as_deref(), Some("#ff0000"));
        assert_eq!((set.ranges[1].start, set.ranges[1].end), (9000, 9100));
    }

    #[test]
    fn test_request_json() {
        let json = r#"{"sample_id":"S1","track_kind":"baf","chromosome":"2","start":0,"end":10,"viewport_width":5}"#;
        let request: TrackRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.track_kind, TrackKind::Baf);
        assert!(request.case_id.is_none());
    }

    #[test]
    fn test_stats() {
        let service = service();
        service
            .ingest_rows("S1", TrackKind::Coverage, "1", ["100\t200\t0.5", "200\t300\tNaN?"])
            .unwrap();
        service.track(&request(TrackKind::Coverage, 0, 256, 2000)).unwrap();
        let stats = service.stats();
        assert_eq!(stats.cache.misses, 1);
        assert_eq!(stats.store_corrupt_rows, 1);
        assert_eq!(stats.corrupt_records, 1);
    }
}
