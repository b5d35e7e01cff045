//! Track aggregator
//!
//! Resolves a (sample, kind, range, viewport width) request into a payload:
//! the ladder picks a level, the range is split into level tiles, every tile
//! is resolved through the range cache in parallel, and the concatenation is
//! trimmed to the exact range.

use crate::aggregate::{aggregate_features, aggregate_points, finalize_features, trim_overview, trim_points};
use crate::cache::{CacheKey, TrackCache};
use crate::config::EngineConfig;
use crate::coords::{align_down, align_up, ChromosomeSizes, GenomicRange};
use crate::error::{TrackError, TrackResult};
use crate::ladder::ResolutionLadder;
use crate::store::{Fetched, RawRecords, TrackStore};
use crate::types::{
    GenomicPos, OverviewPayload, ResolutionLevel, ScatterPoint, ScatterRecord, TileIndex,
    TrackKind, TrackPayload,
};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Payload of one request together with the resolution it was built at
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTrack {
    pub level: ResolutionLevel,
    pub bucket_width: GenomicPos,
    pub tiles: usize,
    pub payload: TrackPayload,
}

pub struct TrackAggregator {
    cache: Arc<TrackCache>,
    store: Arc<dyn TrackStore>,
    sizes: Arc<dyn ChromosomeSizes>,
    ladder: ResolutionLadder,
    config: EngineConfig,
    corrupt_records: AtomicU64,
}

impl TrackAggregator {
    pub fn new(
        cache: Arc<TrackCache>,
        store: Arc<dyn TrackStore>,
        sizes: Arc<dyn ChromosomeSizes>,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache,
            store,
            sizes,
            ladder: ResolutionLadder::new(config.ladder.clone()),
            config,
            corrupt_records: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<TrackCache> {
        &self.cache
    }

    pub fn ladder(&self) -> &ResolutionLadder {
        &self.ladder
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sizes(&self) -> &Arc<dyn ChromosomeSizes> {
        &self.sizes
    }

    /// Corrupt rows skipped while computing tiles
    pub fn corrupt_records(&self) -> u64 {
        self.corrupt_records.load(Ordering::Relaxed)
    }

    /// Aggregated, cached payload of `kind` for `range` at `viewport_width` points.
    pub fn get_track(
        &self,
        sample_id: &str,
        kind: TrackKind,
        range: &GenomicRange,
        viewport_width: u64,
    ) -> TrackResult<AggregatedTrack> {
        range.validate(self.sizes.as_ref())?;

        if kind == TrackKind::Overview {
            return self.get_overview(sample_id, range);
        }

        let level = self.ladder.select_level(range.len(), viewport_width)?;
        let width = self.ladder.bucket_width(level);
        let tiles = self.tiles_for(kind, range, level);
        log::debug!(
            "{} {} {}: level {} ({} bp buckets), {} tiles",
            sample_id,
            kind,
            range,
            level,
            width,
            tiles.len()
        );

        let parts = tiles
            .par_iter()
            .map(|&tile| {
                let key = CacheKey::new(sample_id, kind, &range.chromosome, level, tile);
                self.cache
                    .get_or_compute(key, || self.compute_tile(sample_id, kind, &range.chromosome, level, tile))
            })
            .collect::<TrackResult<Vec<Arc<TrackPayload>>>>()?;

        let payload = if kind.is_dense() {
            let points = parts
                .iter()
                .filter_map(|part| part.points())
                .flat_map(|points| points.iter().copied());
            TrackPayload::Points(trim_points(points, range, width))
        } else {
            let items = parts
                .iter()
                .filter_map(|part| part.features())
                .flat_map(|items| items.iter().cloned());
            TrackPayload::Features(finalize_features(items, range, width))
        };

        Ok(AggregatedTrack {
            level,
            bucket_width: width,
            tiles: tiles.len(),
            payload,
        })
    }

    /// Same payload as [`get_track`](Self::get_track), computed in one store
    /// read without tiles or the cache.
    pub fn get_track_direct(
        &self,
        sample_id: &str,
        kind: TrackKind,
        range: &GenomicRange,
        viewport_width: u64,
    ) -> TrackResult<AggregatedTrack> {
        range.validate(self.sizes.as_ref())?;

        if kind == TrackKind::Overview {
            let overview = self.compute_overview(sample_id, &range.chromosome)?;
            return Ok(AggregatedTrack {
                level: 0,
                bucket_width: self.ladder.bucket_width(0),
                tiles: 0,
                payload: TrackPayload::Overview(trim_overview(&overview, range)),
            });
        }

        let level = self.ladder.select_level(range.len(), viewport_width)?;
        let width = self.ladder.bucket_width(level);
        if range.is_empty() {
            return Ok(AggregatedTrack {
                level,
                bucket_width: width,
                tiles: 0,
                payload: TrackPayload::empty_for(kind),
            });
        }

        let payload = if kind.is_dense() {
            let start = align_down(range.start, width);
            let end = align_up(range.end, width);
            let records = self.fetch_scatter(sample_id, kind, &range.chromosome, start, end)?;
            let points = aggregate_points(&records, width, self.dense_config(kind)?);
            TrackPayload::Points(trim_points(points, range, width))
        } else {
            let features = match self.fetch(sample_id, kind, &range.chromosome, range.start, range.end)? {
                RawRecords::Features(features) => features,
                _ => return Err(mismatched(kind)),
            };
            let items = aggregate_features(features, width, None);
            TrackPayload::Features(finalize_features(items, range, width))
        };

        Ok(AggregatedTrack {
            level,
            bucket_width: width,
            tiles: 0,
            payload,
        })
    }

    /// Cache keys a request would resolve, in tile order.
    pub fn tile_keys(
        &self,
        sample_id: &str,
        kind: TrackKind,
        range: &GenomicRange,
        viewport_width: u64,
    ) -> TrackResult<Vec<CacheKey>> {
        range.validate(self.sizes.as_ref())?;
        if kind == TrackKind::Overview {
            return Ok(vec![CacheKey::new(sample_id, kind, &range.chromosome, 0, 0)]);
        }
        let level = self.ladder.select_level(range.len(), viewport_width)?;
        Ok(self
            .tiles_for(kind, range, level)
            .into_iter()
            .map(|tile| CacheKey::new(sample_id, kind, &range.chromosome, level, tile))
            .collect())
    }

    fn tiles_for(&self, kind: TrackKind, range: &GenomicRange, level: ResolutionLevel) -> Vec<TileIndex> {
        if range.is_empty() {
            return Vec::new();
        }
        // Short features straddling the range start live in the bucket before it.
        let start = if kind.is_feature() {
            range.start.saturating_sub(self.ladder.bucket_width(level) - 1)
        } else {
            range.start
        };
        self.ladder.tiles(start, range.end, level)
    }

    fn compute_tile(
        &self,
        sample_id: &str,
        kind: TrackKind,
        chromosome: &str,
        level: ResolutionLevel,
        tile: TileIndex,
    ) -> TrackResult<TrackPayload> {
        let (start, end) = self.ladder.tile_bounds(tile, level);
        let width = self.ladder.bucket_width(level);
        log::debug!(
            "Computing {} tile {} for {} on {} at level {}",
            kind,
            tile,
            sample_id,
            chromosome,
            level
        );

        if kind.is_dense() {
            let records = self.fetch_scatter(sample_id, kind, chromosome, start, end)?;
            let points = aggregate_points(&records, width, self.dense_config(kind)?);
            return Ok(TrackPayload::Points(points));
        }

        match self.fetch(sample_id, kind, chromosome, start, end)? {
            RawRecords::Features(features) => Ok(TrackPayload::Features(aggregate_features(
                features,
                width,
                Some((start, end)),
            ))),
            _ => Err(mismatched(kind)),
        }
    }

    fn get_overview(&self, sample_id: &str, range: &GenomicRange) -> TrackResult<AggregatedTrack> {
        let key = CacheKey::new(sample_id, TrackKind::Overview, &range.chromosome, 0, 0);
        let overview = self.cache.get_or_compute(key, || {
            self.compute_overview(sample_id, &range.chromosome)
                .map(TrackPayload::Overview)
        })?;
        let payload = match overview.as_ref() {
            TrackPayload::Overview(overview) => TrackPayload::Overview(trim_overview(overview, range)),
            _ => return Err(mismatched(TrackKind::Overview)),
        };
        Ok(AggregatedTrack {
            level: 0,
            bucket_width: self.ladder.bucket_width(0),
            tiles: 1,
            payload,
        })
    }

    fn compute_overview(&self, sample_id: &str, chromosome: &str) -> TrackResult<OverviewPayload> {
        let length = self.sizes.length(chromosome).unwrap_or(GenomicPos::MAX);
        let (coverage, baf) = match self.fetch(sample_id, TrackKind::Overview, chromosome, 0, length)? {
            RawRecords::Overview { coverage, baf } => (coverage, baf),
            _ => return Err(mismatched(TrackKind::Overview)),
        };
        let flag = |records: Vec<ScatterRecord>, kind: TrackKind| -> TrackResult<Vec<ScatterPoint>> {
            let track = self.dense_config(kind)?;
            Ok(records
                .into_iter()
                .map(|r| ScatterPoint {
                    position: r.position,
                    value: r.value,
                    out_of_range: track.is_out_of_range(r.value),
                })
                .collect())
        };
        Ok(OverviewPayload {
            coverage: flag(coverage, TrackKind::Coverage)?,
            baf: flag(baf, TrackKind::Baf)?,
        })
    }

    fn dense_config(&self, kind: TrackKind) -> TrackResult<&crate::config::DenseTrackConfig> {
        self.config
            .tracks
            .dense(kind)
            .ok_or_else(|| TrackError::config(format!("{} is not a dense track kind", kind)))
    }

    fn fetch_scatter(
        &self,
        sample_id: &str,
        kind: TrackKind,
        chromosome: &str,
        start: GenomicPos,
        end: GenomicPos,
    ) -> TrackResult<Vec<ScatterRecord>> {
        match self.fetch(sample_id, kind, chromosome, start, end)? {
            RawRecords::Scatter(records) => Ok(records),
            _ => Err(mismatched(kind)),
        }
    }

    fn fetch(
        &self,
        sample_id: &str,
        kind: TrackKind,
        chromosome: &str,
        start: GenomicPos,
        end: GenomicPos,
    ) -> TrackResult<RawRecords> {
        let Fetched { records, corrupt } = self.store.fetch(kind, sample_id, chromosome, start, end)?;
        if corrupt > 0 {
            self.corrupt_records.fetch_add(corrupt as u64, Ordering::Relaxed);
            log::warn!(
                "Skipped {} corrupt {} rows for {} on {}:{}-{}",
                corrupt,
                kind,
                sample_id,
                chromosome,
                start,
                end
            );
        }
        Ok(records)
    }
}

fn mismatched(kind: TrackKind) -> TrackError {
    TrackError::storage(format!("Store returned records of the wrong shape for {}", kind))
}
