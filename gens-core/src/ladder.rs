//! Resolution ladder
//!
//! Level `L` groups raw positions into buckets of `base_bucket * growth^L`
//! base pairs, and one cache tile holds `points_per_tile` buckets. Both widths
//! depend on the level alone, so a level picked for a request always maps to
//! the same cache keys.

use crate::config::LadderConfig;
use crate::coords::{tile_bounds, tile_index, tiles_covering};
use crate::error::{TrackError, TrackResult};
use crate::types::{GenomicPos, ResolutionLevel, TileIndex};

#[derive(Debug, Clone)]
pub struct ResolutionLadder {
    config: LadderConfig,
    bucket_widths: Vec<GenomicPos>,
}

impl ResolutionLadder {
    /// Build the ladder; `config` is expected to have passed `EngineConfig::validate`.
    pub fn new(config: LadderConfig) -> Self {
        let mut bucket_widths = Vec::with_capacity(config.levels as usize);
        let mut width = config.base_bucket.max(1);
        for _ in 0..config.levels.max(1) {
            bucket_widths.push(width);
            width = width.saturating_mul(config.growth_factor.max(2));
        }
        Self { config, bucket_widths }
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    pub fn levels(&self) -> ResolutionLevel {
        self.bucket_widths.len() as ResolutionLevel
    }

    pub fn max_level(&self) -> ResolutionLevel {
        self.levels() - 1
    }

    /// Base pairs represented by one aggregated point at `level`
    pub fn bucket_width(&self, level: ResolutionLevel) -> GenomicPos {
        let idx = (level as usize).min(self.bucket_widths.len() - 1);
        self.bucket_widths[idx]
    }

    /// Base pairs covered by one cache tile at `level`
    pub fn tile_size(&self, level: ResolutionLevel) -> GenomicPos {
        self.bucket_width(level)
            .saturating_mul(self.config.points_per_tile.max(1))
    }

    pub fn points_per_tile(&self) -> u64 {
        self.config.points_per_tile.max(1)
    }

    /// Largest number of level buckets a range of `len` bp can touch.
    pub fn max_points(&self, len: GenomicPos, level: ResolutionLevel) -> u64 {
        if len == 0 {
            return 0;
        }
        let width = self.bucket_width(level);
        len.div_ceil(width) + 1
    }

    /// Smallest level whose worst-case point count fits into `budget`.
    pub fn select_level(&self, len: GenomicPos, budget: u64) -> TrackResult<ResolutionLevel> {
        if budget == 0 {
            return Err(TrackError::ResolutionError { points: len, budget });
        }
        (0..self.levels())
            .find(|&level| self.max_points(len, level) <= budget)
            .ok_or_else(|| TrackError::ResolutionError {
                points: self.max_points(len, self.max_level()),
                budget,
            })
    }

    pub fn tile_index(&self, pos: GenomicPos, level: ResolutionLevel) -> TileIndex {
        tile_index(pos, self.tile_size(level))
    }

    pub fn tile_bounds(&self, tile: TileIndex, level: ResolutionLevel) -> (GenomicPos, GenomicPos) {
        tile_bounds(tile, self.tile_size(level))
    }

    /// All tiles overlapping `[start, end)` at `level`, in order
    pub fn tiles(&self, start: GenomicPos, end: GenomicPos, level: ResolutionLevel) -> Vec<TileIndex> {
        match tiles_covering(start, end, self.tile_size(level)) {
            Some((first, last)) => (first..=last).collect(),
            None => Vec::new(),
        }
    }
}

impl Default for ResolutionLadder {
    fn default() -> Self {
        Self::new(LadderConfig::default())
    }
}
