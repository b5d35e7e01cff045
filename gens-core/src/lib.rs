//! Gens Core Library
//!
//! Range-indexed, multi-resolution track cache and aggregation engine for
//! genome-wide coverage, BAF and annotation tracks.

pub mod error;
pub mod types;
pub mod coords;
pub mod config;
pub mod ladder;
pub mod aggregate;
pub mod overview;
pub mod store;
pub mod cache;
pub mod aggregator;
pub mod highlight;
pub mod api;

// Re-export commonly used types and functions
pub use error::{TrackError, TrackResult};
pub use types::{
    Feature, FeatureCluster, FeatureItem, GenomicPos, OverviewPayload, ResolutionLevel,
    ScatterPoint, ScatterRecord, TileIndex, TrackKind, TrackPayload,
};
pub use coords::{ChromosomeSizes, GenomeBuild, GenomeInfo, GenomicRange};
pub use config::{CacheConfig, DenseTrackConfig, EngineConfig, LadderConfig, Statistic};
pub use ladder::ResolutionLadder;
pub use overview::OverviewDocument;
pub use store::{Fetched, MemoryTrackStore, RawRecords, TrackStore};
pub use cache::{CacheKey, CacheStats, CacheWeight, RangeCache, TrackCache};
pub use aggregator::{AggregatedTrack, TrackAggregator};
pub use highlight::{highlight, HighlightRange, HighlightSet};
pub use api::{
    ApiError, HighlightRequest, InvalidateRequest, InvalidateResponse, TrackRequest,
    TrackResponse, TrackService,
};

/// Version information for the Gens core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
