//! Engine configuration
//!
//! Every field has a serde default so a partial `gens.toml` section is enough.

use crate::error::{TrackError, TrackResult};
use crate::types::TrackKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub ladder: LadderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tracks: TrackSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderConfig {
    /// Number of resolution levels
    #[serde(default = "default_levels")]
    pub levels: u16,

    /// Bucket width multiplier between consecutive levels
    #[serde(default = "default_growth_factor")]
    pub growth_factor: u64,

    /// Bucket width at level 0 in base pairs
    #[serde(default = "default_base_bucket")]
    pub base_bucket: u64,

    /// Aggregated points one tile holds
    #[serde(default = "default_points_per_tile")]
    pub points_per_tile: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total payload bytes kept before LRU eviction starts
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Run eviction on a background thread instead of inline
    #[serde(default)]
    pub background_eviction: bool,

    /// Wake-up interval of the background evictor in milliseconds
    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_interval_ms: u64,
}

/// Summary statistic used to reduce raw values in one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Mean,
    Median,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseTrackConfig {
    #[serde(default = "default_statistic")]
    pub statistic: Statistic,

    /// Values outside `[low, high]` are flagged out of range
    pub normal_range: (f64, f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSettings {
    #[serde(default = "default_coverage")]
    pub coverage: DenseTrackConfig,
    #[serde(default = "default_baf")]
    pub baf: DenseTrackConfig,
}

fn default_levels() -> u16 { 14 }
fn default_growth_factor() -> u64 { 4 }
fn default_base_bucket() -> u64 { 1 }
fn default_points_per_tile() -> u64 { 256 }
fn default_max_bytes() -> usize { 256 * 1024 * 1024 }
fn default_eviction_interval_ms() -> u64 { 500 }
fn default_statistic() -> Statistic { Statistic::Median }
fn default_coverage() -> DenseTrackConfig {
    DenseTrackConfig {
        statistic: default_statistic(),
        normal_range: (-3.0, 3.0),
    }
}
fn default_baf() -> DenseTrackConfig {
    DenseTrackConfig {
        statistic: default_statistic(),
        normal_range: (0.0, 1.0),
    }
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            growth_factor: default_growth_factor(),
            base_bucket: default_base_bucket(),
            points_per_tile: default_points_per_tile(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            background_eviction: false,
            eviction_interval_ms: default_eviction_interval_ms(),
        }
    }
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            coverage: default_coverage(),
            baf: default_baf(),
        }
    }
}

impl DenseTrackConfig {
    pub fn is_out_of_range(&self, value: f64) -> bool {
        let (low, high) = self.normal_range;
        value.is_nan() || value < low || value > high
    }
}

impl TrackSettings {
    /// Dense settings for `kind`; `None` for non-dense kinds.
    pub fn dense(&self, kind: TrackKind) -> Option<&DenseTrackConfig> {
        match kind {
            TrackKind::Coverage => Some(&self.coverage),
            TrackKind::Baf => Some(&self.baf),
            _ => None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> TrackResult<()> {
        let ladder = &self.ladder;
        if ladder.levels == 0 {
            return Err(TrackError::config("ladder.levels must be at least 1"));
        }
        if ladder.growth_factor < 2 {
            return Err(TrackError::config("ladder.growth_factor must be at least 2"));
        }
        if ladder.base_bucket == 0 || ladder.points_per_tile == 0 {
            return Err(TrackError::config(
                "ladder.base_bucket and ladder.points_per_tile must be positive",
            ));
        }
        let top = ladder
            .growth_factor
            .checked_pow(u32::from(ladder.levels - 1))
            .and_then(|f| f.checked_mul(ladder.base_bucket))
            .and_then(|w| w.checked_mul(ladder.points_per_tile));
        if top.is_none() {
            return Err(TrackError::config("ladder tile size overflows at the top level"));
        }
        for (name, track) in [("coverage", &self.tracks.coverage), ("baf", &self.tracks.baf)] {
            let (low, high) = track.normal_range;
            if !(low <= high) {
                return Err(TrackError::config(format!(
                    "tracks.{}.normal_range must satisfy low <= high",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ladder.growth_factor, 4);
        assert_eq!(config.tracks.baf.normal_range, (0.0, 1.0));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"ladder": {"levels": 5}, "tracks": {"coverage": {"normal_range": [-1.0, 1.0]}}}"#)
                .unwrap();
        assert_eq!(config.ladder.levels, 5);
        assert_eq!(config.ladder.points_per_tile, 256);
        assert_eq!(config.tracks.coverage.statistic, Statistic::Median);
        assert_eq!(config.tracks.coverage.normal_range, (-1.0, 1.0));
    }

    #[test]
    fn test_invalid_ladder_rejected() {
        let mut config = EngineConfig::default();
        config.ladder.growth_factor = 1;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.ladder.levels = 64;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_check() {
        let track = default_coverage();
        assert!(!track.is_out_of_range(0.0));
        assert!(!track.is_out_of_range(3.0));
        assert!(track.is_out_of_range(-3.5));
        assert!(track.is_out_of_range(f64::NAN));
    }
}
