use crate::error::{TrackError, TrackResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type GenomicPos = u64;
pub type TileIndex = u64;
pub type ResolutionLevel = u16;
pub type FeatureId = u64;

/// The closed set of track kinds served by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackKind {
    Coverage,
    Baf,
    Gene,
    Variant,
    SampleAnnotation,
    Overview,
}

impl TrackKind {
    pub const ALL: [TrackKind; 6] = [
        TrackKind::Coverage,
        TrackKind::Baf,
        TrackKind::Gene,
        TrackKind::Variant,
        TrackKind::SampleAnnotation,
        TrackKind::Overview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Coverage => "coverage",
            TrackKind::Baf => "baf",
            TrackKind::Gene => "gene",
            TrackKind::Variant => "variant",
            TrackKind::SampleAnnotation => "sample-annotation",
            TrackKind::Overview => "overview",
        }
    }

    /// Dense numeric tracks aggregated into scatter points
    pub fn is_dense(&self) -> bool {
        matches!(self, TrackKind::Coverage | TrackKind::Baf)
    }

    /// Interval tracks aggregated into features and clusters
    pub fn is_feature(&self) -> bool {
        matches!(
            self,
            TrackKind::Gene | TrackKind::Variant | TrackKind::SampleAnnotation
        )
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackKind {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coverage" | "cov" => Ok(TrackKind::Coverage),
            "baf" => Ok(TrackKind::Baf),
            "gene" | "genes" => Ok(TrackKind::Gene),
            "variant" | "variants" => Ok(TrackKind::Variant),
            "sample-annotation" | "annotation" => Ok(TrackKind::SampleAnnotation),
            "overview" => Ok(TrackKind::Overview),
            other => Err(TrackError::config(format!("Unknown track kind: {}", other))),
        }
    }
}

/// One raw numeric sample of a coverage or BAF track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScatterRecord {
    pub position: GenomicPos,
    pub value: f64,
}

/// One aggregated point of a coverage or BAF track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScatterPoint {
    pub position: GenomicPos,
    pub value: f64,
    pub out_of_range: bool,
}

/// An interval feature: gene, variant or sample annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub start: GenomicPos,
    pub end: GenomicPos,
    pub label: String,
    pub feature_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Feature {
    pub fn length(&self) -> GenomicPos {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, start: GenomicPos, end: GenomicPos) -> bool {
        self.start < end && start < self.end
    }
}

/// Features too short to render individually at the current scale, merged.
///
/// `members` keeps the original features so a cluster can be expanded
/// without going back to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCluster {
    pub start: GenomicPos,
    pub end: GenomicPos,
    pub count: usize,
    pub label: String,
    pub members: Vec<Feature>,
}

impl FeatureCluster {
    /// Build a cluster from its members; `None` for an empty member list.
    pub fn from_members(mut members: Vec<Feature>) -> Option<Self> {
        if members.is_empty() {
            return None;
        }
        members.sort_by(|a, b| (a.start, a.end, a.id).cmp(&(b.start, b.end, b.id)));
        let start = members.iter().map(|f| f.start).min().unwrap_or_default();
        let end = members.iter().map(|f| f.end).max().unwrap_or_default();
        let count = members.len();
        Some(Self {
            start,
            end,
            count,
            label: format!("{} features", count),
            members,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureItem {
    Feature(Feature),
    Cluster(FeatureCluster),
}

impl FeatureItem {
    pub fn start(&self) -> GenomicPos {
        match self {
            FeatureItem::Feature(f) => f.start,
            FeatureItem::Cluster(c) => c.start,
        }
    }

    pub fn end(&self) -> GenomicPos {
        match self {
            FeatureItem::Feature(f) => f.end,
            FeatureItem::Cluster(c) => c.end,
        }
    }

    /// Sort key giving a total, deterministic order over items
    pub fn sort_key(&self) -> (GenomicPos, GenomicPos, FeatureId) {
        match self {
            FeatureItem::Feature(f) => (f.start, f.end, f.id),
            FeatureItem::Cluster(c) => (
                c.start,
                c.end,
                c.members.first().map(|m| m.id).unwrap_or_default(),
            ),
        }
    }
}

/// Coverage and BAF points of the precomputed whole-sample overview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverviewPayload {
    pub coverage: Vec<ScatterPoint>,
    pub baf: Vec<ScatterPoint>,
}

/// Reduced representation returned for one track request or one cache tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", content = "items", rename_all = "snake_case")]
pub enum TrackPayload {
    Points(Vec<ScatterPoint>),
    Features(Vec<FeatureItem>),
    Overview(OverviewPayload),
}

impl TrackPayload {
    /// Empty payload of the shape used for `kind`
    pub fn empty_for(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Coverage | TrackKind::Baf => TrackPayload::Points(Vec::new()),
            TrackKind::Overview => TrackPayload::Overview(OverviewPayload::default()),
            _ => TrackPayload::Features(Vec::new()),
        }
    }

    /// Number of points or feature items
    pub fn len(&self) -> usize {
        match self {
            TrackPayload::Points(points) => points.len(),
            TrackPayload::Features(items) => items.len(),
            TrackPayload::Overview(overview) => overview.coverage.len() + overview.baf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn points(&self) -> Option<&[ScatterPoint]> {
        match self {
            TrackPayload::Points(points) => Some(points),
            _ => None,
        }
    }

    pub fn features(&self) -> Option<&[FeatureItem]> {
        match self {
            TrackPayload::Features(items) => Some(items),
            _ => None,
        }
    }

    /// Approximate heap footprint, used for the cache byte budget.
    pub fn size_bytes(&self) -> usize {
        let base = std::mem::size_of::<Self>();
        match self {
            TrackPayload::Points(points) => base + points.len() * std::mem::size_of::<ScatterPoint>(),
            TrackPayload::Features(items) => base + items.iter().map(item_size).sum::<usize>(),
            TrackPayload::Overview(overview) => {
                base + (overview.coverage.len() + overview.baf.len())
                    * std::mem::size_of::<ScatterPoint>()
            }
        }
    }

    /// Stable xxh64 over the JSON encoding; identical payloads hash identically.
    pub fn fingerprint(&self) -> TrackResult<u64> {
        let bytes = serde_json::to_vec(self)?;
        Ok(xxhash_rust::xxh64::xxh64(&bytes, 0))
    }
}

fn feature_size(feature: &Feature) -> usize {
    std::mem::size_of::<Feature>()
        + feature.label.len()
        + feature.feature_type.len()
        + feature.color.as_ref().map(|c| c.len()).unwrap_or(0)
        + feature
            .metadata
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum::<usize>()
}

fn item_size(item: &FeatureItem) -> usize {
    match item {
        FeatureItem::Feature(f) => feature_size(f),
        FeatureItem::Cluster(c) => {
            std::mem::size_of::<FeatureCluster>()
                + c.label.len()
                + c.members.iter().map(feature_size).sum::<usize>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(id: FeatureId, start: GenomicPos, end: GenomicPos) -> Feature {
        Feature {
            id,
            start,
            end,
            label: format!("f{}", id),
            feature_type: "gene".to_string(),
            color: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_track_kind_parse() {
        assert_eq!("coverage".parse::<TrackKind>().unwrap(), TrackKind::Coverage);
        assert_eq!("sample-annotation".parse::<TrackKind>().unwrap(), TrackKind::SampleAnnotation);
        assert!("methylation".parse::<TrackKind>().is_err());
        for kind in TrackKind::ALL {
            assert_eq!(kind.as_str().parse::<TrackKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_track_kind_serde_names() {
        let json = serde_json::to_string(&TrackKind::SampleAnnotation).unwrap();
        assert_eq!(json, "\"sample-annotation\"");
    }

    #[test]
    fn test_cluster_from_members() {
        let cluster = FeatureCluster::from_members(vec![feature(2, 50, 60), feature(1, 10, 20)]).unwrap();
        assert_eq!(cluster.start, 10);
        assert_eq!(cluster.end, 60);
        assert_eq!(cluster.count, 2);
        assert_eq!(cluster.members[0].id, 1);
        assert_eq!(cluster.label, "2 features");
        assert!(FeatureCluster::from_members(Vec::new()).is_none());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = TrackPayload::Points(vec![ScatterPoint { position: 5, value: 0.25, out_of_range: false }]);
        let b = a.clone();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let c = TrackPayload::Points(vec![ScatterPoint { position: 5, value: 0.25, out_of_range: true }]);
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn test_size_grows_with_content() {
        let small = TrackPayload::Features(vec![FeatureItem::Feature(feature(1, 0, 10))]);
        let large = TrackPayload::Features(vec![
            FeatureItem::Feature(feature(1, 0, 10)),
            FeatureItem::Feature(feature(2, 20, 30)),
        ]);
        assert!(large.size_bytes() > small.size_bytes());
    }
}
