//! Highlight ranges of annotation features inside a base range

use crate::coords::GenomicRange;
use crate::types::{Feature, FeatureId, FeatureItem, GenomicPos, TrackPayload};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRange {
    pub start: GenomicPos,
    pub end: GenomicPos,
    pub source_id: FeatureId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightSet {
    pub chromosome: String,
    pub ranges: Vec<HighlightRange>,
}

impl HighlightSet {
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Intersect `base` with every feature of `payload`.
///
/// Clusters are expanded into their members. Dense and overview payloads
/// carry no features and give an empty set.
pub fn highlight(base: &GenomicRange, payload: &TrackPayload) -> HighlightSet {
    let mut ranges = Vec::new();
    if let Some(items) = payload.features() {
        for item in items {
            match item {
                FeatureItem::Feature(feature) => ranges.extend(intersect(base, feature)),
                FeatureItem::Cluster(cluster) => {
                    ranges.extend(cluster.members.iter().filter_map(|m| intersect(base, m)))
                }
            }
        }
    }
    ranges.sort_by_key(|r| (r.start, r.end, r.source_id));
    ranges.dedup_by_key(|r| (r.start, r.end, r.source_id));

    HighlightSet {
        chromosome: base.chromosome.clone(),
        ranges,
    }
}

fn intersect(base: &GenomicRange, feature: &Feature) -> Option<HighlightRange> {
    let overlap = base.intersect_interval(feature.start, feature.end)?;
    Some(HighlightRange {
        start: overlap.start,
        end: overlap.end,
        source_id: feature.id,
        label: feature.label.clone(),
        color: feature.color.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureCluster, ScatterPoint};
    use std::collections::BTreeMap;

    fn feature(id: FeatureId, start: GenomicPos, end: GenomicPos) -> Feature {
        Feature {
            id,
            start,
            end,
            label: format!("A{}", id),
            feature_type: "annotation".to_string(),
            color: Some("#00ff00".to_string()),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_intersections_are_ordered() {
        let cluster = FeatureCluster::from_members(vec![feature(3, 900, 950), feature(4, 2000, 2100)]).unwrap();
        let payload = TrackPayload::Features(vec![
            FeatureItem::Feature(feature(2, 500, 1500)),
            FeatureItem::Feature(feature(1, 0, 800)),
            FeatureItem::Cluster(cluster),
        ]);
        let set = highlight(&GenomicRange::new("chr3", 700, 1000), &payload);

        assert_eq!(set.chromosome, "3");
        let spans: Vec<_> = set.ranges.iter().map(|r| (r.start, r.end, r.source_id)).collect();
        assert_eq!(spans, vec![(700, 800, 1), (700, 1000, 2), (900, 950, 3)]);
        assert_eq!(set.ranges[0].label, "A1");
        assert_eq!(set.ranges[0].color.as_deref(), Some("#00ff00"));
    }

    #[test]
    fn test_touching_features_do_not_intersect() {
        let payload = TrackPayload::Features(vec![FeatureItem::Feature(feature(1, 0, 100))]);
        assert!(highlight(&GenomicRange::new("1", 100, 200), &payload).is_empty());
    }

    #[test]
    fn test_non_feature_payload() {
        let payload = TrackPayload::Points(vec![ScatterPoint { position: 5, value: 1.0, out_of_range: false }]);
        assert!(highlight(&GenomicRange::new("1", 0, 10), &payload).is_empty());
    }
}
