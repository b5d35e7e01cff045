//! Per-kind aggregation and trimming
//!
//! Dense tracks are reduced into buckets aligned to multiples of the bucket
//! width, so a bucket never straddles a tile. Short features are grouped by the
//! bucket holding their start, which likewise belongs to exactly one tile.
//!
//! Above full detail a finished feature payload holds at most
//! `MAX_ITEMS_PER_BUCKET` items per bucket of the requested range, so its size
//! follows the viewport width however densely the features are stacked.

use crate::config::{DenseTrackConfig, Statistic};
use crate::coords::{align_down, GenomicRange};
use crate::types::{
    Feature, FeatureCluster, FeatureId, FeatureItem, GenomicPos, OverviewPayload, ScatterPoint,
    ScatterRecord,
};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

/// Items a single bucket may show once features are finalized.
pub const MAX_ITEMS_PER_BUCKET: usize = 4;

/// Reduce position-sorted raw records into one point per non-empty bucket.
pub fn aggregate_points(
    records: &[ScatterRecord],
    bucket_width: GenomicPos,
    track: &DenseTrackConfig,
) -> Vec<ScatterPoint> {
    let width = bucket_width.max(1);
    let mut points = Vec::new();
    let mut values: Vec<f64> = Vec::new();
    let mut current: Option<GenomicPos> = None;
    let mut flagged = false;

    for record in records {
        let bucket = align_down(record.position, width);
        if current != Some(bucket) {
            if let Some(start) = current {
                points.push(reduce_bucket(start, width, &mut values, flagged, track));
            }
            current = Some(bucket);
            values.clear();
            flagged = false;
        }
        flagged |= track.is_out_of_range(record.value);
        values.push(record.value);
    }
    if let Some(start) = current {
        points.push(reduce_bucket(start, width, &mut values, flagged, track));
    }
    points
}

fn reduce_bucket(
    start: GenomicPos,
    width: GenomicPos,
    values: &mut [f64],
    flagged: bool,
    track: &DenseTrackConfig,
) -> ScatterPoint {
    let value = summarize(values, track.statistic);
    ScatterPoint {
        position: start + width / 2,
        value,
        out_of_range: flagged || track.is_out_of_range(value),
    }
}

/// Mean or median of a non-empty value slice; the slice may be reordered.
pub fn summarize(values: &mut [f64], statistic: Statistic) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    match statistic {
        Statistic::Mean => values.iter().sum::<f64>() / values.len() as f64,
        Statistic::Median => {
            values.sort_by(|a, b| a.total_cmp(b));
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            }
        }
    }
}

/// Keep points whose bucket overlaps `range`, clamping positions into it.
pub fn trim_points(
    points: impl IntoIterator<Item = ScatterPoint>,
    range: &GenomicRange,
    bucket_width: GenomicPos,
) -> Vec<ScatterPoint> {
    let width = bucket_width.max(1);
    points
        .into_iter()
        .filter(|p| {
            let bucket = align_down(p.position, width);
            range.overlaps_interval(bucket, bucket.saturating_add(width))
        })
        .map(|p| ScatterPoint {
            position: range.clamp(p.position),
            ..p
        })
        .collect()
}

/// Cluster short features at `bucket_width`.
///
/// With `window` set (a tile), short features starting outside it are left to
/// the tile that owns their bucket. Features at least one bucket long are
/// always kept verbatim.
pub fn aggregate_features(
    features: Vec<Feature>,
    bucket_width: GenomicPos,
    window: Option<(GenomicPos, GenomicPos)>,
) -> Vec<FeatureItem> {
    let width = bucket_width.max(1);
    let mut items = Vec::with_capacity(features.len());
    let mut groups: BTreeMap<GenomicPos, Vec<Feature>> = BTreeMap::new();

    for feature in features {
        if feature.length() >= width {
            items.push(FeatureItem::Feature(feature));
            continue;
        }
        if let Some((lo, hi)) = window {
            if feature.start < lo || feature.start >= hi {
                continue;
            }
        }
        groups
            .entry(align_down(feature.start, width))
            .or_default()
            .push(feature);
    }

    for (_, mut group) in groups {
        if group.len() == 1 {
            items.extend(group.pop().map(FeatureItem::Feature));
        } else {
            items.extend(FeatureCluster::from_members(group).map(FeatureItem::Cluster));
        }
    }

    items.sort_by_key(|item| item.sort_key());
    items
}

/// Trim feature items to `range`, deduplicate features seen in several tiles,
/// cap the items per bucket and restore the deterministic order.
pub fn finalize_features(
    items: impl IntoIterator<Item = FeatureItem>,
    range: &GenomicRange,
    bucket_width: GenomicPos,
) -> Vec<FeatureItem> {
    let mut seen: HashSet<FeatureId> = HashSet::new();
    let mut out = Vec::new();

    for item in items {
        match item {
            FeatureItem::Feature(feature) => {
                if feature.overlaps(range.start, range.end) && seen.insert(feature.id) {
                    out.push(FeatureItem::Feature(feature));
                }
            }
            FeatureItem::Cluster(cluster) => {
                let mut members: Vec<Feature> = cluster
                    .members
                    .into_iter()
                    .filter(|m| m.overlaps(range.start, range.end) && seen.insert(m.id))
                    .collect();
                match members.len() {
                    0 => {}
                    1 => out.extend(members.pop().map(FeatureItem::Feature)),
                    _ => out.extend(FeatureCluster::from_members(members).map(FeatureItem::Cluster)),
                }
            }
        }
    }

    let mut out = if bucket_width > 1 {
        cap_bucket_density(out, range, bucket_width)
    } else {
        out
    };
    out.sort_by_key(|item| item.sort_key());
    out
}

/// Fold crowded buckets so none holds more than `MAX_ITEMS_PER_BUCKET` items.
///
/// An item belongs to the bucket holding its start, or the first bucket of
/// `range` when it starts before the range. The longest items of a crowded
/// bucket stay as they are; everything else becomes one cluster.
fn cap_bucket_density(
    items: Vec<FeatureItem>,
    range: &GenomicRange,
    bucket_width: GenomicPos,
) -> Vec<FeatureItem> {
    let mut buckets: BTreeMap<GenomicPos, Vec<FeatureItem>> = BTreeMap::new();
    for item in items {
        let anchor = item.start().max(range.start);
        buckets
            .entry(align_down(anchor, bucket_width))
            .or_default()
            .push(item);
    }

    let mut out = Vec::new();
    for (_, mut bucket) in buckets {
        if bucket.len() <= MAX_ITEMS_PER_BUCKET {
            out.extend(bucket);
            continue;
        }
        bucket.sort_by_key(|item| (Reverse(item.end().saturating_sub(item.start())), item.sort_key()));
        let folded = bucket.split_off(MAX_ITEMS_PER_BUCKET - 1);
        out.extend(bucket);

        let members: Vec<Feature> = folded
            .into_iter()
            .flat_map(|item| match item {
                FeatureItem::Feature(feature) => vec![feature],
                FeatureItem::Cluster(cluster) => cluster.members,
            })
            .collect();
        out.extend(FeatureCluster::from_members(members).map(FeatureItem::Cluster));
    }
    out
}

/// Keep overview points positioned inside `range`.
pub fn trim_overview(overview: &OverviewPayload, range: &GenomicRange) -> OverviewPayload {
    let keep = |points: &[ScatterPoint]| -> Vec<ScatterPoint> {
        points.iter().filter(|p| range.contains(p.position)).copied().collect()
    };
    OverviewPayload {
        coverage: keep(&overview.coverage),
        baf: keep(&overview.baf),
    }
}
