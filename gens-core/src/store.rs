//! Track store adapter
//!
//! Raw rows are indexed by coordinates when they are ingested and parsed into
//! records only when a fetch touches them, the way a tabix-indexed bed file
//! is read. A row that fails to parse is skipped and counted so one bad line
//! never blanks out the rest of a tile.
//!
//! Row layouts (tab-separated, chromosome column already split off):
//! - dense (`coverage`, `baf`): `start end value`
//! - features: `start end label type [color [key=value;...]]`

use crate::coords::normalize_chromosome;
use crate::error::{TrackError, TrackResult};
use crate::overview::OverviewDocument;
use crate::types::{Feature, FeatureId, GenomicPos, ScatterRecord, TrackKind};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Records returned by one store read
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecords {
    Scatter(Vec<ScatterRecord>),
    Features(Vec<Feature>),
    Overview {
        coverage: Vec<ScatterRecord>,
        baf: Vec<ScatterRecord>,
    },
}

impl RawRecords {
    pub fn len(&self) -> usize {
        match self {
            RawRecords::Scatter(records) => records.len(),
            RawRecords::Features(features) => features.len(),
            RawRecords::Overview { coverage, baf } => coverage.len() + baf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub records: RawRecords,
    /// Rows skipped because they failed to parse
    pub corrupt: usize,
}

/// Uniform range-restricted read interface over all track kinds.
pub trait TrackStore: Send + Sync {
    /// Records of `kind` for `sample_id` in `[start, end)` on `chromosome`.
    ///
    /// Dense records are selected by position, features by overlap. The
    /// overview kind ignores the range and returns the whole chromosome.
    fn fetch(
        &self,
        kind: TrackKind,
        sample_id: &str,
        chromosome: &str,
        start: GenomicPos,
        end: GenomicPos,
    ) -> TrackResult<Fetched>;
}

#[derive(Debug, Clone)]
struct DenseRow {
    position: GenomicPos,
    line: usize,
    value: String,
}

#[derive(Debug, Clone)]
struct FeatureRow {
    id: FeatureId,
    start: GenomicPos,
    end: GenomicPos,
    line: usize,
    fields: String,
}

#[derive(Debug, Default)]
struct FeatureIndex {
    rows: Vec<FeatureRow>,
    max_len: GenomicPos,
}

#[derive(Debug, Default)]
struct TrackData {
    dense: HashMap<String, Vec<DenseRow>>,
    features: HashMap<String, FeatureIndex>,
    next_id: FeatureId,
}

/// Outcome of loading rows for one chromosome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: usize,
}

/// Counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub fetches: u64,
    pub corrupt_rows: u64,
}

/// In-memory indexed store for all track kinds.
#[derive(Default)]
pub struct MemoryTrackStore {
    tracks: RwLock<HashMap<(String, TrackKind), TrackData>>,
    overviews: RwLock<HashMap<String, OverviewDocument>>,
    fetches: AtomicU64,
    corrupt_rows: AtomicU64,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rows of one chromosome for a sample's track.
    ///
    /// Rows whose coordinates cannot be read are rejected here, since they
    /// cannot be indexed; the remaining columns are only checked at fetch time.
    pub fn ingest_rows<I, S>(
        &self,
        sample_id: &str,
        kind: TrackKind,
        chromosome: &str,
        rows: I,
    ) -> TrackResult<IngestSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if kind == TrackKind::Overview {
            return Err(TrackError::config(
                "Overview data is loaded as a document, not as rows",
            ));
        }
        let chrom = normalize_chromosome(chromosome);
        let mut summary = IngestSummary::default();

        // Rows are split and indexed before the track map is locked.
        let mut coordinates = Vec::new();
        for (line, row) in rows.into_iter().enumerate() {
            let row = row.as_ref();
            match split_coordinates(row) {
                Ok((start, end, rest)) => {
                    coordinates.push((start, end, line + 1, rest.to_string()));
                    summary.accepted += 1;
                }
                Err(e) => {
                    log::warn!("Rejected {} row for {} on {}: {}", kind, sample_id, chrom, e);
                    summary.rejected += 1;
                }
            }
        }

        if kind.is_dense() {
            let mut index: Vec<DenseRow> = coordinates
                .into_iter()
                .map(|(start, end, line, value)| DenseRow {
                    position: start + (end - start) / 2,
                    line,
                    value,
                })
                .collect();
            index.sort_by_key(|r| (r.position, r.line));
            let mut tracks = self.tracks.write();
            let data = tracks.entry((sample_id.to_string(), kind)).or_default();
            data.dense.insert(chrom.clone(), index);
        } else {
            let mut tracks = self.tracks.write();
            let data = tracks.entry((sample_id.to_string(), kind)).or_default();
            let mut index = FeatureIndex::default();
            for (start, end, line, fields) in coordinates {
                let end = end.max(start.saturating_add(1));
                index.max_len = index.max_len.max(end - start);
                index.rows.push(FeatureRow {
                    id: data.next_id,
                    start,
                    end,
                    line,
                    fields,
                });
                data.next_id += 1;
            }
            index.rows.sort_by_key(|r| (r.start, r.end, r.id));
            data.features.insert(chrom.clone(), index);
        }

        log::info!(
            "Loaded {} {} rows for sample {} on {} ({} rejected)",
            summary.accepted,
            kind,
            sample_id,
            chrom,
            summary.rejected
        );
        Ok(summary)
    }

    pub fn ingest_overview(&self, sample_id: &str, document: OverviewDocument) {
        log::info!(
            "Loaded overview for sample {} ({} chromosomes)",
            sample_id,
            document.chromosomes.len()
        );
        self.overviews.write().insert(sample_id.to_string(), document);
    }

    /// Drop all data of one track for a sample
    pub fn remove_track(&self, sample_id: &str, kind: TrackKind) -> bool {
        if kind == TrackKind::Overview {
            return self.overviews.write().remove(sample_id).is_some();
        }
        self.tracks
            .write()
            .remove(&(sample_id.to_string(), kind))
            .is_some()
    }

    pub fn is_loaded(&self, sample_id: &str, kind: TrackKind) -> bool {
        if kind == TrackKind::Overview {
            return self.overviews.read().contains_key(sample_id);
        }
        self.tracks
            .read()
            .contains_key(&(sample_id.to_string(), kind))
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            fetches: self.fetches.load(Ordering::Relaxed),
            corrupt_rows: self.corrupt_rows.load(Ordering::Relaxed),
        }
    }

    fn fetch_dense(
        rows: &[DenseRow],
        start: GenomicPos,
        end: GenomicPos,
        context: &str,
    ) -> (Vec<ScatterRecord>, usize) {
        let lo = rows.partition_point(|r| r.position < start);
        let hi = rows.partition_point(|r| r.position < end);
        let mut corrupt = 0;
        let records = rows[lo..hi.max(lo)]
            .iter()
            .filter_map(|row| match parse_value(row.line, &row.value) {
                Ok(value) => Some(ScatterRecord {
                    position: row.position,
                    value,
                }),
                Err(e) => {
                    log::warn!("Skipping corrupt row in {}: {}", context, e);
                    corrupt += 1;
                    None
                }
            })
            .collect();
        (records, corrupt)
    }

    fn fetch_features(
        index: &FeatureIndex,
        start: GenomicPos,
        end: GenomicPos,
        context: &str,
    ) -> (Vec<Feature>, usize) {
        let scan_from = start.saturating_sub(index.max_len);
        let lo = index.rows.partition_point(|r| r.start < scan_from);
        let hi = index.rows.partition_point(|r| r.start < end);
        let mut corrupt = 0;
        let features = index.rows[lo..hi.max(lo)]
            .iter()
            .filter(|row| row.end > start)
            .filter_map(|row| match parse_feature(row) {
                Ok(feature) => Some(feature),
                Err(e) => {
                    log::warn!("Skipping corrupt row in {}: {}", context, e);
                    corrupt += 1;
                    None
                }
            })
            .collect();
        (features, corrupt)
    }
}

impl TrackStore for MemoryTrackStore {
    fn fetch(
        &self,
        kind: TrackKind,
        sample_id: &str,
        chromosome: &str,
        start: GenomicPos,
        end: GenomicPos,
    ) -> TrackResult<Fetched> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let chrom = normalize_chromosome(chromosome);
        let context = format!("{} {} {}:{}-{}", sample_id, kind, chrom, start, end);

        if kind == TrackKind::Overview {
            let overviews = self.overviews.read();
            let document = overviews
                .get(sample_id)
                .ok_or_else(|| TrackError::data_unavailable(sample_id, kind))?;
            let (coverage, baf) = document
                .chromosome(&chrom)
                .map(|c| (c.coverage_records(), c.baf_records()))
                .unwrap_or_default();
            return Ok(Fetched {
                records: RawRecords::Overview { coverage, baf },
                corrupt: 0,
            });
        }

        let tracks = self.tracks.read();
        let data = tracks
            .get(&(sample_id.to_string(), kind))
            .ok_or_else(|| TrackError::data_unavailable(sample_id, kind))?;

        let (records, corrupt) = if kind.is_dense() {
            let (records, corrupt) = data
                .dense
                .get(&chrom)
                .map(|rows| Self::fetch_dense(rows, start, end, &context))
                .unwrap_or_default();
            (RawRecords::Scatter(records), corrupt)
        } else {
            let (features, corrupt) = data
                .features
                .get(&chrom)
                .map(|index| Self::fetch_features(index, start, end, &context))
                .unwrap_or_default();
            (RawRecords::Features(features), corrupt)
        };

        if corrupt > 0 {
            self.corrupt_rows.fetch_add(corrupt as u64, Ordering::Relaxed);
        }
        Ok(Fetched { records, corrupt })
    }
}

/// Exclusive upper bound on row coordinates; far beyond any assembled contig.
pub const MAX_COORDINATE: GenomicPos = 1 << 40;

fn split_coordinates(row: &str) -> TrackResult<(GenomicPos, GenomicPos, &str)> {
    let mut parts = row.trim_end_matches(['\r', '\n']).splitn(3, '\t');
    let start = parts.next().unwrap_or_default();
    let end = parts
        .next()
        .ok_or_else(|| TrackError::corrupt_record(0, format!("Missing end column: {:?}", row)))?;
    let rest = parts.next().unwrap_or_default();
    let start: GenomicPos = start
        .trim()
        .parse()
        .map_err(|_| TrackError::corrupt_record(0, format!("Invalid start: {:?}", start)))?;
    let end: GenomicPos = end
        .trim()
        .parse()
        .map_err(|_| TrackError::corrupt_record(0, format!("Invalid end: {:?}", end)))?;
    if end < start {
        return Err(TrackError::corrupt_record(0, format!("End {} before start {}", end, start)));
    }
    if end >= MAX_COORDINATE {
        return Err(TrackError::corrupt_record(0, format!("Coordinate {} out of range", end)));
    }
    Ok((start, end, rest))
}

/// Parse the value column of a dense row; non-finite values are corrupt.
pub fn parse_value(line: usize, text: &str) -> TrackResult<f64> {
    let field = text.split('\t').next().unwrap_or_default().trim();
    let value: f64 = field
        .parse()
        .map_err(|_| TrackError::corrupt_record(line, format!("Invalid value: {:?}", field)))?;
    if !value.is_finite() {
        return Err(TrackError::corrupt_record(line, format!("Non-finite value: {}", field)));
    }
    Ok(value)
}

fn parse_feature(row: &FeatureRow) -> TrackResult<Feature> {
    let mut fields = row.fields.split('\t');
    let label = fields.next().map(str::trim).unwrap_or_default();
    let feature_type = fields.next().map(str::trim).unwrap_or_default();
    if label.is_empty() || feature_type.is_empty() {
        return Err(TrackError::corrupt_record(
            row.line,
            format!("Feature row needs label and type columns: {:?}", row.fields),
        ));
    }
    let color = fields
        .next()
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string);
    let mut metadata = BTreeMap::new();
    if let Some(attributes) = fields.next() {
        for pair in attributes.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                TrackError::corrupt_record(row.line, format!("Invalid attribute: {:?}", pair))
            })?;
            metadata.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(Feature {
        id: row.id,
        start: row.start,
        end: row.end,
        label: label.to_string(),
        feature_type: feature_type.to_string(),
        color,
        metadata,
    })
}
