//! Load command implementation - read sample track files into a track service
//!
//! Track files hold one row per line: the record name, a tab, then the row as
//! the store ingests it (`start end value` or `start end label type ...`).
//! The record name is either a chromosome or `<zoom>_<chromosome>` as written
//! by the Gens preprocessing scripts (`o_1`, `a_X`, `d_22`). For zoomed files
//! the finest zoom level is ingested, and the `o` rows of the coverage and BAF
//! files stand in for the overview when no overview document is configured.
//! Files ending in `.gz` are decompressed on the fly; bgzip output is a
//! multi-member gzip stream, so the multi-member decoder is used.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use gens_core::coords::normalize_chromosome;
use gens_core::overview::OverviewChromosome;
use gens_core::{GenomicPos, MemoryTrackStore, OverviewDocument, TrackKind, TrackService};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, SampleConfig};
use crate::error::CliError;

/// Zoom level of the overview records
const OVERVIEW_ZOOM: char = 'o';

type ChromosomeRows = BTreeMap<String, Vec<String>>;

/// Outcome of loading one track file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub sample_id: String,
    pub kind: TrackKind,
    pub chromosomes: usize,
    pub accepted: usize,
    pub rejected: usize,
}

/// Build a service and load the configured samples, or only `only` if given.
pub fn build_service(config: &Config, only: Option<&str>) -> Result<(TrackService, Vec<LoadReport>)> {
    let store = Arc::new(MemoryTrackStore::new());
    let sizes = Arc::new(config.general.genome_build);
    let service = TrackService::with_config(store, sizes, config.engine())
        .context("Failed to create track service")?;

    let samples: Vec<&SampleConfig> = match only {
        Some(id) => vec![config.sample(id).ok_or_else(|| CliError::unknown_sample(id))?],
        None => config.samples.iter().collect(),
    };

    let mut reports = Vec::new();
    for sample in samples {
        reports.extend(load_sample(&service, sample)?);
    }
    Ok((service, reports))
}

pub fn load_sample(service: &TrackService, sample: &SampleConfig) -> Result<Vec<LoadReport>> {
    log::info!(
        "Loading sample {}{}",
        sample.id,
        sample
            .case_id
            .as_ref()
            .map(|c| format!(" (case {})", c))
            .unwrap_or_default()
    );

    let mut reports = Vec::new();
    let mut overview_rows: Vec<(TrackKind, ChromosomeRows)> = Vec::new();
    for (kind, path) in sample.track_files() {
        let (report, overview) = load_track_file(service, &sample.id, kind, path)?;
        reports.push(report);
        if let Some(rows) = overview.filter(|_| kind.is_dense()) {
            overview_rows.push((kind, rows));
        }
    }

    if let Some(path) = &sample.overview {
        if !path.exists() {
            return Err(CliError::file_not_found(path.clone()).into());
        }
        let document = OverviewDocument::from_path(path)
            .with_context(|| format!("Failed to load overview {}", path.display()))?;
        let chromosomes = document.chromosomes.len();
        service.ingest_overview(&sample.id, document);
        reports.push(LoadReport {
            sample_id: sample.id.clone(),
            kind: TrackKind::Overview,
            chromosomes,
            accepted: chromosomes,
            rejected: 0,
        });
    } else if !overview_rows.is_empty() {
        log::info!("No overview document for {}, using the overview rows of its track files", sample.id);
        let (document, accepted, rejected) = overview_from_rows(overview_rows);
        let chromosomes = document.chromosomes.len();
        service.ingest_overview(&sample.id, document);
        reports.push(LoadReport {
            sample_id: sample.id.clone(),
            kind: TrackKind::Overview,
            chromosomes,
            accepted,
            rejected,
        });
    }
    Ok(reports)
}

/// Ingest one track file; returns its report and the overview rows it held.
pub fn load_track_file(
    service: &TrackService,
    sample_id: &str,
    kind: TrackKind,
    path: &Path,
) -> Result<(LoadReport, Option<ChromosomeRows>)> {
    if !path.exists() {
        return Err(CliError::file_not_found(path.to_path_buf()).into());
    }
    log::info!("Reading {} track from {}", kind, path.display());

    let mut rows = read_rows(open_lines(path)?, path)?;
    let overview = rows.zoomed.get(&OVERVIEW_ZOOM).cloned();
    let (zoom, detail) = rows.take_detail();
    if let Some(zoom) = zoom {
        log::info!("Using zoom level '{}' of {}", zoom, path.display());
    }

    let mut report = LoadReport {
        sample_id: sample_id.to_string(),
        kind,
        chromosomes: detail.len(),
        accepted: 0,
        rejected: rows.malformed,
    };
    for (chromosome, lines) in detail {
        let summary = service.ingest_rows(sample_id, kind, &chromosome, lines)?;
        report.accepted += summary.accepted;
        report.rejected += summary.rejected;
    }
    Ok((report, overview))
}

fn open_lines(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let gzipped = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if gzipped {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Rows of one track file grouped by zoom level and normalized chromosome
#[derive(Debug, Default)]
struct TrackRows {
    /// Rows whose record name is a bare chromosome
    plain: ChromosomeRows,
    zoomed: BTreeMap<char, ChromosomeRows>,
    /// Lines without a record name
    malformed: usize,
}

impl TrackRows {
    /// Take the rows to ingest: the plain rows if any, otherwise the finest
    /// zoom level (`a` < `b` < `c` < `d`), falling back to the overview rows.
    fn take_detail(&mut self) -> (Option<char>, ChromosomeRows) {
        if !self.plain.is_empty() {
            return (None, std::mem::take(&mut self.plain));
        }
        let finest = self
            .zoomed
            .keys()
            .copied()
            .filter(|&zoom| zoom != OVERVIEW_ZOOM)
            .max()
            .or_else(|| self.zoomed.keys().next().copied());
        match finest {
            Some(zoom) => (Some(zoom), self.zoomed.remove(&zoom).unwrap_or_default()),
            None => (None, ChromosomeRows::new()),
        }
    }
}

/// Split a `<zoom>_<chromosome>` record name; bare chromosome names have no zoom.
fn split_record_name(name: &str) -> (Option<char>, &str) {
    if let Some((zoom, chromosome)) = name.split_once('_') {
        let mut chars = zoom.chars();
        if let (Some(z), None) = (chars.next(), chars.next()) {
            if z.is_ascii_alphanumeric() && !chromosome.is_empty() {
                return (Some(z.to_ascii_lowercase()), chromosome);
            }
        }
    }
    (None, name)
}

fn read_rows<R: BufRead>(reader: R, path: &Path) -> Result<TrackRows> {
    let mut rows = TrackRows::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            CliError::parse(path.display().to_string(), format!("line {}: {}", idx + 1, e))
        })?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('\t') {
            Some((name, row)) if !name.is_empty() => {
                let (zoom, chromosome) = split_record_name(name);
                let group = match zoom {
                    Some(zoom) => rows.zoomed.entry(zoom).or_default(),
                    None => &mut rows.plain,
                };
                group
                    .entry(normalize_chromosome(chromosome))
                    .or_default()
                    .push(row.to_string());
            }
            _ => {
                log::warn!("{}:{}: missing chromosome column", path.display(), idx + 1);
                rows.malformed += 1;
            }
        }
    }
    Ok(rows)
}

/// Build an overview document from `start end value` rows of dense tracks.
///
/// Returns the document with the number of accepted and rejected rows.
fn overview_from_rows(tracks: Vec<(TrackKind, ChromosomeRows)>) -> (OverviewDocument, usize, usize) {
    let mut document = OverviewDocument::default();
    let (mut accepted, mut rejected) = (0, 0);

    for (kind, chromosomes) in tracks {
        for (chromosome, lines) in chromosomes {
            let entry: &mut OverviewChromosome = document.chromosomes.entry(chromosome).or_default();
            let points = if kind == TrackKind::Baf {
                &mut entry.baf
            } else {
                &mut entry.cov
            };
            for line in lines {
                match parse_point(&line) {
                    Some(point) => {
                        points.push(point);
                        accepted += 1;
                    }
                    None => {
                        log::warn!("Skipping malformed {} overview row: {:?}", kind, line);
                        rejected += 1;
                    }
                }
            }
        }
    }
    (document, accepted, rejected)
}

/// Midpoint and value of a `start end value` row
fn parse_point(row: &str) -> Option<(GenomicPos, f64)> {
    let mut fields = row.split('\t').map(str::trim);
    let start: GenomicPos = fields.next()?.parse().ok()?;
    let end: GenomicPos = fields.next()?.parse().ok()?;
    let value: f64 = fields.next()?.parse().ok()?;
    if end < start || !value.is_finite() {
        return None;
    }
    Some((start + (end - start) / 2, value))
}

pub fn execute(config: &Config, sample: Option<String>) -> Result<()> {
    let (service, reports) = build_service(config, sample.as_deref())?;

    println!("{:<16} {:<18} {:>6} {:>10} {:>9}", "sample", "track", "chroms", "accepted", "rejected");
    for report in &reports {
        println!(
            "{:<16} {:<18} {:>6} {:>10} {:>9}",
            report.sample_id,
            report.kind.as_str(),
            report.chromosomes,
            report.accepted,
            report.rejected
        );
    }

    let stats = service.stats();
    log::info!(
        "Loaded {} track files for {} samples ({} rows rejected)",
        reports.len(),
        reports.iter().map(|r| &r.sample_id).collect::<std::collections::BTreeSet<_>>().len(),
        reports.iter().map(|r| r.rejected).sum::<usize>()
    );
    log::debug!("Cache after load: {:?}", stats.cache);
    Ok(())
}
