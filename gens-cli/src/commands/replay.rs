//! Replay command implementation - run a recorded request log concurrently
//!
//! The log is JSON lines, one `TrackRequest` per line. Requests are resolved
//! on the rayon pool, so overlapping requests exercise the cache the way
//! concurrent viewers do.

use anyhow::{Context, Result};
use gens_core::api::ServiceStats;
use gens_core::{TrackRequest, TrackService};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use crate::error::CliError;

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub requests: usize,
    pub succeeded: usize,
    /// Failed requests per status code
    pub failed: BTreeMap<u16, usize>,
    pub elapsed_ms: u128,
    pub hit_rate: f64,
    pub stats: ServiceStats,
}

pub fn read_requests<R: BufRead>(reader: R, source: &str) -> Result<Vec<TrackRequest>> {
    let mut requests = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", source))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let request: TrackRequest = serde_json::from_str(line)
            .map_err(|e| CliError::parse(source, format!("line {}: {}", idx + 1, e)))?;
        requests.push(request);
    }
    Ok(requests)
}

/// Resolve every request `repeat` times in parallel.
pub fn replay(service: &TrackService, requests: &[TrackRequest], repeat: usize) -> ReplaySummary {
    let started = Instant::now();
    let jobs: Vec<&TrackRequest> = (0..repeat.max(1)).flat_map(|_| requests.iter()).collect();

    let outcomes: Vec<Result<(), u16>> = jobs
        .par_iter()
        .map(|request| match service.track(request) {
            Ok(_) => Ok(()),
            Err(err) => {
                log::debug!("Request for {} failed: {}", request.sample_id, err);
                Err(err.status)
            }
        })
        .collect();

    let mut failed: BTreeMap<u16, usize> = BTreeMap::new();
    for status in outcomes.iter().filter_map(|o| o.err()) {
        *failed.entry(status).or_default() += 1;
    }
    let stats = service.stats();
    ReplaySummary {
        requests: jobs.len(),
        succeeded: outcomes.iter().filter(|o| o.is_ok()).count(),
        failed,
        elapsed_ms: started.elapsed().as_millis(),
        hit_rate: stats.cache.hit_rate(),
        stats,
    }
}

pub fn execute(service: &TrackService, path: &Path, repeat: usize) -> Result<()> {
    if !path.exists() {
        return Err(CliError::file_not_found(path.to_path_buf()).into());
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let requests = read_requests(BufReader::new(file), &path.display().to_string())?;
    log::info!(
        "Replaying {} requests x{} on {} threads",
        requests.len(),
        repeat.max(1),
        rayon::current_num_threads()
    );

    let summary = replay(service, &requests, repeat);
    log::info!(
        "{} of {} requests succeeded in {} ms, cache hit rate {:.1}% ({} hits, {} coalesced, {} misses)",
        summary.succeeded,
        summary.requests,
        summary.elapsed_ms,
        summary.hit_rate * 100.0,
        summary.stats.cache.hits,
        summary.stats.cache.coalesced,
        summary.stats.cache.misses
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
