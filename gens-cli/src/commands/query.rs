//! Query and highlight commands - resolve one request and print it as JSON

use anyhow::Result;
use gens_core::{GenomicRange, HighlightRequest, TrackKind, TrackRequest, TrackService};
use serde::Serialize;

use crate::error::CliError;

/// Parse a region such as `chr1:1,000,000-2,000,000`.
pub fn parse_region(region: &str) -> Result<GenomicRange> {
    region
        .parse::<GenomicRange>()
        .map_err(|e| CliError::parse("--region", e.to_string()).into())
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

pub fn execute(
    service: &TrackService,
    sample: String,
    case_id: Option<String>,
    kind: TrackKind,
    region: &str,
    width: u64,
    pretty: bool,
) -> Result<()> {
    let range = parse_region(region)?;
    let request = TrackRequest {
        sample_id: sample,
        case_id,
        track_kind: kind,
        chromosome: range.chromosome,
        start: range.start,
        end: range.end,
        viewport_width: width,
    };

    let response = service.track(&request).map_err(CliError::from)?;
    log::info!(
        "{} {} {}:{}-{}: level {} ({} bp buckets), {} items, fingerprint {}",
        response.sample_id,
        response.track_kind,
        response.chromosome,
        response.start,
        response.end,
        response.level,
        response.bucket_width,
        response.payload.len(),
        response.fingerprint
    );
    print_json(&response, pretty)
}

pub fn execute_highlight(
    service: &TrackService,
    sample: String,
    kind: TrackKind,
    region: &str,
    width: u64,
    pretty: bool,
) -> Result<()> {
    let range = parse_region(region)?;
    let request = HighlightRequest {
        sample_id: sample,
        annotation_kind: kind,
        chromosome: range.chromosome,
        start: range.start,
        end: range.end,
        viewport_width: width,
    };
    let set = service.highlight(&request).map_err(CliError::from)?;
    log::info!("{} highlight ranges", set.len());
    print_json(&set, pretty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_region() {
        let range = parse_region("chr1:1,000-2,000").unwrap();
        assert_eq!(range, GenomicRange::new("1", 1000, 2000));

        let err = parse_region("chr1").unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Parse { .. })));
    }
}
