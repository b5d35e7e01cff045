//! Precomputed whole-sample overview documents
//!
//! The document maps each chromosome to `cov` and `baf` lists of
//! `[position, value]` pairs. Files may be gzip-compressed.

use crate::coords::normalize_chromosome;
use crate::error::{TrackError, TrackResult};
use crate::types::{GenomicPos, ScatterRecord};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverviewChromosome {
    #[serde(default)]
    pub cov: Vec<(GenomicPos, f64)>,
    #[serde(default)]
    pub baf: Vec<(GenomicPos, f64)>,
}

impl OverviewChromosome {
    fn records(points: &[(GenomicPos, f64)]) -> Vec<ScatterRecord> {
        let mut records: Vec<ScatterRecord> = points
            .iter()
            .map(|&(position, value)| ScatterRecord { position, value })
            .collect();
        records.sort_by_key(|r| r.position);
        records
    }

    pub fn coverage_records(&self) -> Vec<ScatterRecord> {
        Self::records(&self.cov)
    }

    pub fn baf_records(&self) -> Vec<ScatterRecord> {
        Self::records(&self.baf)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverviewDocument {
    pub chromosomes: BTreeMap<String, OverviewChromosome>,
}

impl OverviewDocument {
    pub fn from_json_slice(bytes: &[u8]) -> TrackResult<Self> {
        let raw: BTreeMap<String, OverviewChromosome> = serde_json::from_slice(bytes)
            .map_err(|e| TrackError::overview(format!("Invalid overview JSON: {}", e)))?;
        Ok(Self {
            chromosomes: raw
                .into_iter()
                .map(|(chrom, data)| (normalize_chromosome(&chrom), data))
                .collect(),
        })
    }

    /// Read a plain or gzip-compressed document.
    pub fn from_reader<R: Read>(reader: R) -> TrackResult<Self> {
        let mut bytes = Vec::new();
        let mut reader = BufReader::new(reader);
        reader.read_to_end(&mut bytes)?;
        if bytes.starts_with(&GZIP_MAGIC) {
            let mut decoded = Vec::new();
            GzDecoder::new(bytes.as_slice())
                .read_to_end(&mut decoded)
                .map_err(|e| TrackError::overview(format!("Invalid gzip stream: {}", e)))?;
            bytes = decoded;
        }
        Self::from_json_slice(&bytes)
    }

    pub fn from_path(path: &Path) -> TrackResult<Self> {
        let file = File::open(path).map_err(|e| {
            TrackError::overview(format!("Cannot open overview file {}: {}", path.display(), e))
        })?;
        log::info!("Loading overview from {}", path.display());
        Self::from_reader(file)
    }

    pub fn chromosome(&self, name: &str) -> Option<&OverviewChromosome> {
        self.chromosomes.get(&normalize_chromosome(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const DOC: &str = r#"{"chr1": {"cov": [[300, 0.5], [100, -0.2]], "baf": [[150, 0.48]]}, "X": {"cov": []}}"#;

    #[test]
    fn test_parse_plain_json() {
        let doc = OverviewDocument::from_json_slice(DOC.as_bytes()).unwrap();
        let chrom = doc.chromosome("1").unwrap();
        let cov = chrom.coverage_records();
        assert_eq!(cov[0], ScatterRecord { position: 100, value: -0.2 });
        assert_eq!(cov[1].position, 300);
        assert_eq!(chrom.baf_records().len(), 1);
        assert!(doc.chromosome("chrX").unwrap().baf.is_empty());
        assert!(doc.chromosome("2").is_none());
    }

    #[test]
    fn test_parse_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(DOC.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let doc = OverviewDocument::from_reader(compressed.as_slice()).unwrap();
        assert_eq!(doc.chromosomes.len(), 2);
    }

    #[test]
    fn test_malformed_document() {
        let err = OverviewDocument::from_json_slice(b"{\"1\": {\"cov\": [[1]]}}").unwrap_err();
        assert!(matches!(err, TrackError::Overview { .. }));
    }
}
