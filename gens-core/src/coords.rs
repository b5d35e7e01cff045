//! Coordinate systems, genomic ranges and chromosome sizes

use crate::error::{TrackError, TrackResult};
use crate::types::{GenomicPos, TileIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Half-open `[start, end)` range on one chromosome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenomicRange {
    pub chromosome: String,
    pub start: GenomicPos,
    pub end: GenomicPos,
}

impl GenomicRange {
    /// Create a range without validation; the chromosome name is normalized.
    pub fn new(chromosome: &str, start: GenomicPos, end: GenomicPos) -> Self {
        Self {
            chromosome: normalize_chromosome(chromosome),
            start,
            end,
        }
    }

    /// Create a range and check it against the chromosome length.
    pub fn validated(
        chromosome: &str,
        start: GenomicPos,
        end: GenomicPos,
        sizes: &dyn ChromosomeSizes,
    ) -> TrackResult<Self> {
        let range = Self::new(chromosome, start, end);
        range.validate(sizes)?;
        Ok(range)
    }

    pub fn validate(&self, sizes: &dyn ChromosomeSizes) -> TrackResult<()> {
        let length = sizes.length(&self.chromosome).ok_or_else(|| {
            TrackError::out_of_bounds(format!("Unknown chromosome: {}", self.chromosome))
        })?;
        if self.start > self.end {
            return Err(TrackError::out_of_bounds(format!(
                "Start {} is after end {}",
                self.start, self.end
            )));
        }
        if self.end > length {
            return Err(TrackError::out_of_bounds(format!(
                "{} exceeds chromosome {} length {}",
                self, self.chromosome, length
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> GenomicPos {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps_interval(&self, start: GenomicPos, end: GenomicPos) -> bool {
        self.start < end && start < self.end
    }

    pub fn overlaps(&self, other: &GenomicRange) -> bool {
        self.chromosome == other.chromosome && self.overlaps_interval(other.start, other.end)
    }

    pub fn contains(&self, pos: GenomicPos) -> bool {
        pos >= self.start && pos < self.end
    }

    pub fn contains_range(&self, other: &GenomicRange) -> bool {
        self.chromosome == other.chromosome && other.start >= self.start && other.end <= self.end
    }

    /// Intersection with `[start, end)`; `None` when empty.
    pub fn intersect_interval(&self, start: GenomicPos, end: GenomicPos) -> Option<GenomicRange> {
        let lo = self.start.max(start);
        let hi = self.end.min(end);
        if lo < hi {
            Some(GenomicRange {
                chromosome: self.chromosome.clone(),
                start: lo,
                end: hi,
            })
        } else {
            None
        }
    }

    pub fn intersect(&self, other: &GenomicRange) -> Option<GenomicRange> {
        if self.chromosome != other.chromosome {
            return None;
        }
        self.intersect_interval(other.start, other.end)
    }

    /// Clamp a position into the range (the last base for non-empty ranges).
    pub fn clamp(&self, pos: GenomicPos) -> GenomicPos {
        pos.max(self.start).min(self.end.saturating_sub(1).max(self.start))
    }
}

impl fmt::Display for GenomicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chromosome, self.start, self.end)
    }
}

impl FromStr for GenomicRange {
    type Err = TrackError;

    /// Parse `chr1:1000-2000`; `_` and `,` digit separators are allowed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chrom, span) = s
            .split_once(':')
            .ok_or_else(|| TrackError::out_of_bounds(format!("Region must be chrom:start-end, got {}", s)))?;
        let (start, end) = span
            .split_once('-')
            .ok_or_else(|| TrackError::out_of_bounds(format!("Region must be chrom:start-end, got {}", s)))?;
        let parse = |v: &str| -> TrackResult<GenomicPos> {
            let cleaned: String = v.chars().filter(|c| *c != ',' && *c != '_').collect();
            cleaned
                .trim()
                .parse::<GenomicPos>()
                .map_err(|e| TrackError::out_of_bounds(format!("Invalid position {}: {}", v, e)))
        };
        Ok(GenomicRange::new(chrom.trim(), parse(start)?, parse(end)?))
    }
}

/// Strip a leading `chr` so `chr1` and `1` address the same chromosome.
pub fn normalize_chromosome(name: &str) -> String {
    let trimmed = name.trim();
    let stripped = trimmed
        .strip_prefix("chr")
        .or_else(|| trimmed.strip_prefix("CHR"))
        .or_else(|| trimmed.strip_prefix("Chr"))
        .unwrap_or(trimmed);
    match stripped {
        "x" => "X".to_string(),
        "y" => "Y".to_string(),
        "m" | "MT" | "mt" => "M".to_string(),
        other => other.to_string(),
    }
}

/// Tile containing `pos` for a given tile size
pub fn tile_index(pos: GenomicPos, tile_size: GenomicPos) -> TileIndex {
    if tile_size == 0 {
        0
    } else {
        pos / tile_size
    }
}

/// `[start, end)` covered by a tile
pub fn tile_bounds(tile: TileIndex, tile_size: GenomicPos) -> (GenomicPos, GenomicPos) {
    let start = tile.saturating_mul(tile_size);
    (start, start.saturating_add(tile_size))
}

/// Inclusive tile index span overlapping `[start, end)`; `None` for an empty span.
pub fn tiles_covering(
    start: GenomicPos,
    end: GenomicPos,
    tile_size: GenomicPos,
) -> Option<(TileIndex, TileIndex)> {
    if start >= end || tile_size == 0 {
        return None;
    }
    Some((tile_index(start, tile_size), tile_index(end - 1, tile_size)))
}

pub fn align_down(pos: GenomicPos, width: GenomicPos) -> GenomicPos {
    if width == 0 {
        pos
    } else {
        pos - pos % width
    }
}

pub fn align_up(pos: GenomicPos, width: GenomicPos) -> GenomicPos {
    if width == 0 {
        return pos;
    }
    match pos % width {
        0 => pos,
        rem => pos.saturating_add(width - rem),
    }
}

/// Chromosome metadata provider
pub trait ChromosomeSizes: Send + Sync {
    fn length(&self, chromosome: &str) -> Option<GenomicPos>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContigInfo {
    pub id: u32,
    pub name: String,
    pub length: GenomicPos,
}

/// An explicit list of chromosomes and their lengths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenomeInfo {
    pub contigs: Vec<ContigInfo>,
    pub contig_map: HashMap<String, u32>,
}

impl GenomeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_contig(&mut self, name: &str, length: GenomicPos) -> u32 {
        let name = normalize_chromosome(name);
        if let Some(&id) = self.contig_map.get(&name) {
            self.contigs[id as usize].length = length;
            return id;
        }
        let id = self.contigs.len() as u32;
        self.contigs.push(ContigInfo {
            id,
            name: name.clone(),
            length,
        });
        self.contig_map.insert(name, id);
        id
    }

    pub fn with_contig(mut self, name: &str, length: GenomicPos) -> Self {
        self.add_contig(name, length);
        self
    }

    pub fn get_contig_by_name(&self, name: &str) -> Option<&ContigInfo> {
        self.contig_map
            .get(&normalize_chromosome(name))
            .and_then(|&id| self.contigs.get(id as usize))
    }

    pub fn total_length(&self) -> GenomicPos {
        self.contigs.iter().map(|c| c.length).sum()
    }
}

impl ChromosomeSizes for GenomeInfo {
    fn length(&self, chromosome: &str) -> Option<GenomicPos> {
        self.get_contig_by_name(chromosome).map(|c| c.length)
    }
}

/// Reference assemblies with built-in primary chromosome lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenomeBuild {
    #[serde(alias = "37", alias = "grch37")]
    Hg19,
    #[serde(alias = "38", alias = "grch38")]
    Hg38,
}

const HG19_LENGTHS: [(&str, GenomicPos); 24] = [
    ("1", 249_250_621),
    ("2", 243_199_373),
    ("3", 198_022_430),
    ("4", 191_154_276),
    ("5", 180_915_260),
    ("6", 171_115_067),
    ("7", 159_138_663),
    ("8", 146_364_022),
    ("9", 141_213_431),
    ("10", 135_534_747),
    ("11", 135_006_516),
    ("12", 133_851_895),
    ("13", 115_169_878),
    ("14", 107_349_540),
    ("15", 102_531_392),
    ("16", 90_354_753),
    ("17", 81_195_210),
    ("18", 78_077_248),
    ("19", 59_128_983),
    ("20", 63_025_520),
    ("21", 48_129_895),
    ("22", 51_304_566),
    ("X", 155_270_560),
    ("Y", 59_373_566),
];

const HG38_LENGTHS: [(&str, GenomicPos); 24] = [
    ("1", 248_956_422),
    ("2", 242_193_529),
    ("3", 198_295_559),
    ("4", 190_214_555),
    ("5", 181_538_259),
    ("6", 170_805_979),
    ("7", 159_345_973),
    ("8", 145_138_636),
    ("9", 138_394_717),
    ("10", 133_797_422),
    ("11", 135_086_622),
    ("12", 133_275_309),
    ("13", 114_364_328),
    ("14", 107_043_718),
    ("15", 101_991_189),
    ("16", 90_338_345),
    ("17", 83_257_441),
    ("18", 80_373_285),
    ("19", 58_617_616),
    ("20", 64_444_167),
    ("21", 46_709_983),
    ("22", 50_818_468),
    ("X", 156_040_895),
    ("Y", 57_227_415),
];

impl GenomeBuild {
    fn table(&self) -> &'static [(&'static str, GenomicPos)] {
        match self {
            GenomeBuild::Hg19 => &HG19_LENGTHS,
            GenomeBuild::Hg38 => &HG38_LENGTHS,
        }
    }

    pub fn chromosomes(&self) -> impl Iterator<Item = &'static str> {
        self.table().iter().map(|(name, _)| *name)
    }

    pub fn genome_info(&self) -> GenomeInfo {
        self.table()
            .iter()
            .fold(GenomeInfo::new(), |genome, (name, len)| genome.with_contig(name, *len))
    }
}

impl ChromosomeSizes for GenomeBuild {
    fn length(&self, chromosome: &str) -> Option<GenomicPos> {
        let name = normalize_chromosome(chromosome);
        self.table()
            .iter()
            .find(|(chrom, _)| *chrom == name)
            .map(|(_, len)| *len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_chromosome() {
        assert_eq!(normalize_chromosome("chr1"), "1");
        assert_eq!(normalize_chromosome("1"), "1");
        assert_eq!(normalize_chromosome("chrx"), "X");
        assert_eq!(normalize_chromosome("chrMT"), "M");
    }

    #[test]
    fn test_validate_bounds() {
        let genome = GenomeBuild::Hg38;
        assert!(GenomicRange::validated("chr1", 1_000_000, 2_000_000, &genome).is_ok());
        assert!(GenomicRange::validated("chr1", 0, 248_956_422, &genome).is_ok());

        let err = GenomicRange::validated("chr1", 0, 248_956_423, &genome).unwrap_err();
        assert!(matches!(err, TrackError::OutOfBounds { .. }));

        let err = GenomicRange::validated("chr1", 200, 100, &genome).unwrap_err();
        assert!(matches!(err, TrackError::OutOfBounds { .. }));

        let err = GenomicRange::validated("chr99", 0, 10, &genome).unwrap_err();
        assert!(matches!(err, TrackError::OutOfBounds { .. }));
    }

    #[test]
    fn test_intersection_and_containment() {
        let a = GenomicRange::new("1", 100, 200);
        let b = GenomicRange::new("chr1", 150, 300);
        assert_eq!(a.intersect(&b), Some(GenomicRange::new("1", 150, 200)));
        assert!(a.overlaps(&b));
        assert!(a.intersect(&GenomicRange::new("1", 200, 300)).is_none());
        assert!(a.intersect(&GenomicRange::new("2", 100, 200)).is_none());
        assert!(a.contains(100));
        assert!(!a.contains(200));
        assert!(a.contains_range(&GenomicRange::new("1", 120, 200)));
        assert_eq!(a.clamp(50), 100);
        assert_eq!(a.clamp(250), 199);
    }

    #[test]
    fn test_tile_arithmetic() {
        assert_eq!(tile_index(0, 256), 0);
        assert_eq!(tile_index(255, 256), 0);
        assert_eq!(tile_index(256, 256), 1);
        assert_eq!(tile_bounds(2, 256), (512, 768));
        assert_eq!(tiles_covering(100, 600, 256), Some((0, 2)));
        assert_eq!(tiles_covering(256, 512, 256), Some((1, 1)));
        assert_eq!(tiles_covering(10, 10, 256), None);
        assert_eq!(align_down(1023, 512), 512);
        assert_eq!(align_up(1025, 512), 1536);
        assert_eq!(align_up(1024, 512), 1024);
    }

    #[test]
    fn test_parse_region() {
        let range: GenomicRange = "chr2:1,000-2_000".parse().unwrap();
        assert_eq!(range, GenomicRange::new("2", 1000, 2000));
        assert!("chr2".parse::<GenomicRange>().is_err());
        assert!("chr2:abc-10".parse::<GenomicRange>().is_err());
    }

    #[test]
    fn test_genome_builds() {
        assert_eq!(GenomeBuild::Hg38.length("chr1"), Some(248_956_422));
        assert_eq!(GenomeBuild::Hg19.length("X"), Some(155_270_560));
        assert_eq!(GenomeBuild::Hg38.chromosomes().count(), 24);
        let info = GenomeBuild::Hg38.genome_info();
        assert_eq!(info.length("chr22"), Some(50_818_468));
    }

    #[test]
    fn test_genome_info_replaces_length() {
        let mut genome = GenomeInfo::new();
        let id = genome.add_contig("chr3", 1000);
        assert_eq!(genome.add_contig("3", 2000), id);
        assert_eq!(genome.length("3"), Some(2000));
        assert_eq!(genome.total_length(), 2000);
    }
}
