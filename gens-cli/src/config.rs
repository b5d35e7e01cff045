//! Configuration handling for the Gens CLI
//!
//! Supports loading configuration from gens.toml files with CLI argument overrides.

use anyhow::{Context, Result};
use gens_core::{CacheConfig, EngineConfig, GenomeBuild, LadderConfig, TrackKind};
use gens_core::config::TrackSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub ladder: LadderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tracks: TrackSettings,
    #[serde(default)]
    pub samples: Vec<SampleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default number of threads to use
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Reference assembly used to validate coordinates
    #[serde(default = "default_genome_build")]
    pub genome_build: GenomeBuild,

    /// Default viewport width in points
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u64,
}

/// Track files of one sample; any subset may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleConfig {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baf: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genes: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<PathBuf>,

    /// Precomputed overview document (`.json` or `.json.gz`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<PathBuf>,
}

impl SampleConfig {
    /// Row-based track files in load order
    pub fn track_files(&self) -> Vec<(TrackKind, &Path)> {
        [
            (TrackKind::Coverage, &self.coverage),
            (TrackKind::Baf, &self.baf),
            (TrackKind::Gene, &self.genes),
            (TrackKind::Variant, &self.variants),
            (TrackKind::SampleAnnotation, &self.annotations),
        ]
        .into_iter()
        .filter_map(|(kind, path)| path.as_deref().map(|p| (kind, p)))
        .collect()
    }
}

// Default value functions
fn default_threads() -> usize { num_cpus::get() }
fn default_genome_build() -> GenomeBuild { GenomeBuild::Hg38 }
fn default_viewport_width() -> u64 { 1920 }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            genome_build: default_genome_build(),
            viewport_width: default_viewport_width(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            ladder: LadderConfig::default(),
            cache: CacheConfig::default(),
            tracks: TrackSettings::default(),
            samples: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(path)?
            }
            None => {
                // Try to find gens.toml in current directory
                let default_path = PathBuf::from("gens.toml");
                if default_path.exists() {
                    log::info!("Loading configuration from: gens.toml");
                    Self::load_from_file(&default_path)?
                } else {
                    log::info!("Using default configuration");
                    Self::default()
                }
            }
        };

        Ok(config)
    }

    /// Load configuration from a specific TOML file
    ///
    /// Relative sample paths are resolved against the file's directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config
            .engine()
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// Generate example configuration file content
    pub fn example_toml() -> Result<String> {
        let mut config = Self::default();
        config.samples.push(SampleConfig {
            id: "sample-1".to_string(),
            case_id: Some("case-1".to_string()),
            coverage: Some(PathBuf::from("sample-1.cov.bed.gz")),
            baf: Some(PathBuf::from("sample-1.baf.bed.gz")),
            overview: Some(PathBuf::from("sample-1.overview.json.gz")),
            ..SampleConfig::default()
        });
        toml::to_string_pretty(&config).context("Failed to serialize default configuration")
    }

    /// Engine-facing part of the configuration
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            ladder: self.ladder.clone(),
            cache: self.cache.clone(),
            tracks: self.tracks.clone(),
        }
    }

    pub fn sample(&self, id: &str) -> Option<&SampleConfig> {
        self.samples.iter().find(|s| s.id == id)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut Option<PathBuf>| {
            if let Some(p) = path {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            }
        };
        for sample in &mut self.samples {
            resolve(&mut sample.coverage);
            resolve(&mut sample.baf);
            resolve(&mut sample.genes);
            resolve(&mut sample.variants);
            resolve(&mut sample.annotations);
            resolve(&mut sample.overview);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gens_core::Statistic;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.genome_build, GenomeBuild::Hg38);
        assert_eq!(config.ladder.growth_factor, 4);
        assert_eq!(config.tracks.coverage.statistic, Statistic::Median);
        assert!(config.samples.is_empty());
    }

    #[test]
    fn test_config_roundtrip() -> Result<()> {
        let mut config = Config::default();
        config.cache.max_bytes = 1024;
        config.samples.push(SampleConfig {
            id: "S1".to_string(),
            coverage: Some(PathBuf::from("/data/s1.cov.bed")),
            ..SampleConfig::default()
        });
        let temp_file = NamedTempFile::new()?;

        config.save_to_file(temp_file.path())?;
        let loaded_config = Config::load_from_file(temp_file.path())?;

        assert_eq!(loaded_config.cache.max_bytes, 1024);
        assert_eq!(loaded_config.samples, config.samples);
        assert_eq!(loaded_config.engine(), config.engine());

        Ok(())
    }

    #[test]
    fn test_partial_config_uses_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[ladder]\npoints_per_tile = 128\n")?;
        writeln!(file, "[tracks.baf]\nstatistic = \"mean\"\nnormal_range = [0.1, 0.9]\n")?;
        writeln!(file, "[[samples]]\nid = \"S1\"\ncoverage = \"s1.cov.bed\"")?;

        let config = Config::load_from_file(file.path())?;
        assert_eq!(config.ladder.points_per_tile, 128);
        assert_eq!(config.ladder.levels, 14);
        assert_eq!(config.tracks.baf.statistic, Statistic::Mean);
        assert_eq!(config.tracks.coverage.normal_range, (-3.0, 3.0));

        let sample = config.sample("S1").unwrap();
        let (kind, path) = sample.track_files()[0];
        assert_eq!(kind, TrackKind::Coverage);
        assert!(path.is_absolute());
        Ok(())
    }

    #[test]
    fn test_invalid_engine_config_is_rejected() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[ladder]\ngrowth_factor = 1")?;
        assert!(Config::load_from_file(file.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_example_toml_generation() -> Result<()> {
        let example = Config::example_toml()?;
        assert!(example.contains("[ladder]"));
        assert!(example.contains("[cache]"));
        assert!(example.contains("[[samples]]"));
        Ok(())
    }
}
