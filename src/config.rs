use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::analyzer::key::KeyMethod;
use crate::fingerprint::FingerprintMatcher;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to scan when a command gets no paths.
    pub music_dirs: Vec<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    pub analysis: AnalysisConfig,
    pub duplicates: DuplicateConfig,
    pub similarity: SimilarityConfig,
    pub organizer: OrganizerConfig,
}

/// Decode rates and windows for audio analysis.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rate tempo and key detection run at.
    pub sample_rate: u32,
    /// Seconds decoded from the start of a file for tempo and key.
    pub window_secs: f64,
    pub fingerprint_sample_rate: u32,
    pub fingerprint_window_secs: f64,
    /// Per-file limit in seconds. 0 disables the limit.
    pub timeout_secs: u64,
    pub key_method: KeyMethod,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            window_secs: 30.0,
            fingerprint_sample_rate: 11025,
            fingerprint_window_secs: 60.0,
            timeout_secs: 30,
            key_method: KeyMethod::Chroma,
        }
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Fingerprint similarity a pair must exceed.
    pub threshold: f64,
    /// Fingerprint alignments tried in each direction, in 200 ms windows.
    pub max_offset: usize,
    /// Width of the file-size buckets fingerprinting is limited to.
    pub size_bucket_mib: f64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            max_offset: 10,
            size_bucket_mib: 0.5,
        }
    }
}

impl DuplicateConfig {
    pub fn matcher(&self) -> FingerprintMatcher {
        FingerprintMatcher::new(self.max_offset, self.threshold)
    }
}

/// Relative weight of each signal. Need not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    pub bpm: f64,
    pub key: f64,
    pub genre: f64,
    pub year: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            bpm: 0.4,
            key: 0.4,
            genre: 0.1,
            year: 0.1,
        }
    }
}

/// Sub-score a signal must exceed to be flagged as a match.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    pub bpm: f64,
    pub key: f64,
    pub genre: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            bpm: 0.8,
            key: 0.6,
            genre: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub weights: SimilarityWeights,
    pub thresholds: MatchThresholds,
    /// Results must score strictly above this (0-100).
    pub min_score: f64,
    pub max_results: usize,
    /// Relative BPM deviation at which the BPM sub-score reaches 0.
    pub bpm_tolerance: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            weights: SimilarityWeights::default(),
            thresholds: MatchThresholds::default(),
            min_score: 30.0,
            max_results: 50,
            bpm_tolerance: 0.15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrganizerConfig {
    /// Folder pattern, e.g. `[artist]/[album]/[trackNumber] - [title]`.
    pub pattern: String,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            pattern: crate::organizer::DEFAULT_PATTERN.to_string(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/cratedig/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("{}. Using defaults.", e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load an explicit config file. Errors are returned, not defaulted.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
