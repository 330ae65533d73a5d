use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

// Audio Front End Parameters
pub const TARGET_SAMPLE_RATE: u32 = 16_000;
pub const WINDOW_SIZE: usize = 2048;
pub const HOP_SIZE: usize = 512;

// Peak Detection Parameters
/// (min Hz, max Hz) per detection band. Content above 6400 Hz is never searched.
pub const FREQUENCY_BANDS: [(f64, f64); 6] = [
    (0.0, 200.0),
    (200.0, 400.0),
    (400.0, 800.0),
    (800.0, 1600.0),
    (1600.0, 3200.0),
    (3200.0, 6400.0),
];
pub const FLATNESS_NOISE_THRESHOLD: f64 = 0.8;
pub const FLATNESS_NOISE_MULTIPLIER: f64 = 1.5;
pub const BAND_MAX_FLOOR_RATIO: f64 = 0.15;
pub const MIN_NEIGHBORHOOD: usize = 3;
pub const MAX_NEIGHBORHOOD: usize = 10;
pub const MIN_PEAKS_PER_BAND: usize = 2;

// Hashing Parameters
pub const TIME_BUCKET_SECS: f64 = 0.03;
pub const TIME_BUCKETS: u16 = 100;
pub const FREQ_RATIO_BUCKETS: u16 = 100;
pub const MIN_FREQ_RATIO: f64 = 0.25;
pub const MAX_FREQ_RATIO: f64 = 4.0;
pub const LOG_RATIO_RANGE: f64 = 1.4;
pub const MEL_BAND_WIDTH: f64 = 80.0;
pub const MEL_BANDS: u8 = 50;
pub const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

// Matching Parameters
pub const MIN_MATCH_PAIRS: usize = 3;
pub const MAX_HASHES_PER_ENTRY: usize = 50;
pub const MAX_REFS_PER_HASH: usize = 20;
pub const MAX_MATCH_PAIRS: usize = 50_000;
pub const MAX_HASH_OCCURRENCES: usize = 30;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;
pub const DEFAULT_REGION_SIZE_SECS: i64 = 10;
pub const DEFAULT_TOP_CANDIDATES: usize = 3;
pub const LEGACY_REGION_SIZE_SECS: i64 = 30;
pub const LEGACY_TOP_CANDIDATES: usize = 5;

// Diagnostics Parameters
pub const DIAGNOSTIC_MAX_HASH_OCCURRENCE: usize = 15;
pub const DIAGNOSTIC_TOP_OFFSETS: usize = 10;
pub const LOW_MATCH_RATE: f64 = 0.1;
pub const DISPERSED_CONCENTRATION: f64 = 0.3;
pub const GOOD_CONCENTRATION: f64 = 0.7;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration loaded from a TOML file.
/// Every section is optional and falls back to the constants above.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub peaks: PeakConfig,
    pub pairing: PairingConfig,
    pub matching: MatchConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub window_size: usize,
    pub hop_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            window_size: WINDOW_SIZE,
            hop_size: HOP_SIZE,
        }
    }
}

/// Tuning knobs for per-frame peak detection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Standard deviations above the band mean a bin must reach.
    pub peak_threshold_multiplier: f64,
    /// Base half-width of the local-maximum window, in bins.
    pub peak_neighborhood_size: usize,
    /// Peak budget per frame, split evenly over the bands.
    pub max_peaks_per_frame: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            peak_threshold_multiplier: 1.5,
            peak_neighborhood_size: 5,
            max_peaks_per_frame: 30,
        }
    }
}

/// How peaks are paired into anchor/target hashes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    pub fan_out: usize,
    pub min_time_delta: f64,
    pub max_time_delta: f64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            fan_out: 5,
            min_time_delta: TIME_BUCKET_SECS,
            max_time_delta: TIME_BUCKET_SECS * TIME_BUCKETS as f64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub min_confidence: f64,
    pub max_hashes_per_entry: usize,
    pub max_refs_per_hash: usize,
    pub max_pairs: usize,
    /// Hashes occurring more often than this in the reference are ignored
    /// by the coarse-to-fine matcher.
    pub max_hash_occurrences: usize,
    pub region_size_secs: i64,
    pub top_candidates: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_hashes_per_entry: MAX_HASHES_PER_ENTRY,
            max_refs_per_hash: MAX_REFS_PER_HASH,
            max_pairs: MAX_MATCH_PAIRS,
            max_hash_occurrences: MAX_HASH_OCCURRENCES,
            region_size_secs: DEFAULT_REGION_SIZE_SECS,
            top_candidates: DEFAULT_TOP_CANDIDATES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Stricter than `MatchConfig::max_hash_occurrences` on purpose.
    pub max_hash_occurrence: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            max_hash_occurrence: DIAGNOSTIC_MAX_HASH_OCCURRENCE,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file, failing on any I/O, parse or validation error.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load config from `path` if given.
    /// Returns the default config when no path is given or the file is missing.
    /// Logs a warning if the file exists but can't be used.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(path) if path.exists() => match Self::from_file(path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to load {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Some(path) => {
                log::warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => {
                log::debug!("No config file given, using defaults");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be > 0".into()));
        }
        if self.audio.window_size < 2 {
            return Err(ConfigError::Invalid("audio.window_size must be >= 2".into()));
        }
        if self.audio.hop_size == 0 {
            return Err(ConfigError::Invalid("audio.hop_size must be > 0".into()));
        }
        if self.peaks.peak_neighborhood_size == 0 {
            return Err(ConfigError::Invalid(
                "peaks.peak_neighborhood_size must be >= 1".into(),
            ));
        }
        if self.pairing.max_time_delta < self.pairing.min_time_delta {
            return Err(ConfigError::Invalid(
                "pairing.max_time_delta must be >= pairing.min_time_delta".into(),
            ));
        }
        if self.matching.region_size_secs <= 0 {
            return Err(ConfigError::Invalid(
                "matching.region_size_secs must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.matching.min_confidence) {
            return Err(ConfigError::Invalid(
                "matching.min_confidence must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}
