//! src/dataloader/config.rs
//!
//! Configuration for loader behaviour
//!
//! The `LoaderConfig` struct stores the parameters that control how a dataset
//! is enumerated and prefetched. It can be built in code or parsed from JSON,
//! where durations are given in milliseconds and a negative
//! `nr_samples_to_read` means "read everything".
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .dataset_path("/data/vol_ref")
//!     .shuffle(true)
//!     .nr_samples_to_skip(10)
//!     .buffer_capacity(8)
//!     .build();
//! ```
//!
//! ```json
//! { "dataset_path": "/data/vol_ref", "shuffle": true, "nr_samples_to_read": -1 }
//! ```

use crate::error::{LoaderError, Result};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Dataset split a loader reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Train,
    Test,
    #[serde(alias = "val")]
    Validation,
}

impl Mode {
    /// Directory name used by datasets with per-split subdirectories.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Test => "test",
            Mode::Validation => "val",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Restrictions applied while enumerating samples.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Filters {
    /// Read only the scene at this position (scene-scoped datasets)
    pub restrict_to_scene: Option<usize>,
    /// Read only this object class (e.g. "chair")
    pub object_name: Option<String>,
    /// Read only this sequence (e.g. "08")
    pub sequence: Option<String>,
    /// Keep every n-th identifier of the sorted scan (1 = keep all)
    pub subsample_factor: usize,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            restrict_to_scene: None,
            object_name: None,
            sequence: None,
            subsample_factor: 1,
        }
    }
}

/// Configuration for a `DataLoader`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Root directory of the dataset
    pub dataset_path: PathBuf,
    /// Start the prefetch worker on construction
    pub autostart: bool,
    /// Shuffle the index; each reset reshuffles with the reset count as seed
    pub shuffle: bool,
    /// Serve the first sample over and over (debugging)
    #[serde(alias = "do_overfit")]
    pub overfit: bool,
    /// Split to read
    pub mode: Mode,
    /// Identifiers to skip after ordering
    pub nr_samples_to_skip: usize,
    /// Maximum identifiers to read after skipping (None = all)
    #[serde(deserialize_with = "read_limit")]
    pub nr_samples_to_read: Option<usize>,
    /// Base seed added to the reset count for every shuffle
    pub seed: u64,
    /// Capacity of the prefetch buffer; one slot is always left free
    pub buffer_capacity: usize,
    /// How often an idle worker (epoch exhausted) checks for work or shutdown.
    #[serde(rename = "poll_interval_ms", deserialize_with = "millis")]
    pub poll_interval: Duration,
    /// Sleep between push attempts while the buffer is full.
    #[serde(rename = "backoff_interval_ms", deserialize_with = "millis")]
    pub backoff_interval: Duration,
    /// Enumeration filters
    pub filters: Filters,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::new(),
            autostart: false,
            shuffle: false,
            overfit: false,
            mode: Mode::Train,
            nr_samples_to_skip: 0,
            nr_samples_to_read: None,
            seed: 0,
            buffer_capacity: crate::DEFAULT_BUFFER_CAPACITY,
            poll_interval: Duration::from_millis(100),
            backoff_interval: Duration::from_millis(1),
            filters: Filters::default(),
        }
    }
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// Parses a JSON document; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity < 2 {
            return Err(LoaderError::InvalidConfig {
                reason: format!(
                    "buffer_capacity must be >= 2 (one slot is kept free), got {}",
                    self.buffer_capacity
                ),
            });
        }
        if self.filters.subsample_factor == 0 {
            return Err(LoaderError::InvalidConfig {
                reason: "subsample_factor must be >= 1".into(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(LoaderError::InvalidConfig {
                reason: "poll_interval must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// Builder for LoaderConfig with method chaining
#[derive(Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    pub fn dataset_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dataset_path = path.into();
        self
    }

    pub fn autostart(mut self, autostart: bool) -> Self {
        self.config.autostart = autostart;
        self
    }

    /// Set whether to shuffle the index every epoch
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    pub fn overfit(mut self, overfit: bool) -> Self {
        self.config.overfit = overfit;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn nr_samples_to_skip(mut self, skip: usize) -> Self {
        self.config.nr_samples_to_skip = skip;
        self
    }

    pub fn nr_samples_to_read(mut self, limit: usize) -> Self {
        self.config.nr_samples_to_read = Some(limit);
        self
    }

    /// Set the base seed for reproducible shuffling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set the buffer capacity.
    /// Higher values smooth out slow decodes but hold more samples in memory.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    /// Set the idle polling interval
    ///
    /// - Too low: More responsive shutdown, higher CPU usage.
    /// - Too high: Less CPU overhead, slower shutdown and reset response
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn backoff_interval(mut self, interval: Duration) -> Self {
        self.config.backoff_interval = interval;
        self
    }

    pub fn restrict_to_scene(mut self, scene: usize) -> Self {
        self.config.filters.restrict_to_scene = Some(scene);
        self
    }

    pub fn object_name(mut self, name: impl Into<String>) -> Self {
        self.config.filters.object_name = Some(name.into());
        self
    }

    pub fn sequence(mut self, sequence: impl Into<String>) -> Self {
        self.config.filters.sequence = Some(sequence.into());
        self
    }

    pub fn subsample_factor(mut self, factor: usize) -> Self {
        self.config.filters.subsample_factor = factor;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn read_limit<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<usize>, D::Error> {
    let limit = Option::<i64>::deserialize(deserializer)?;
    Ok(limit.and_then(|n| usize::try_from(n).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.buffer_capacity, crate::DEFAULT_BUFFER_CAPACITY);
        assert_eq!(config.mode, Mode::Train);
        assert_eq!(config.filters.subsample_factor, 1);
        assert!(config.nr_samples_to_read.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json() -> Result<()> {
        let config = LoaderConfig::from_json_str(
            r#"{
                "dataset_path": "/data/vol_ref",
                "autostart": false,
                "do_overfit": true,
                "mode": "val",
                "nr_samples_to_skip": 3,
                "nr_samples_to_read": -1,
                "poll_interval_ms": 20,
                "filters": { "sequence": "08" }
            }"#,
        )?;
        assert_eq!(config.dataset_path, PathBuf::from("/data/vol_ref"));
        assert!(config.overfit);
        assert_eq!(config.mode, Mode::Validation);
        assert_eq!(config.nr_samples_to_skip, 3);
        assert_eq!(config.nr_samples_to_read, None);
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.filters.sequence.as_deref(), Some("08"));
        assert_eq!(config.filters.subsample_factor, 1);

        let limited = LoaderConfig::from_json_str(r#"{ "nr_samples_to_read": 12 }"#)?;
        assert_eq!(limited.nr_samples_to_read, Some(12));
        Ok(())
    }

    #[test]
    fn test_validation_rejects_tiny_buffer() {
        let config = LoaderConfig::builder().buffer_capacity(1).build();
        assert!(matches!(
            config.validate(),
            Err(LoaderError::InvalidConfig { .. })
        ));
        assert!(matches!(
            LoaderConfig::from_json_str(r#"{ "buffer_capacity": 0 }"#),
            Err(LoaderError::InvalidConfig { .. })
        ));
        assert!(matches!(
            LoaderConfig::from_json_str("{ not json"),
            Err(LoaderError::Config(_))
        ));
    }
}
