//! Replay configuration.

use std::path::{Path, PathBuf};

use graphrepro_core::{AccuracyMode, ACCELERATOR_PREFIXES};
use graphrepro_minimizer::MinifierConfig;
use graphrepro_report::EntryPoint;

use crate::error::{ReproError, Result};

/// Options for one replay, fixed before any work starts.
///
/// | Field                             | Default |
/// |-----------------------------------|---------|
/// | `save_dir`                        | none    |
/// | `device`                          | `"cpu"` |
/// | `accuracy`                        | off     |
/// | `check_str`                       | none    |
/// | `offload_to_disk`                 | false   |
/// | `skip_saving_eager_intermediates` | false   |
/// | `skip_sanity`                     | false   |
/// | `max_granularity`                 | none    |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Where storage files are read from and checkpoints are written to.
    pub save_dir: Option<PathBuf>,
    pub device: String,
    pub accuracy: AccuracyMode,
    /// Only failures whose text contains this substring count.
    pub check_str: Option<String>,
    pub offload_to_disk: bool,
    pub skip_saving_eager_intermediates: bool,
    pub skip_sanity: bool,
    pub max_granularity: Option<usize>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            save_dir: None,
            device: "cpu".to_string(),
            accuracy: AccuracyMode::Off,
            check_str: None,
            offload_to_disk: false,
            skip_saving_eager_intermediates: false,
            skip_sanity: false,
            max_granularity: None,
        }
    }
}

impl ReplayOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options matching how a failure was captured.
    pub fn from_entry(entry: &EntryPoint) -> Self {
        Self {
            save_dir: entry.save_dir.clone(),
            accuracy: entry.accuracy,
            check_str: entry.check_str.clone(),
            ..Self::default()
        }
    }

    pub fn with_save_dir(mut self, save_dir: Option<PathBuf>) -> Self {
        self.save_dir = save_dir;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_accuracy(mut self, accuracy: AccuracyMode) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_check_str(mut self, check_str: Option<String>) -> Self {
        self.check_str = check_str;
        self
    }

    pub fn with_offload_to_disk(mut self, enabled: bool) -> Self {
        self.offload_to_disk = enabled;
        self
    }

    pub fn with_skip_saving_eager_intermediates(mut self, enabled: bool) -> Self {
        self.skip_saving_eager_intermediates = enabled;
        self
    }

    pub fn with_skip_sanity(mut self, enabled: bool) -> Self {
        self.skip_sanity = enabled;
        self
    }

    pub fn with_max_granularity(mut self, granularity: Option<usize>) -> Self {
        self.max_granularity = granularity;
        self
    }

    pub fn save_dir(&self) -> Option<&Path> {
        self.save_dir.as_deref()
    }

    pub fn check_str(&self) -> Option<&str> {
        self.check_str.as_deref()
    }

    /// Minimizer knobs carried by these options.
    pub fn minifier_config(&self) -> MinifierConfig {
        MinifierConfig::new()
            .with_save_dir(self.save_dir.clone())
            .with_offload_to_disk(self.offload_to_disk)
            .with_skip_saving_eager_intermediates(self.skip_saving_eager_intermediates)
            .with_skip_sanity(self.skip_sanity)
            .with_max_granularity(self.max_granularity)
    }

    /// Rejects devices the harness cannot compile for.
    pub fn validate_device(&self) -> Result<()> {
        validate_device(&self.device)
    }
}

/// Accepts `cpu` and anything starting with a known accelerator prefix.
pub fn validate_device(device: &str) -> Result<()> {
    if device == "cpu" || ACCELERATOR_PREFIXES.iter().any(|p| device.starts_with(p)) {
        Ok(())
    } else {
        Err(ReproError::UnsupportedDevice(device.to_string()))
    }
}
