pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod storage;
#[cfg(feature = "v4l2")]
pub mod utils;

use std::path::{Path, PathBuf};

use capture::device::{Binning, SampleFormat};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use capture::Frame;
pub use pipeline::{Mode, Pipeline, PipelineEvent, PipelineHandle};

/// Prefix for environment overrides, e.g. `STILLVIEW__EXPOSURE__LIVE_SECONDS`
pub const ENV_PREFIX: &str = "STILLVIEW";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub exposure: ExposureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// V4L2 device path; auto-detected when empty
    pub device: String,
    pub simulate: bool,
    pub binning: Binning,
    pub format: SampleFormat,
    pub gain: Option<i64>,
    /// Simulated camera geometry and ring size
    pub sim_width: u32,
    pub sim_height: u32,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Seconds between bells once a capture batch completes
    pub bell_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// CPU core index for the acquisition thread
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
}

/// Exposure per mode, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    pub live_seconds: f64,
    pub capture_seconds: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            simulate: false,
            binning: Binning::default(),
            format: SampleFormat::Mono16,
            gain: None,
            sim_width: 640,
            sim_height: 480,
            buffer_count: 4,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            bell_interval_secs: 4,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            live_seconds: 1.0,
            capture_seconds: 10.0,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` if it exists, then
    /// `STILLVIEW__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for seconds in [self.exposure.live_seconds, self.exposure.capture_seconds] {
            if !(seconds.is_finite() && seconds > 0.0) {
                return Err(ConfigError::InvalidExposure(seconds));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(config.exposure.live_seconds, 1.0);
        assert_eq!(config.exposure.capture_seconds, 10.0);
        assert_eq!(config.display.bell_interval_secs, 4);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stillview.toml");
        fs::write(
            &path,
            "[exposure]\ncapture_seconds = 30.0\n\n[storage]\noutput_dir = \"/data/frames\"\n\n[capture]\ngain = 4\n",
        )
        .unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.exposure.capture_seconds, 30.0);
        assert_eq!(config.exposure.live_seconds, 1.0);
        assert_eq!(config.storage.output_dir, PathBuf::from("/data/frames"));
        assert_eq!(config.capture.gain, Some(4));
    }

    #[test]
    fn rejects_non_positive_exposure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stillview.toml");
        fs::write(&path, "[exposure]\nlive_seconds = 0.0\n").unwrap();
        assert!(matches!(
            Config::load(Some(path.as_path())),
            Err(ConfigError::InvalidExposure(_))
        ));
    }
}
