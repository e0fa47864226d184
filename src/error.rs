//! Error types for the acquisition pipeline

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::capture::device::PropertyId;

/// Any failed call into the camera. Always fatal to acquisition: after a
/// failed call the firmware state is unknown.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("camera I/O error during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("camera call {op} failed: {reason}")]
    Call { op: &'static str, reason: String },

    #[error("slot {slot} is out of range for {count} buffers")]
    SlotOutOfRange { slot: usize, count: usize },

    #[error("slot {0} was waited on without being armed")]
    NotArmed(usize),

    #[error("device reports {0} buffers, at least 2 are required")]
    TooFewBuffers(usize),

    #[error("property {0:?} is not supported by this device")]
    UnsupportedProperty(PropertyId),

    #[error("streaming is not active")]
    NotStreaming,

    #[error("no capture device found")]
    NotFound,
}

impl DeviceError {
    pub fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }

    pub fn call(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Call {
            op,
            reason: reason.into(),
        }
    }
}

/// Failure to persist a frame. Recovered locally by the acquisition loop.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("refusing to overwrite existing file {0}")]
    Exists(PathBuf),

    #[error("malformed FITS file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Invalid settings, rejected before anything reaches the device.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("exposure must be a positive number of seconds, got {0}")]
    InvalidExposure(f64),

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame width must be positive")]
    ZeroWidth,

    #[error("{len} samples is not a multiple of width {width}")]
    Ragged { len: usize, width: u32 },
}

/// Why the acquisition thread stopped.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("acquisition thread panicked")]
    Panicked,
}
