//! Producer/consumer wiring
//!
//! The acquisition loop owns the camera on its own thread. The display side
//! only ever touches [`PipelineHandle`], whose state is atomic or swapped
//! whole, so neither thread blocks on the other.

pub mod control;
pub mod publish;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::capture::acquisition::{AcquisitionLoop, AcquisitionOptions};
use crate::capture::device::CameraDevice;
use crate::capture::Frame;
use crate::error::{ConfigError, PipelineError};
use crate::storage::FrameSink;
use crate::{Config, ExposureConfig};

pub use control::{ControlState, ExposureController, Mode};
pub use publish::FramePublisher;

/// Notifications from the acquisition thread to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    FrameSaved(PathBuf),
    SaveFailed(String),
    /// Pending capture count reached zero
    CaptureComplete,
}

/// State shared between both threads
pub struct Shared {
    pub frames: FramePublisher,
    pub control: ControlState,
}

impl Shared {
    pub fn new(exposure: &ExposureConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            frames: FramePublisher::new(),
            control: ControlState::new(exposure.live_seconds, exposure.capture_seconds)?,
        })
    }
}

/// Consumer-side view of a running pipeline
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
    events: flume::Receiver<PipelineEvent>,
}

impl PipelineHandle {
    pub fn latest_frame(&self) -> Arc<Frame> {
        self.shared.frames.latest()
    }

    /// Ask for one more frame to be saved. Returns the new pending count.
    pub fn request_capture(&self) -> u32 {
        self.shared.control.request_capture()
    }

    pub fn set_exposure(&self, mode: Mode, seconds: f64) -> Result<(), ConfigError> {
        self.shared.control.set_exposure(mode, seconds)
    }

    pub fn exposure(&self, mode: Mode) -> f64 {
        self.shared.control.exposure(mode)
    }

    pub fn pending_capture_count(&self) -> u32 {
        self.shared.control.pending_captures()
    }

    pub fn mode(&self) -> Mode {
        self.shared.control.mode()
    }

    pub fn frames_published(&self) -> u64 {
        self.shared.frames.published()
    }

    /// Ask the acquisition thread to stop after its current cycle.
    pub fn shutdown(&self) {
        self.shared.control.request_shutdown();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.control.shutdown_requested()
    }

    pub fn events(&self) -> &flume::Receiver<PipelineEvent> {
        &self.events
    }
}

/// Join handle for the acquisition thread
pub struct AcquisitionThread {
    handle: JoinHandle<Result<(), PipelineError>>,
}

impl AcquisitionThread {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<(), PipelineError> {
        self.handle.join().map_err(|_| PipelineError::Panicked)?
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Start acquisition on a dedicated thread.
    pub fn spawn<D, S>(
        device: D,
        sink: S,
        config: &Config,
    ) -> Result<(PipelineHandle, AcquisitionThread), PipelineError>
    where
        D: CameraDevice + 'static,
        S: FrameSink + 'static,
    {
        let shared = Arc::new(Shared::new(&config.exposure)?);
        let (tx, rx) = flume::unbounded();
        let options = AcquisitionOptions::from(&config.capture);
        let pin_core = config.pipeline.pin_core;

        let acquisition = AcquisitionLoop::new(device, sink, Arc::clone(&shared), tx, options);
        let handle = thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || {
                if let Some(core) = pin_core {
                    pin_current_thread(core);
                }
                acquisition.run()
            })
            .map_err(PipelineError::Spawn)?;
        info!("acquisition thread started");

        Ok((
            PipelineHandle { shared, events: rx },
            AcquisitionThread { handle },
        ))
    }
}

fn pin_current_thread(index: usize) {
    let core = core_affinity::get_core_ids().and_then(|ids| ids.into_iter().nth(index));
    match core {
        Some(id) if core_affinity::set_for_current(id) => info!(core = index, "acquisition thread pinned"),
        _ => warn!(core = index, "could not pin acquisition thread"),
    }
}
