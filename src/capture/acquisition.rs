//! Producer loop: arm, trigger, wait, read, publish, maybe save
//!
//! The slot after the current one is armed before the current one is waited
//! on, so the camera fills the next buffer while this one is being read.
//! Any device failure ends the loop; teardown runs on every exit path.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use super::device::{Binning, CameraDevice, FrameGeometry, PropertyId, SampleFormat};
use super::Frame;
use crate::error::{DeviceError, PipelineError};
use crate::pipeline::control::{ExposureController, Mode};
use crate::pipeline::{PipelineEvent, Shared};
use crate::storage::FrameSink;
use crate::CaptureConfig;

/// Device setup applied when acquisition starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionOptions {
    pub binning: Binning,
    pub format: SampleFormat,
    pub gain: Option<i64>,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            binning: Binning::default(),
            format: SampleFormat::Mono16,
            gain: None,
        }
    }
}

impl From<&CaptureConfig> for AcquisitionOptions {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            binning: config.binning,
            format: config.format,
            gain: config.gain,
        }
    }
}

pub struct AcquisitionLoop<D, S> {
    device: D,
    sink: S,
    shared: Arc<Shared>,
    events: flume::Sender<PipelineEvent>,
    options: AcquisitionOptions,
    controller: ExposureController,
    geometry: FrameGeometry,
    buffer_count: usize,
    current: usize,
    sequence: u64,
    streaming: bool,
}

impl<D: CameraDevice, S: FrameSink> AcquisitionLoop<D, S> {
    pub fn new(
        device: D,
        sink: S,
        shared: Arc<Shared>,
        events: flume::Sender<PipelineEvent>,
        options: AcquisitionOptions,
    ) -> Self {
        let controller = ExposureController::new(
            device.exposure_units_per_second(),
            shared.control.mode(),
        );
        let geometry = device.geometry();

        Self {
            device,
            sink,
            shared,
            events,
            options,
            controller,
            geometry,
            buffer_count: 0,
            current: 0,
            sequence: 0,
            streaming: false,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Slot that the next [`step`](Self::step) will wait on.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Configure the device, push initial properties and start streaming
    /// with slot 0 armed.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<(), PipelineError> {
        let count = self.device.buffer_count();
        if count < 2 {
            return Err(DeviceError::TooFewBuffers(count).into());
        }
        self.buffer_count = count;

        self.geometry = self
            .device
            .configure_format(self.options.binning, self.options.format)?;
        info!(
            width = self.geometry.width,
            height = self.geometry.height,
            format = ?self.geometry.format,
            "frame format configured"
        );

        if let Some(gain) = self.options.gain {
            let range = self.device.property_range(PropertyId::Gain)?;
            debug!(min = range.min, max = range.max, gain, "gain range");
            let (_, flags) = self.device.property(PropertyId::Gain)?;
            self.device.set_property(PropertyId::Gain, gain, flags)?;
        }
        self.controller.refresh(&mut self.device, &self.shared.control)?;

        self.device.enable_streaming()?;
        self.streaming = true;
        self.current = 0;
        self.device.arm_buffer(self.current)?;
        self.device.start_streaming()?;

        info!("Camera thread running with {} buffers", count);
        Ok(())
    }

    /// One full capture cycle.
    pub fn step(&mut self) -> Result<(), PipelineError> {
        let next = (self.current + 1) % self.buffer_count;
        self.device.arm_buffer(next)?;
        self.device.trigger()?;

        let wait_start = Instant::now();
        self.device.wait_for_capture(self.current)?;
        metrics::histogram!("capture_wait_us").record(wait_start.elapsed().as_micros() as f64);

        let samples = self.device.buffer(self.current)?;
        let samples = samples.get(..self.geometry.samples()).unwrap_or(samples);
        self.sequence += 1;
        let frame = Frame::new(samples, self.geometry.width, self.sequence)?;
        metrics::counter!("frames_captured").increment(1);

        self.shared.frames.publish(frame.clone());

        // Only frames taken with the capture exposure already applied are kept.
        if self.controller.applied() == Some(Mode::Capture)
            && self.shared.control.pending_captures() > 0
        {
            self.persist(&frame);
        }

        self.controller.refresh(&mut self.device, &self.shared.control)?;
        self.current = next;
        Ok(())
    }

    fn persist(&mut self, frame: &Frame) {
        match self.sink.save(frame) {
            Ok(path) => {
                metrics::counter!("frames_saved").increment(1);
                let _ = self.events.send(PipelineEvent::FrameSaved(path));
            }
            Err(e) => {
                metrics::counter!("save_failures").increment(1);
                error!(error = %e, sequence = frame.sequence, "failed to save frame");
                let _ = self.events.send(PipelineEvent::SaveFailed(e.to_string()));
            }
        }

        if self.shared.control.complete_capture() == 0 {
            info!("all requested captures taken");
            self.shared.control.request_refresh();
            let _ = self.events.send(PipelineEvent::CaptureComplete);
        }
    }

    /// Stop and release the device. Failures are logged, never raised.
    pub fn teardown(&mut self) {
        if self.streaming {
            if let Err(e) = self.device.stop_streaming() {
                warn!(error = %e, "failed to stop streaming");
            }
            if let Err(e) = self.device.disable_streaming() {
                warn!(error = %e, "failed to disable streaming");
            }
            self.streaming = false;
        }
        if let Err(e) = self.device.close() {
            warn!(error = %e, "failed to close camera");
        }
    }

    /// Capture until shutdown is requested or the device fails.
    ///
    /// Shutdown is only checked between full cycles.
    pub fn run(mut self) -> Result<(), PipelineError> {
        let result = self.start().and_then(|()| self.stream());
        self.teardown();
        match &result {
            Ok(()) => info!(frames = self.sequence, "Camera thread shut down"),
            Err(e) => error!(error = %e, frames = self.sequence, "acquisition stopped"),
        }
        result
    }

    fn stream(&mut self) -> Result<(), PipelineError> {
        while !self.shared.control.shutdown_requested() {
            self.step()?;
        }
        Ok(())
    }
}
