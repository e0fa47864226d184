//! Mode and exposure control shared between the consumer and the producer
//!
//! The consumer writes capture requests and exposure values; the acquisition
//! loop reads them once per cycle and pushes the right exposure to the
//! camera whenever the mode flips or a value changes.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use tracing::{debug, instrument, warn};

use crate::capture::device::{CameraDevice, PropertyId};
use crate::error::{ConfigError, DeviceError};

/// Acquisition mode, derived from the pending capture count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Nothing pending: frames are shown, not saved
    Live,
    /// Captures pending: frames are shown and saved
    Capture,
}

impl Mode {
    pub fn from_pending(pending: u32) -> Self {
        if pending == 0 {
            Mode::Live
        } else {
            Mode::Capture
        }
    }
}

/// State crossing the consumer/producer boundary. Every field is atomic.
#[derive(Debug)]
pub struct ControlState {
    pending_captures: CachePadded<AtomicU32>,
    live_exposure: AtomicU64,
    capture_exposure: AtomicU64,
    refresh_pending: AtomicBool,
    shutdown: CachePadded<AtomicBool>,
}

impl ControlState {
    pub fn new(live_seconds: f64, capture_seconds: f64) -> Result<Self, ConfigError> {
        validate_exposure(live_seconds)?;
        validate_exposure(capture_seconds)?;

        Ok(Self {
            pending_captures: CachePadded::new(AtomicU32::new(0)),
            live_exposure: AtomicU64::new(live_seconds.to_bits()),
            capture_exposure: AtomicU64::new(capture_seconds.to_bits()),
            // The device exposure is unknown until the first push.
            refresh_pending: AtomicBool::new(true),
            shutdown: CachePadded::new(AtomicBool::new(false)),
        })
    }

    pub fn pending_captures(&self) -> u32 {
        self.pending_captures.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> Mode {
        Mode::from_pending(self.pending_captures())
    }

    /// Queue one more frame to be saved. Returns the new count.
    pub fn request_capture(&self) -> u32 {
        let pending = self.pending_captures.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::gauge!("pending_captures").set(f64::from(pending));
        pending
    }

    /// Mark one capture done, saturating at zero. Returns the new count.
    pub fn complete_capture(&self) -> u32 {
        let previous = self
            .pending_captures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        let pending = previous.saturating_sub(1);
        metrics::gauge!("pending_captures").set(f64::from(pending));
        pending
    }

    pub fn exposure(&self, mode: Mode) -> f64 {
        let bits = match mode {
            Mode::Live => self.live_exposure.load(Ordering::Acquire),
            Mode::Capture => self.capture_exposure.load(Ordering::Acquire),
        };
        f64::from_bits(bits)
    }

    /// Store a new exposure for `mode` and schedule a refresh.
    ///
    /// Non-positive values never reach the device.
    pub fn set_exposure(&self, mode: Mode, seconds: f64) -> Result<(), ConfigError> {
        validate_exposure(seconds)?;
        let slot = match mode {
            Mode::Live => &self.live_exposure,
            Mode::Capture => &self.capture_exposure,
        };
        slot.store(seconds.to_bits(), Ordering::Release);
        self.request_refresh();
        Ok(())
    }

    pub fn request_refresh(&self) {
        self.refresh_pending.store(true, Ordering::Release);
    }

    /// Clear the refresh flag, returning whether it was set.
    pub fn take_refresh(&self) -> bool {
        self.refresh_pending.swap(false, Ordering::AcqRel)
    }

    pub fn refresh_pending(&self) -> bool {
        self.refresh_pending.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

fn validate_exposure(seconds: f64) -> Result<(), ConfigError> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidExposure(seconds))
    }
}

/// Pushes the exposure matching the current mode when a refresh is pending.
#[derive(Debug, Clone, Copy)]
pub struct ExposureController {
    units_per_second: u32,
    /// Mode seen at the previous check, for edge detection
    last_mode: Mode,
    /// Mode whose exposure was last pushed to the device
    applied: Option<Mode>,
}

impl ExposureController {
    pub fn new(units_per_second: u32, initial: Mode) -> Self {
        Self {
            units_per_second,
            last_mode: initial,
            applied: None,
        }
    }

    /// Mode whose exposure the device currently holds, if any was pushed.
    pub fn applied(&self) -> Option<Mode> {
        self.applied
    }

    /// Flag a refresh if the mode flipped since the last check.
    pub fn observe_mode(&mut self, state: &ControlState) -> Mode {
        let mode = state.mode();
        if mode != self.last_mode {
            debug!(from = ?self.last_mode, to = ?mode, "mode transition");
            state.request_refresh();
            self.last_mode = mode;
        }
        mode
    }

    /// Convert seconds to device units, never below one unit.
    pub fn to_device_units(&self, seconds: f64) -> i64 {
        let units = (seconds * f64::from(self.units_per_second)).round();
        if units.is_nan() || units < 1.0 {
            1
        } else if units >= i64::MAX as f64 {
            i64::MAX
        } else {
            units as i64
        }
    }

    /// Run one refresh check. Returns the pushed value, if any.
    ///
    /// Push failures are returned as-is: the device exposure is then
    /// unknown and acquisition must stop.
    #[instrument(level = "debug", skip(self, device, state))]
    pub fn refresh<D: CameraDevice + ?Sized>(
        &mut self,
        device: &mut D,
        state: &ControlState,
    ) -> Result<Option<i64>, DeviceError> {
        let mode = self.observe_mode(state);
        if !state.take_refresh() {
            return Ok(None);
        }

        let seconds = state.exposure(mode);
        let requested = self.to_device_units(seconds);
        let range = device.property_range(PropertyId::Exposure)?;
        let value = requested.clamp(range.min.max(1), range.max.max(1));
        if value != requested {
            warn!(requested, value, min = range.min, max = range.max, "exposure clamped to device range");
        }

        let (_, flags) = device.property(PropertyId::Exposure)?;
        device.set_property(PropertyId::Exposure, value, flags)?;
        self.applied = Some(mode);
        debug!(?mode, seconds, value, "exposure pushed");
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::SimulatedCamera;

    #[test]
    fn counter_saturates_at_zero() {
        let state = ControlState::new(1.0, 10.0).unwrap();
        assert_eq!(state.complete_capture(), 0);
        assert_eq!(state.request_capture(), 1);
        assert_eq!(state.request_capture(), 2);
        assert_eq!(state.mode(), Mode::Capture);
        assert_eq!(state.complete_capture(), 1);
        assert_eq!(state.complete_capture(), 0);
        assert_eq!(state.mode(), Mode::Live);
    }

    #[test]
    fn rejects_non_positive_exposure() {
        let state = ControlState::new(1.0, 10.0).unwrap();
        state.take_refresh();
        assert!(state.set_exposure(Mode::Live, 0.0).is_err());
        assert!(state.set_exposure(Mode::Capture, -3.0).is_err());
        assert!(state.set_exposure(Mode::Live, f64::NAN).is_err());
        assert!(!state.refresh_pending());
        assert_eq!(state.exposure(Mode::Live), 1.0);
        assert!(ControlState::new(0.0, 1.0).is_err());
    }

    #[test]
    fn set_exposure_schedules_refresh() {
        let state = ControlState::new(1.0, 10.0).unwrap();
        assert!(state.take_refresh());
        state.set_exposure(Mode::Capture, 20.0).unwrap();
        assert!(state.refresh_pending());
        assert_eq!(state.exposure(Mode::Capture), 20.0);
    }

    #[test]
    fn mode_edge_sets_refresh_in_both_directions() {
        let state = ControlState::new(1.0, 10.0).unwrap();
        let mut controller = ExposureController::new(1_000_000, Mode::Live);
        state.take_refresh();

        controller.observe_mode(&state);
        assert!(!state.refresh_pending());

        state.request_capture();
        controller.observe_mode(&state);
        assert!(state.take_refresh());

        state.complete_capture();
        controller.observe_mode(&state);
        assert!(state.take_refresh());
    }

    #[test]
    fn unit_conversion_never_drops_to_zero() {
        let controller = ExposureController::new(1_000_000, Mode::Live);
        assert_eq!(controller.to_device_units(1.0), 1_000_000);
        assert_eq!(controller.to_device_units(0.25), 250_000);
        assert_eq!(controller.to_device_units(1e-9), 1);
    }

    #[test]
    fn refresh_pushes_exposure_for_current_mode() {
        let mut camera = SimulatedCamera::new(4, 4, 2);
        let journal = camera.journal();
        let state = ControlState::new(1.0, 10.0).unwrap();
        let mut controller = ExposureController::new(camera.exposure_units_per_second(), Mode::Live);

        assert_eq!(controller.refresh(&mut camera, &state).unwrap(), Some(1_000_000));
        assert_eq!(controller.refresh(&mut camera, &state).unwrap(), None);

        state.request_capture();
        assert_eq!(controller.refresh(&mut camera, &state).unwrap(), Some(10_000_000));
        assert_eq!(controller.applied(), Some(Mode::Capture));
        assert_eq!(journal.exposure_pushes(), vec![1_000_000, 10_000_000]);
    }

    #[test]
    fn refresh_clamps_into_device_range() {
        let mut camera = SimulatedCamera::new(4, 4, 2);
        let journal = camera.journal();
        let state = ControlState::new(1.0, 10_000.0).unwrap();
        state.request_capture();
        let mut controller = ExposureController::new(1_000_000, Mode::Capture);

        controller.refresh(&mut camera, &state).unwrap();
        assert_eq!(journal.exposure_pushes(), vec![3_600_000_000]);
    }
}
