//! Camera capability consumed by the acquisition loop
//!
//! A device exposes a fixed ring of hardware buffer slots. The loop arms a
//! slot, issues a software trigger and blocks until the slot is filled.
//! Every call can fail, and every failure is a hard error.

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Camera properties the pipeline touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyId {
    /// Still exposure, in device-native integer units
    Exposure,
    Gain,
}

/// Opaque per-property flags, read back and passed through on set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyFlags(pub u32);

/// Inclusive value range a device accepts for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRange {
    pub min: i64,
    pub max: i64,
}

impl PropertyRange {
    pub const UNBOUNDED: Self = Self {
        min: i64::MIN,
        max: i64::MAX,
    };
}

/// Sample layout requested from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    Mono16,
    Mono8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binning {
    pub x: u32,
    pub y: u32,
}

impl Default for Binning {
    fn default() -> Self {
        Self { x: 1, y: 1 }
    }
}

/// Negotiated frame shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub format: SampleFormat,
}

impl FrameGeometry {
    pub fn samples(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Slot-based camera.
///
/// Opening is left to each implementation's constructor. A slot must not be
/// read with [`CameraDevice::buffer`] while a capture into it is pending.
pub trait CameraDevice: Send {
    fn configure_format(
        &mut self,
        binning: Binning,
        format: SampleFormat,
    ) -> Result<FrameGeometry, DeviceError>;

    fn geometry(&self) -> FrameGeometry;

    fn property(&mut self, id: PropertyId) -> Result<(i64, PropertyFlags), DeviceError>;

    fn property_range(&mut self, id: PropertyId) -> Result<PropertyRange, DeviceError>;

    fn set_property(
        &mut self,
        id: PropertyId,
        value: i64,
        flags: PropertyFlags,
    ) -> Result<(), DeviceError>;

    /// Number of hardware slots, fixed for the lifetime of the device.
    fn buffer_count(&self) -> usize;

    /// Queue `slot` to receive the next triggered capture.
    fn arm_buffer(&mut self, slot: usize) -> Result<(), DeviceError>;

    fn trigger(&mut self) -> Result<(), DeviceError>;

    /// Block until the capture into `slot` has completed.
    fn wait_for_capture(&mut self, slot: usize) -> Result<(), DeviceError>;

    /// Samples of a completed slot.
    fn buffer(&self, slot: usize) -> Result<&[u16], DeviceError>;

    fn enable_streaming(&mut self) -> Result<(), DeviceError>;

    fn start_streaming(&mut self) -> Result<(), DeviceError>;

    fn stop_streaming(&mut self) -> Result<(), DeviceError>;

    fn disable_streaming(&mut self) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;

    /// Integer exposure units per second of exposure.
    fn exposure_units_per_second(&self) -> u32 {
        1_000_000
    }
}

/// Bounds-check a slot index against a device's ring size.
pub fn check_slot(slot: usize, count: usize) -> Result<(), DeviceError> {
    if slot < count {
        Ok(())
    } else {
        Err(DeviceError::SlotOutOfRange { slot, count })
    }
}
