//! In-process camera for running without hardware
//!
//! Behaves like a software-triggered still camera: triggers fill armed slots
//! in the order they were armed, and every call is recorded in a shared
//! [`DeviceJournal`] so callers can inspect the exact call sequence.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use super::device::{
    check_slot, Binning, CameraDevice, FrameGeometry, PropertyFlags, PropertyId, PropertyRange,
    SampleFormat,
};
use crate::error::DeviceError;

/// One recorded device call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    ConfigureFormat,
    SetProperty { id: PropertyId, value: i64 },
    Arm(usize),
    Trigger,
    Wait(usize),
    EnableStreaming,
    StartStreaming,
    StopStreaming,
    DisableStreaming,
    Close,
}

/// Shared, cloneable call log
#[derive(Debug, Clone, Default)]
pub struct DeviceJournal(Arc<Mutex<Vec<DeviceCall>>>);

impl DeviceJournal {
    fn lock(&self) -> MutexGuard<'_, Vec<DeviceCall>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: DeviceCall) {
        self.lock().push(call);
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().clone()
    }

    /// Every value pushed to the exposure property, in order.
    pub fn exposure_pushes(&self) -> Vec<i64> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                DeviceCall::SetProperty {
                    id: PropertyId::Exposure,
                    value,
                } => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

pub struct SimulatedCamera {
    geometry: FrameGeometry,
    slots: Vec<Vec<u16>>,
    /// Armed slots not yet filled, oldest first
    armed: VecDeque<usize>,
    /// Filled slots not yet collected by a wait
    filled: Vec<usize>,
    properties: HashMap<PropertyId, i64>,
    streaming: bool,
    enabled: bool,
    closed: bool,
    sequence: u64,
    waits: u64,
    fail_wait_after: Option<u64>,
    property_writes: u64,
    fail_set_property_after: Option<u64>,
    realtime: bool,
    journal: DeviceJournal,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32, buffer_count: usize) -> Self {
        let geometry = FrameGeometry {
            width,
            height,
            format: SampleFormat::Mono16,
        };
        let mut properties = HashMap::new();
        properties.insert(PropertyId::Exposure, 1_000_000);
        properties.insert(PropertyId::Gain, 1);

        Self {
            geometry,
            slots: vec![vec![0; geometry.samples()]; buffer_count],
            armed: VecDeque::new(),
            filled: Vec::new(),
            properties,
            streaming: false,
            enabled: false,
            closed: false,
            sequence: 0,
            waits: 0,
            fail_wait_after: None,
            property_writes: 0,
            fail_set_property_after: None,
            realtime: false,
            journal: DeviceJournal::default(),
        }
    }

    /// Sleep for the configured exposure on every wait.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Make every wait after the first `waits` successful ones fail.
    pub fn fail_wait_after(mut self, waits: u64) -> Self {
        self.fail_wait_after = Some(waits);
        self
    }

    /// Make every property write after the first `writes` successful ones fail.
    pub fn fail_set_property_after(mut self, writes: u64) -> Self {
        self.fail_set_property_after = Some(writes);
        self
    }

    pub fn journal(&self) -> DeviceJournal {
        self.journal.clone()
    }

    fn exposure_seconds(&self) -> f64 {
        let units = self.properties.get(&PropertyId::Exposure).copied().unwrap_or(0);
        units as f64 / f64::from(self.exposure_units_per_second())
    }

    /// Diagonal ramp whose brightness scales with exposure.
    fn expose(&mut self, slot: usize) {
        self.sequence += 1;
        let gain = self.exposure_seconds().min(16.0) * 4096.0;
        let width = self.geometry.width as usize;
        let seq = self.sequence as usize;
        for (i, sample) in self.slots[slot].iter_mut().enumerate() {
            let (x, y) = (i % width, i / width);
            let base = ((x + y + seq) % 256) as f64 / 256.0;
            *sample = (base * gain).min(f64::from(u16::MAX)) as u16;
        }
    }

    fn require_streaming(&self) -> Result<(), DeviceError> {
        if self.streaming && !self.closed {
            Ok(())
        } else {
            Err(DeviceError::NotStreaming)
        }
    }
}

impl CameraDevice for SimulatedCamera {
    fn configure_format(
        &mut self,
        binning: Binning,
        format: SampleFormat,
    ) -> Result<FrameGeometry, DeviceError> {
        self.journal.record(DeviceCall::ConfigureFormat);
        if binning.x == 0 || binning.y == 0 {
            return Err(DeviceError::call("configure_format", "binning must be positive"));
        }
        self.geometry = FrameGeometry {
            width: self.geometry.width / binning.x,
            height: self.geometry.height / binning.y,
            format,
        };
        let samples = self.geometry.samples();
        for slot in &mut self.slots {
            slot.resize(samples, 0);
        }
        Ok(self.geometry)
    }

    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    fn property(&mut self, id: PropertyId) -> Result<(i64, PropertyFlags), DeviceError> {
        self.properties
            .get(&id)
            .map(|value| (*value, PropertyFlags::default()))
            .ok_or(DeviceError::UnsupportedProperty(id))
    }

    fn property_range(&mut self, id: PropertyId) -> Result<PropertyRange, DeviceError> {
        match id {
            PropertyId::Exposure => Ok(PropertyRange {
                min: 1,
                max: 3_600 * i64::from(self.exposure_units_per_second()),
            }),
            PropertyId::Gain => Ok(PropertyRange { min: 0, max: 1_000 }),
        }
    }

    fn set_property(
        &mut self,
        id: PropertyId,
        value: i64,
        _flags: PropertyFlags,
    ) -> Result<(), DeviceError> {
        self.journal.record(DeviceCall::SetProperty { id, value });
        if self
            .fail_set_property_after
            .is_some_and(|limit| self.property_writes >= limit)
        {
            return Err(DeviceError::call("set_property", "device rejected write"));
        }
        let range = self.property_range(id)?;
        if value < range.min || value > range.max {
            return Err(DeviceError::call("set_property", format!("{value} out of range")));
        }
        self.properties.insert(id, value);
        self.property_writes += 1;
        Ok(())
    }

    fn buffer_count(&self) -> usize {
        self.slots.len()
    }

    fn arm_buffer(&mut self, slot: usize) -> Result<(), DeviceError> {
        self.journal.record(DeviceCall::Arm(slot));
        check_slot(slot, self.slots.len())?;
        if !self.enabled || self.closed {
            return Err(DeviceError::NotStreaming);
        }
        if self.armed.contains(&slot) {
            return Err(DeviceError::call("arm_buffer", format!("slot {slot} already armed")));
        }
        self.filled.retain(|s| *s != slot);
        self.armed.push_back(slot);
        Ok(())
    }

    fn trigger(&mut self) -> Result<(), DeviceError> {
        self.journal.record(DeviceCall::Trigger);
        self.require_streaming()?;
        let slot = self
            .armed
            .pop_front()
            .ok_or_else(|| DeviceError::call("trigger", "no slot armed"))?;
        self.expose(slot);
        self.filled.push(slot);
        Ok(())
    }

    fn wait_for_capture(&mut self, slot: usize) -> Result<(), DeviceError> {
        self.journal.record(DeviceCall::Wait(slot));
        check_slot(slot, self.slots.len())?;
        self.require_streaming()?;
        if self.fail_wait_after.is_some_and(|limit| self.waits >= limit) {
            return Err(DeviceError::call("wait_for_capture", "capture timed out"));
        }
        if self.realtime {
            std::thread::sleep(Duration::from_secs_f64(self.exposure_seconds().min(30.0)));
        }
        match self.filled.iter().position(|s| *s == slot) {
            Some(_) => {
                self.waits += 1;
                Ok(())
            }
            None if self.armed.contains(&slot) => {
                Err(DeviceError::call("wait_for_capture", "capture timed out"))
            }
            None => Err(DeviceError::NotArmed(slot)),
        }
    }

    fn buffer(&self, slot: usize) -> Result<&[u16], DeviceError> {
        check_slot(slot, self.slots.len())?;
        if self.armed.contains(&slot) {
            return Err(DeviceError::call("buffer", format!("slot {slot} has a pending capture")));
        }
        Ok(&self.slots[slot])
    }

    fn enable_streaming(&mut self) -> Result<(), DeviceError> {
        self.journal.record(DeviceCall::EnableStreaming);
        self.enabled = true;
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<(), DeviceError> {
        self.journal.record(DeviceCall::StartStreaming);
        if !self.enabled {
            return Err(DeviceError::NotStreaming);
        }
        self.streaming = true;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        self.journal.record(DeviceCall::StopStreaming);
        self.streaming = false;
        Ok(())
    }

    fn disable_streaming(&mut self) -> Result<(), DeviceError> {
        self.journal.record(DeviceCall::DisableStreaming);
        self.enabled = false;
        self.armed.clear();
        self.filled.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.journal.record(DeviceCall::Close);
        debug!(frames = self.sequence, "simulated camera closed");
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming_camera(buffers: usize) -> SimulatedCamera {
        let mut camera = SimulatedCamera::new(8, 4, buffers);
        camera.enable_streaming().unwrap();
        camera.start_streaming().unwrap();
        camera
    }

    #[test]
    fn triggers_fill_slots_in_arm_order() {
        let mut camera = streaming_camera(3);
        camera.arm_buffer(0).unwrap();
        camera.arm_buffer(1).unwrap();
        camera.trigger().unwrap();
        camera.wait_for_capture(0).unwrap();
        assert!(camera.wait_for_capture(1).is_err());
        camera.trigger().unwrap();
        camera.wait_for_capture(1).unwrap();
    }

    #[test]
    fn refuses_double_arm_and_reads_of_pending_slots() {
        let mut camera = streaming_camera(2);
        camera.arm_buffer(1).unwrap();
        assert!(camera.arm_buffer(1).is_err());
        assert!(camera.buffer(1).is_err());
        assert!(camera.buffer(0).is_ok());
    }

    #[test]
    fn wait_on_unarmed_slot_is_an_error() {
        let mut camera = streaming_camera(2);
        assert!(matches!(
            camera.wait_for_capture(1),
            Err(DeviceError::NotArmed(1))
        ));
        assert!(matches!(
            camera.wait_for_capture(5),
            Err(DeviceError::SlotOutOfRange { slot: 5, count: 2 })
        ));
    }

    #[test]
    fn brighter_with_longer_exposure() {
        let mut camera = streaming_camera(2);
        let flags = PropertyFlags::default();
        camera.set_property(PropertyId::Exposure, 100_000, flags).unwrap();
        camera.arm_buffer(0).unwrap();
        camera.trigger().unwrap();
        camera.wait_for_capture(0).unwrap();
        let dim: u64 = camera.buffer(0).unwrap().iter().map(|s| u64::from(*s)).sum();

        camera.set_property(PropertyId::Exposure, 4_000_000, flags).unwrap();
        camera.arm_buffer(0).unwrap();
        camera.trigger().unwrap();
        camera.wait_for_capture(0).unwrap();
        let bright: u64 = camera.buffer(0).unwrap().iter().map(|s| u64::from(*s)).sum();

        assert!(bright > dim);
        assert_eq!(camera.journal().exposure_pushes(), vec![100_000, 4_000_000]);
    }

    #[test]
    fn injected_wait_failure() {
        let mut camera = streaming_camera(2).fail_wait_after(0);
        camera.arm_buffer(0).unwrap();
        camera.trigger().unwrap();
        assert!(camera.wait_for_capture(0).is_err());
    }

    #[test]
    fn injected_property_write_failure() {
        let mut camera = SimulatedCamera::new(4, 4, 2).fail_set_property_after(1);
        let flags = PropertyFlags::default();
        camera.set_property(PropertyId::Exposure, 2_000_000, flags).unwrap();
        assert!(camera.set_property(PropertyId::Exposure, 3_000_000, flags).is_err());
        assert_eq!(camera.property(PropertyId::Exposure).unwrap().0, 2_000_000);
    }
}
