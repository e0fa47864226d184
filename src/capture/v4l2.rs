//! V4L2 camera adapter
//!
//! V4L2 devices free-run rather than wait for a software trigger, so the
//! slot protocol is emulated: a trigger marks the oldest armed slot as in
//! flight and the matching wait dequeues the next driver buffer into it.

use std::collections::VecDeque;

use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::device::{
    check_slot, Binning, CameraDevice, FrameGeometry, PropertyFlags, PropertyId, PropertyRange,
    SampleFormat,
};
use crate::error::DeviceError;

const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const CID_GAIN: u32 = 0x0098_0913;
/// `V4L2_EXPOSURE_MANUAL`
const EXPOSURE_MANUAL: i64 = 1;

fn control_id(id: PropertyId) -> u32 {
    match id {
        PropertyId::Exposure => CID_EXPOSURE_ABSOLUTE,
        PropertyId::Gain => CID_GAIN,
    }
}

/// Pixel layouts we can widen to 16-bit samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Y16,
    Grey,
    Yuyv,
}

impl Layout {
    fn fourcc(self) -> FourCC {
        match self {
            Layout::Y16 => FourCC::new(b"Y16 "),
            Layout::Grey => FourCC::new(b"GREY"),
            Layout::Yuyv => FourCC::new(b"YUYV"),
        }
    }

    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        [Layout::Y16, Layout::Grey, Layout::Yuyv]
            .into_iter()
            .find(|layout| layout.fourcc() == fourcc)
    }

    fn sample_format(self) -> SampleFormat {
        match self {
            Layout::Y16 => SampleFormat::Mono16,
            Layout::Grey | Layout::Yuyv => SampleFormat::Mono8,
        }
    }

    /// Preference order for a requested sample format
    fn candidates(format: SampleFormat) -> [Layout; 3] {
        match format {
            SampleFormat::Mono16 => [Layout::Y16, Layout::Grey, Layout::Yuyv],
            SampleFormat::Mono8 => [Layout::Grey, Layout::Yuyv, Layout::Y16],
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            Layout::Grey => 1,
            Layout::Y16 | Layout::Yuyv => 2,
        }
    }

    /// Widen a padded driver image into `out`, `width` samples per row.
    /// A zero `stride` means rows are packed.
    fn widen(self, raw: &[u8], stride: usize, width: usize, out: &mut [u16]) {
        if width == 0 {
            return;
        }
        let stride = stride.max(width * self.bytes_per_pixel());
        for (row_out, row_raw) in out.chunks_exact_mut(width).zip(raw.chunks(stride)) {
            self.widen_row(row_raw, row_out);
        }
    }

    fn widen_row(self, raw: &[u8], out: &mut [u16]) {
        let widen8 = |v: u8| (u16::from(v) << 8) | u16::from(v);
        match self {
            Layout::Y16 => {
                for (sample, bytes) in out.iter_mut().zip(raw.chunks_exact(2)) {
                    *sample = u16::from_le_bytes([bytes[0], bytes[1]]);
                }
            }
            Layout::Grey => {
                for (sample, v) in out.iter_mut().zip(raw) {
                    *sample = widen8(*v);
                }
            }
            // Y0 U Y1 V: luma sits on even bytes
            Layout::Yuyv => {
                for (sample, v) in out.iter_mut().zip(raw.iter().step_by(2)) {
                    *sample = widen8(*v);
                }
            }
        }
    }
}

/// Generic V4L2 capture device
pub struct V4l2Camera {
    device: Device,
    path: String,
    stream: Option<MmapStream<'static>>,
    buffer_count: usize,
    layout: Layout,
    geometry: FrameGeometry,
    slots: Vec<Vec<u16>>,
    armed: VecDeque<usize>,
    in_flight: VecDeque<usize>,
    active: bool,
    /// Bytes per driver row, padding included
    stride: usize,
    stale: StaleFrames,
}

/// Driver buffers queued before an exposure change still hold frames
/// exposed with the old value; they are dequeued and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StaleFrames(usize);

impl StaleFrames {
    fn exposure_changed(&mut self, queued: usize) {
        self.0 = queued;
    }

    /// Whether the next dequeued frame must be dropped.
    fn drop_next(&mut self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        true
    }
}

impl V4l2Camera {
    #[instrument]
    pub fn open(path: &str, buffer_count: usize) -> Result<Self, DeviceError> {
        let device = Device::with_path(path).map_err(|e| DeviceError::io("open", e))?;

        let caps = device.query_caps().map_err(|e| DeviceError::io("query_caps", e))?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(DeviceError::call("open", "device doesn't support video capture"));
        }

        let fmt = device.format().map_err(|e| DeviceError::io("format", e))?;
        let layout = Layout::from_fourcc(fmt.fourcc).unwrap_or(Layout::Yuyv);
        let geometry = FrameGeometry {
            width: fmt.width,
            height: fmt.height,
            format: layout.sample_format(),
        };

        Ok(Self {
            device,
            path: path.to_owned(),
            stream: None,
            buffer_count: buffer_count.max(2),
            layout,
            geometry,
            slots: vec![vec![0; geometry.samples()]; buffer_count.max(2)],
            armed: VecDeque::new(),
            in_flight: VecDeque::new(),
            active: false,
            stride: fmt.stride as usize,
            stale: StaleFrames::default(),
        })
    }

    fn stream(&mut self) -> Result<&mut MmapStream<'static>, DeviceError> {
        self.stream.as_mut().ok_or(DeviceError::NotStreaming)
    }

    fn supported_layouts(&self) -> Result<Vec<Layout>, DeviceError> {
        let formats = self
            .device
            .enum_formats()
            .map_err(|e| DeviceError::io("enum_formats", e))?;
        Ok(formats
            .iter()
            .filter_map(|desc| Layout::from_fourcc(desc.fourcc))
            .collect())
    }

    fn pending(&self, slot: usize) -> bool {
        self.armed.contains(&slot) || self.in_flight.contains(&slot)
    }
}

impl CameraDevice for V4l2Camera {
    fn configure_format(
        &mut self,
        binning: Binning,
        format: SampleFormat,
    ) -> Result<FrameGeometry, DeviceError> {
        let supported = self.supported_layouts()?;
        let layout = Layout::candidates(format)
            .into_iter()
            .find(|layout| supported.contains(layout))
            .ok_or_else(|| DeviceError::call("configure_format", "no monochrome-compatible format"))?;

        let mut fmt = self.device.format().map_err(|e| DeviceError::io("format", e))?;
        fmt.width /= binning.x.max(1);
        fmt.height /= binning.y.max(1);
        fmt.fourcc = layout.fourcc();
        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|e| DeviceError::io("set_format", e))?;

        self.layout = Layout::from_fourcc(fmt.fourcc)
            .ok_or_else(|| DeviceError::call("set_format", format!("driver chose {}", fmt.fourcc)))?;
        self.geometry = FrameGeometry {
            width: fmt.width,
            height: fmt.height,
            format: self.layout.sample_format(),
        };
        self.stride = fmt.stride as usize;
        for slot in &mut self.slots {
            slot.clear();
            slot.resize(self.geometry.samples(), 0);
        }
        if self.layout.sample_format() != format {
            warn!(requested = ?format, layout = ?self.layout, "falling back to 8-bit samples");
        }
        Ok(self.geometry)
    }

    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    fn property(&mut self, id: PropertyId) -> Result<(i64, PropertyFlags), DeviceError> {
        let control = self
            .device
            .control(control_id(id))
            .map_err(|e| DeviceError::io("control", e))?;
        match control.value {
            Value::Integer(value) => Ok((value, PropertyFlags::default())),
            _ => Err(DeviceError::UnsupportedProperty(id)),
        }
    }

    fn property_range(&mut self, id: PropertyId) -> Result<PropertyRange, DeviceError> {
        let cid = control_id(id);
        let controls = self
            .device
            .query_controls()
            .map_err(|e| DeviceError::io("query_controls", e))?;
        controls
            .iter()
            .find(|desc| desc.id == cid)
            .map(|desc| PropertyRange {
                min: desc.minimum,
                max: desc.maximum,
            })
            .ok_or(DeviceError::UnsupportedProperty(id))
    }

    fn set_property(
        &mut self,
        id: PropertyId,
        value: i64,
        _flags: PropertyFlags,
    ) -> Result<(), DeviceError> {
        if id == PropertyId::Exposure {
            let manual = Control {
                id: CID_EXPOSURE_AUTO,
                value: Value::Integer(EXPOSURE_MANUAL),
            };
            if let Err(e) = self.device.set_control(manual) {
                debug!(error = %e, "manual exposure mode not settable");
            }
        }
        self.device
            .set_control(Control {
                id: control_id(id),
                value: Value::Integer(value),
            })
            .map_err(|e| DeviceError::io("set_control", e))?;
        if id == PropertyId::Exposure && self.active {
            self.stale.exposure_changed(self.buffer_count);
        }
        Ok(())
    }

    fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    fn arm_buffer(&mut self, slot: usize) -> Result<(), DeviceError> {
        check_slot(slot, self.buffer_count)?;
        self.stream()?;
        if self.pending(slot) {
            return Err(DeviceError::call("arm_buffer", format!("slot {slot} already armed")));
        }
        self.armed.push_back(slot);
        Ok(())
    }

    fn trigger(&mut self) -> Result<(), DeviceError> {
        if !self.active {
            return Err(DeviceError::NotStreaming);
        }
        let slot = self
            .armed
            .pop_front()
            .ok_or_else(|| DeviceError::call("trigger", "no slot armed"))?;
        self.in_flight.push_back(slot);
        Ok(())
    }

    fn wait_for_capture(&mut self, slot: usize) -> Result<(), DeviceError> {
        check_slot(slot, self.buffer_count)?;
        if self.in_flight.front() != Some(&slot) {
            return Err(DeviceError::NotArmed(slot));
        }
        let layout = self.layout;
        let width = self.geometry.width as usize;
        let stream = self.stream.as_mut().ok_or(DeviceError::NotStreaming)?;
        while self.stale.drop_next() {
            stream
                .next()
                .map_err(|e| DeviceError::io("dequeue", e))?;
            debug!("dropped frame exposed before the last exposure change");
        }
        let (raw, _meta) = stream
            .next()
            .map_err(|e| DeviceError::io("dequeue", e))?;
        layout.widen(raw, self.stride, width, &mut self.slots[slot]);
        self.in_flight.pop_front();
        Ok(())
    }

    fn buffer(&self, slot: usize) -> Result<&[u16], DeviceError> {
        check_slot(slot, self.buffer_count)?;
        if self.pending(slot) {
            return Err(DeviceError::call("buffer", format!("slot {slot} has a pending capture")));
        }
        Ok(&self.slots[slot])
    }

    fn enable_streaming(&mut self) -> Result<(), DeviceError> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count as u32)
                .map_err(|e| DeviceError::io("request_buffers", e))?;
        self.stream = Some(stream);
        info!("Capture stream enabled with {} buffers", self.buffer_count);
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<(), DeviceError> {
        self.stream()?
            .start()
            .map_err(|e| DeviceError::io("stream_on", e))?;
        self.active = true;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        self.active = false;
        self.stream()?
            .stop()
            .map_err(|e| DeviceError::io("stream_off", e))
    }

    fn disable_streaming(&mut self) -> Result<(), DeviceError> {
        self.stream = None;
        self.stale = StaleFrames::default();
        self.armed.clear();
        self.in_flight.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.stream = None;
        info!(path = %self.path, "camera closed");
        Ok(())
    }

    /// `V4L2_CID_EXPOSURE_ABSOLUTE` counts 100 µs units.
    fn exposure_units_per_second(&self) -> u32 {
        10_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widens_y16_little_endian() {
        let mut out = [0u16; 2];
        Layout::Y16.widen(&[0x34, 0x12, 0xff, 0xff], 0, 2, &mut out);
        assert_eq!(out, [0x1234, 0xffff]);
    }

    #[test]
    fn widens_yuyv_luma_only() {
        let mut out = [0u16; 4];
        Layout::Yuyv.widen(&[0, 99, 255, 99, 128, 7, 1, 7], 8, 4, &mut out);
        assert_eq!(out, [0, 0xffff, 0x8080, 0x0101]);
    }

    #[test]
    fn skips_row_padding() {
        // 2x2 GREY image with rows padded to 4 bytes
        let raw = [1, 2, 0xee, 0xee, 3, 4, 0xee, 0xee];
        let mut out = [0u16; 4];
        Layout::Grey.widen(&raw, 4, 2, &mut out);
        assert_eq!(out, [0x0101, 0x0202, 0x0303, 0x0404]);
    }

    #[test]
    fn drops_every_frame_queued_before_an_exposure_change() {
        let mut stale = StaleFrames::default();
        assert!(!stale.drop_next());

        stale.exposure_changed(3);
        assert!(stale.drop_next());
        assert!(stale.drop_next());
        assert!(stale.drop_next());
        assert!(!stale.drop_next());

        // A second change restarts the count rather than adding to it.
        stale.exposure_changed(2);
        stale.exposure_changed(2);
        assert_eq!(stale, StaleFrames(2));
    }

    #[test]
    fn prefers_sixteen_bit_layout() {
        assert_eq!(Layout::candidates(SampleFormat::Mono16)[0], Layout::Y16);
        assert_eq!(Layout::from_fourcc(FourCC::new(b"YUYV")), Some(Layout::Yuyv));
        assert_eq!(Layout::from_fourcc(FourCC::new(b"MJPG")), None);
    }
}
