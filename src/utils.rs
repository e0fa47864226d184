use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::SampleFormat;
use crate::error::DeviceError;
use crate::CaptureConfig;

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: SampleFormat,
}

impl FoundDevice {
    /// Point the capture config at this device and its best sample format.
    pub fn apply_to(self, capture: &mut CaptureConfig) {
        capture.device = self.path;
        capture.format = self.format;
    }
}

/// Find the first capture device offering a monochrome-compatible format,
/// preferring 16-bit luma.
pub fn auto_detect_device() -> Result<FoundDevice, DeviceError> {
    info!("Auto-detecting capture devices...");

    let mut fallback = None;
    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        for fmt in formats {
            if fmt.fourcc == FourCC::new(b"Y16 ") {
                info!("Found Y16 device: {} - {}", path, caps.card);
                return Ok(FoundDevice {
                    path,
                    format: SampleFormat::Mono16,
                });
            }
            if fallback.is_none()
                && (fmt.fourcc == FourCC::new(b"GREY") || fmt.fourcc == FourCC::new(b"YUYV"))
            {
                info!("Found 8-bit device: {} - {}", path, caps.card);
                fallback = Some(FoundDevice {
                    path: path.clone(),
                    format: SampleFormat::Mono8,
                });
            }
        }
    }

    fallback.ok_or(DeviceError::NotFound)
}
