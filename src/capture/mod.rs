pub mod acquisition;
pub mod device;
pub mod frame;
pub mod simulated;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use acquisition::{AcquisitionLoop, AcquisitionOptions};
pub use device::{CameraDevice, FrameGeometry, PropertyId, SampleFormat};
pub use frame::Frame;
pub use simulated::SimulatedCamera;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;
