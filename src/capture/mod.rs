pub mod decode;
pub mod device;
pub mod frame;
pub mod mode;
pub mod synthetic;
pub mod v4l2;

pub use device::{DeviceSession, OpenParams, StereoDevice};
pub use frame::{CaptureBuffer, Eye, PixelFormat, StereoFrame};
pub use mode::{CameraMode, DeviceParam, ProcessingMode};
pub use synthetic::SyntheticDevice;
pub use v4l2::V4l2StereoDevice;
