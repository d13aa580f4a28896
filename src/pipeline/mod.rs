pub mod controller;
pub mod pump;
pub mod relay;

pub use controller::{CameraEvent, CameraState, StereoCamera, TrackingOrigin};
pub use relay::RelayStats;
