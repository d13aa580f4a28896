pub mod capture;
#[cfg(feature = "display")]
pub mod display;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod rig;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use capture::mode::{CameraMode, ProcessingMode};
use serde::{Deserialize, Serialize};

use crate::utils::FoundDevice;

pub use error::{Error, Result};
pub use params::{CameraParameters, ParameterAccess};
pub use pipeline::{CameraEvent, CameraState, StereoCamera, TrackingOrigin};
pub use rig::{StereoCalibration, StereoRig, ViewTarget};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub rig: RigConfig,
    pub pipeline: PipelineConfig,
    pub parameters: CameraParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    V4l2,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: Backend,
    /// V4L2 node; empty means auto-detect
    pub device: FoundDevice,
    pub mode: CameraMode,
    pub processing: ProcessingMode,
    pub location_id: i32,
    pub ar_size: f32,
    /// External frame sync; disabled means free-running capture
    pub sync_mode: bool,
    pub buffer_count: u32,
    /// Optional stereo calibration file (TOML)
    pub calibration_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Vertical FOV of the host's virtual cameras, in degrees
    pub field_of_view: Option<f64>,
    /// Image plane distance, used when no FOV is set
    pub plane_distance: f64,
    pub viewport_aspect: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pump_thread_name: String,
    /// CPU core to pin the frame pump to
    pub pump_core: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: Backend::V4l2,
            device: FoundDevice::new("/dev/video0".into(), PixelFormat::Mjpeg),
            mode: CameraMode::Vr960x950At60,
            processing: ProcessingMode::Demosaic,
            location_id: 0,
            ar_size: 1.0,
            sync_mode: false,
            buffer_count: 4,
            calibration_path: None,
        }
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            field_of_view: None,
            plane_distance: 500.0,
            viewport_aspect: 1.0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pump_thread_name: "stereo-pump".into(),
            pump_core: None,
        }
    }
}

impl RigConfig {
    pub fn target(&self) -> ViewTarget {
        match self.field_of_view {
            Some(degrees) => ViewTarget::FieldOfView {
                degrees,
                viewport_aspect: self.viewport_aspect,
            },
            None => ViewTarget::PlaneDistance(self.plane_distance),
        }
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by
    /// `STEREOCAM_*` environment variables (`__` separates sections).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("STEREOCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

impl StereoCalibration {
    pub fn load(path: &Path) -> Result<Self> {
        let calibration = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        Ok(calibration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rig_targets_plane_distance() {
        assert_eq!(
            RigConfig::default().target(),
            ViewTarget::PlaneDistance(500.0)
        );
        let rig = RigConfig {
            field_of_view: Some(90.0),
            ..Default::default()
        };
        assert!(matches!(rig.target(), ViewTarget::FieldOfView { .. }));
    }

    #[test]
    fn load_without_file_yields_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.capture.mode, CameraMode::Vr960x950At60);
        assert_eq!(config.capture.backend, Backend::V4l2);
        assert_eq!(config.pipeline.pump_thread_name, "stereo-pump");
        assert_eq!(config.parameters, CameraParameters::default());
    }

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("stereocam-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let path = write_temp(
            "config.toml",
            r#"
[capture]
backend = "synthetic"
mode = "Qvga320x240At120"
sync_mode = true

[rig]
field_of_view = 90.0
"#,
        );
        let config = Config::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.capture.backend, Backend::Synthetic);
        assert_eq!(config.capture.mode, CameraMode::Qvga320x240At120);
        assert!(config.capture.sync_mode);
        assert_eq!(config.capture.buffer_count, 4);
        assert_eq!(
            config.rig.target(),
            ViewTarget::FieldOfView {
                degrees: 90.0,
                viewport_aspect: 1.0
            }
        );
    }

    #[test]
    fn missing_config_file_is_optional() {
        let path = std::env::temp_dir().join("stereocam-does-not-exist.toml");
        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.capture.mode, CameraMode::Vr960x950At60);
    }

    #[test]
    fn environment_overrides_file_and_defaults() {
        std::env::set_var("STEREOCAM_RIG__PLANE_DISTANCE", "250");
        let config = Config::load(None);
        std::env::remove_var("STEREOCAM_RIG__PLANE_DISTANCE");

        assert_eq!(
            config.unwrap().rig.target(),
            ViewTarget::PlaneDistance(250.0)
        );
    }

    #[test]
    fn calibration_loads_from_toml() {
        let path = write_temp(
            "calibration.toml",
            r#"
camera_ids = [0, 1]
translation = [-0.064, 0.0, 0.0]
rotation = [0.0, 0.02, 0.0]
focal_lengths = [430.0, 432.0]
"#,
        );
        let calibration = StereoCalibration::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(calibration.camera_ids, [0, 1]);
        assert_eq!(calibration.translation.x, -0.064);
        assert_eq!(calibration.rotation.y, 0.02);
        assert_eq!(calibration.focal_lengths, [430.0, 432.0]);
    }

    #[test]
    fn missing_calibration_file_is_an_error() {
        let path = std::env::temp_dir().join("stereocam-no-calibration.toml");
        assert!(matches!(
            StereoCalibration::load(&path),
            Err(Error::Config(_))
        ));
    }
}
