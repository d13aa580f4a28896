use thiserror::Error;

use crate::capture::mode::{CameraMode, DeviceParam};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open stereo camera in mode {mode}: {reason}")]
    DeviceOpen { mode: CameraMode, reason: String },

    #[error("Failed to close stereo camera: {0}")]
    DeviceClose(String),

    #[error("Frame fetch failed: {0}")]
    DeviceFetch(String),

    #[error("Cannot {operation} while camera is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Cannot solve rig geometry: {0}")]
    InvalidGeometry(String),

    #[error("No stereo calibration available")]
    MissingCalibration,

    #[error("Device not found")]
    DeviceNotFound,

    #[error("Parameter {0:?} is not supported by this device")]
    UnsupportedParameter(DeviceParam),

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JPEG decode error: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Reason text of a staging failure once folded into a fetch fault.
    pub fn into_fetch_reason(self) -> String {
        match self {
            Error::DeviceFetch(reason) => reason,
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
