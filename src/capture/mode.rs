//! Device operating modes and tunable sensor parameters

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Resolution and frame-rate combinations supported by the stereo camera.
///
/// The declaration order matches the native mode index passed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CameraMode {
    Full2560x1920At15,
    Fhd1920x1080At30,
    Sxgam1280x960At45,
    #[default]
    Vr960x950At60,
    Wxga1280x800At60,
    Vga640x480At90,
    Qvga320x240At120,
    Usb2Sxgam1280x960At15,
    Usb2Vga640x480At30,
}

impl CameraMode {
    pub const ALL: [CameraMode; 9] = [
        CameraMode::Full2560x1920At15,
        CameraMode::Fhd1920x1080At30,
        CameraMode::Sxgam1280x960At45,
        CameraMode::Vr960x950At60,
        CameraMode::Wxga1280x800At60,
        CameraMode::Vga640x480At90,
        CameraMode::Qvga320x240At120,
        CameraMode::Usb2Sxgam1280x960At15,
        CameraMode::Usb2Vga640x480At30,
    ];

    /// Native mode index understood by the device.
    pub fn index(self) -> i32 {
        self as i32
    }

    /// Per-eye image width in pixels.
    pub fn width(self) -> u32 {
        self.dimensions().0
    }

    /// Per-eye image height in pixels.
    pub fn height(self) -> u32 {
        self.dimensions().1
    }

    pub fn fps(self) -> u32 {
        match self {
            CameraMode::Full2560x1920At15 | CameraMode::Usb2Sxgam1280x960At15 => 15,
            CameraMode::Fhd1920x1080At30 | CameraMode::Usb2Vga640x480At30 => 30,
            CameraMode::Sxgam1280x960At45 => 45,
            CameraMode::Vr960x950At60 | CameraMode::Wxga1280x800At60 => 60,
            CameraMode::Vga640x480At90 => 90,
            CameraMode::Qvga320x240At120 => 120,
        }
    }

    /// Sensor clock factor relating raw exposure to exposures per second.
    pub fn exposure_factor(self) -> i32 {
        match self {
            CameraMode::Full2560x1920At15 => 480_000,
            CameraMode::Fhd1920x1080At30 => 570_580,
            CameraMode::Sxgam1280x960At45 => 720_113,
            CameraMode::Vr960x950At60 => 937_157,
            CameraMode::Wxga1280x800At60 => 783_274,
            CameraMode::Vga640x480At90 => 720_113,
            CameraMode::Qvga320x240At120 => 491_520,
            CameraMode::Usb2Sxgam1280x960At15 | CameraMode::Usb2Vga640x480At30 => 240_000,
        }
    }

    fn dimensions(self) -> (u32, u32) {
        match self {
            CameraMode::Full2560x1920At15 => (2560, 1920),
            CameraMode::Fhd1920x1080At30 => (1920, 1080),
            CameraMode::Sxgam1280x960At45 | CameraMode::Usb2Sxgam1280x960At15 => (1280, 960),
            CameraMode::Vr960x950At60 => (960, 950),
            CameraMode::Wxga1280x800At60 => (1280, 800),
            CameraMode::Vga640x480At90 | CameraMode::Usb2Vga640x480At30 => (640, 480),
            CameraMode::Qvga320x240At120 => (320, 240),
        }
    }
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        write!(f, "{}x{} @{}FPS", width, height, self.fps())
    }
}

/// On-device processing applied before the eye images are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    DemosaicRemap,
    #[default]
    Demosaic,
    None,
}

impl ProcessingMode {
    pub fn index(self) -> i32 {
        self as i32
    }
}

/// Sensor parameters reachable through the device boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceParam {
    Exposure,
    Gain,
    BlackLightCompensation,
    WhiteBalanceAuto,
    WhiteBalanceRed,
    WhiteBalanceGreen,
    WhiteBalanceBlue,
}

/// Valid exposures-per-second values.
pub const EXPOSURE_PER_SECOND_RANGE: RangeInclusive<i32> = 25..=240;

impl DeviceParam {
    /// Accepted value range. Boolean parameters use 0 and 1.
    pub fn range(self) -> RangeInclusive<i32> {
        match self {
            DeviceParam::Exposure => 0..=32767,
            DeviceParam::Gain => 0..=47,
            DeviceParam::BlackLightCompensation => 0..=1023,
            DeviceParam::WhiteBalanceAuto => 0..=1,
            DeviceParam::WhiteBalanceRed
            | DeviceParam::WhiteBalanceGreen
            | DeviceParam::WhiteBalanceBlue => 0..=4095,
        }
    }

    pub fn clamp(self, value: i32) -> i32 {
        let range = self.range();
        value.clamp(*range.start(), *range.end())
    }
}
