use crate::capture::frame::PixelFormat;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Maps a V4L2 fourcc to the formats the stereo backend can decode.
pub fn pixel_format(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"MJPG" => Some(PixelFormat::Mjpeg),
        b"YUYV" => Some(PixelFormat::Yuyv4),
        b"RGB3" => Some(PixelFormat::Rgb24),
        _ => None,
    }
}

/// Auto-detect a stereo capture device.
///
/// Side-by-side UVC stereo cameras report a single capture node, so the first
/// node with a decodable format is taken, preferring MJPEG.
pub fn auto_detect_device() -> Result<FoundDevice> {
    use std::path::Path;

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
        // Check for capture capability
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        for fmt in dev.enum_formats().unwrap_or_default() {
            match pixel_format(fmt.fourcc) {
                Some(PixelFormat::Mjpeg) => {
                    info!("Found MJPEG device: {} - {}", path, caps.card);
                    return Ok(FoundDevice::new(path, PixelFormat::Mjpeg));
                }
                Some(format) if fallback.is_none() => {
                    debug!("Candidate {:?} device: {} - {}", format, path, caps.card);
                    fallback = Some(FoundDevice::new(path.clone(), format));
                }
                _ => {}
            }
        }
    }

    fallback.ok_or(Error::DeviceNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_mapping() {
        assert_eq!(pixel_format(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpeg));
        assert_eq!(pixel_format(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv4));
        assert_eq!(pixel_format(FourCC::new(b"NV12")), None);
    }
}
