//! V4L2 backend for UVC stereo cameras delivering side-by-side frames

use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::decode::{decode_frame, split_side_by_side};
use crate::capture::device::StereoDevice;
use crate::capture::frame::{image_data_size, Eye, PixelFormat};
use crate::capture::mode::{CameraMode, DeviceParam, ProcessingMode};
use crate::error::{Error, Result};
use crate::CaptureConfig;

const V4L2_CID_BRIGHTNESS_BASE: u32 = 0x0098_0900;
const V4L2_CID_AUTO_WHITE_BALANCE: u32 = V4L2_CID_BRIGHTNESS_BASE + 12;
const V4L2_CID_RED_BALANCE: u32 = V4L2_CID_BRIGHTNESS_BASE + 14;
const V4L2_CID_BLUE_BALANCE: u32 = V4L2_CID_BRIGHTNESS_BASE + 15;
const V4L2_CID_GAIN: u32 = V4L2_CID_BRIGHTNESS_BASE + 19;
const V4L2_CID_BACKLIGHT_COMPENSATION: u32 = V4L2_CID_BRIGHTNESS_BASE + 28;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

fn control_id(param: DeviceParam) -> Option<u32> {
    match param {
        DeviceParam::Exposure => Some(V4L2_CID_EXPOSURE_ABSOLUTE),
        DeviceParam::Gain => Some(V4L2_CID_GAIN),
        DeviceParam::BlackLightCompensation => Some(V4L2_CID_BACKLIGHT_COMPENSATION),
        DeviceParam::WhiteBalanceAuto => Some(V4L2_CID_AUTO_WHITE_BALANCE),
        DeviceParam::WhiteBalanceRed => Some(V4L2_CID_RED_BALANCE),
        DeviceParam::WhiteBalanceBlue => Some(V4L2_CID_BLUE_BALANCE),
        DeviceParam::WhiteBalanceGreen => None,
    }
}

struct OpenDevice {
    // Declared first so the stream is released before the device handle.
    stream: MmapStream<'static>,
    device: Device,
    mode: CameraMode,
}

/// Stereo camera exposed by V4L2 as one `2W x H` side-by-side stream
pub struct V4l2StereoDevice {
    path: String,
    format: PixelFormat,
    buffer_count: u32,
    open: Option<OpenDevice>,
    /// Decoded side-by-side RGB24 frame staged by `pre_fetch`
    frame: Vec<u8>,
}

impl V4l2StereoDevice {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            path: config.device.path.clone(),
            format: config.device.format,
            buffer_count: config.buffer_count,
            open: None,
            frame: Vec::new(),
        }
    }

    fn open_device(&self, mode: CameraMode) -> Result<OpenDevice> {
        let device = Device::with_path(&self.path)?;

        // Query capabilities
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(Error::DeviceOpen {
                mode,
                reason: "device doesn't support video capture".into(),
            });
        }

        // Set format
        let mut fmt = device.format()?;
        fmt.width = mode.width() * 2;
        fmt.height = mode.height();
        fmt.fourcc = match self.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        };
        let applied = device.set_format(&fmt)?;
        if applied.width != fmt.width || applied.height != fmt.height {
            return Err(Error::DeviceOpen {
                mode,
                reason: format!(
                    "driver negotiated {}x{} instead of {}x{}",
                    applied.width, applied.height, fmt.width, fmt.height
                ),
            });
        }
        device.set_params(&Parameters::with_fps(mode.fps()))?;

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, self.buffer_count)?;
        info!(
            "Capture stream started with {} buffers",
            self.buffer_count
        );

        Ok(OpenDevice {
            stream,
            device,
            mode,
        })
    }

    fn opened(&self) -> Result<&OpenDevice> {
        self.open
            .as_ref()
            .ok_or_else(|| Error::DeviceFetch("stream not started".into()))
    }
}

impl StereoDevice for V4l2StereoDevice {
    #[instrument(skip(self))]
    fn open(&mut self, location_id: i32, ar_size: f32, mode: CameraMode) -> Result<()> {
        info!("Opening V4L2 stereo camera: {}", self.path);
        let opened = self.open_device(mode).map_err(|e| match e {
            Error::DeviceOpen { .. } => e,
            other => Error::DeviceOpen {
                mode,
                reason: other.to_string(),
            },
        })?;
        self.frame = vec![0; 2 * image_data_size(mode.width(), mode.height())];
        self.open = Some(opened);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = None;
        self.frame = Vec::new();
        Ok(())
    }

    fn pre_fetch(&mut self, processing: ProcessingMode) -> Result<()> {
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| Error::DeviceFetch("stream not started".into()))?;
        let (width, height) = (open.mode.width(), open.mode.height());

        // Blocks until the driver hands over a filled buffer
        let (buf, meta) = open.stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());

        decode_frame(&buf[..used], self.format, width * 2, height, &mut self.frame)?;

        if processing != ProcessingMode::None {
            debug!(?processing, "Processing is done on-device for V4L2 cameras");
        }
        Ok(())
    }

    fn fetch_eye(&mut self, buffer: &mut [u8], eye: Eye) -> Result<()> {
        let mode = self.opened()?.mode;
        split_side_by_side(&self.frame, mode.width(), mode.height(), eye.index(), buffer)
    }

    fn width(&self) -> u32 {
        self.open.as_ref().map_or(0, |open| open.mode.width())
    }

    fn height(&self) -> u32 {
        self.open.as_ref().map_or(0, |open| open.mode.height())
    }

    fn set_sync_mode(&mut self, enabled: bool) -> Result<()> {
        debug!(enabled, "UVC cameras have no frame sync control");
        Ok(())
    }

    fn param(&self, param: DeviceParam) -> Result<i32> {
        let id = control_id(param).ok_or(Error::UnsupportedParameter(param))?;
        let control = self.opened()?.device.control(id)?;
        match control.value {
            Value::Integer(value) => Ok(value as i32),
            Value::Boolean(value) => Ok(value as i32),
            _ => Err(Error::UnsupportedParameter(param)),
        }
    }

    fn set_param(&mut self, param: DeviceParam, value: i32) -> Result<()> {
        let id = control_id(param).ok_or(Error::UnsupportedParameter(param))?;
        let value = match param {
            DeviceParam::WhiteBalanceAuto => Value::Boolean(value != 0),
            _ => Value::Integer(value as i64),
        };
        self.opened()?.device.set_control(Control { id, value })?;
        Ok(())
    }
}
