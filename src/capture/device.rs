//! Device boundary and the owned session around it

use tracing::{debug, info, instrument, warn};

use crate::capture::frame::Eye;
use crate::capture::mode::{CameraMode, DeviceParam, ProcessingMode, EXPOSURE_PER_SECOND_RANGE};
use crate::error::{Error, Result};

/// Native calls of a stereo camera.
///
/// Implementations wrap one physical (or simulated) device. They are driven
/// exclusively through [`DeviceSession`], which enforces the open/close
/// ordering, so implementations may assume they are never opened twice.
pub trait StereoDevice: Send + 'static {
    fn open(&mut self, location_id: i32, ar_size: f32, mode: CameraMode) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Blocks until the hardware has a new stereo pair and stages it internally.
    fn pre_fetch(&mut self, processing: ProcessingMode) -> Result<()>;

    /// Copies the staged RGB24 image of `eye` into `buffer`.
    fn fetch_eye(&mut self, buffer: &mut [u8], eye: Eye) -> Result<()>;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn set_sync_mode(&mut self, enabled: bool) -> Result<()>;

    fn param(&self, param: DeviceParam) -> Result<i32>;

    fn set_param(&mut self, param: DeviceParam, value: i32) -> Result<()>;

    /// Sets the exposure from a rate, given the sensor clock factor of the open mode.
    fn set_exposure_per_second(&mut self, mode: CameraMode, rate: i32) -> Result<()> {
        let rate = rate.clamp(*EXPOSURE_PER_SECOND_RANGE.start(), *EXPOSURE_PER_SECOND_RANGE.end());
        let exposure = DeviceParam::Exposure.clamp(mode.exposure_factor() / rate);
        self.set_param(DeviceParam::Exposure, exposure)
    }
}

impl<D: StereoDevice + ?Sized> StereoDevice for Box<D> {
    fn open(&mut self, location_id: i32, ar_size: f32, mode: CameraMode) -> Result<()> {
        (**self).open(location_id, ar_size, mode)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn pre_fetch(&mut self, processing: ProcessingMode) -> Result<()> {
        (**self).pre_fetch(processing)
    }

    fn fetch_eye(&mut self, buffer: &mut [u8], eye: Eye) -> Result<()> {
        (**self).fetch_eye(buffer, eye)
    }

    fn width(&self) -> u32 {
        (**self).width()
    }

    fn height(&self) -> u32 {
        (**self).height()
    }

    fn set_sync_mode(&mut self, enabled: bool) -> Result<()> {
        (**self).set_sync_mode(enabled)
    }

    fn param(&self, param: DeviceParam) -> Result<i32> {
        (**self).param(param)
    }

    fn set_param(&mut self, param: DeviceParam, value: i32) -> Result<()> {
        (**self).set_param(param, value)
    }

    fn set_exposure_per_second(&mut self, mode: CameraMode, rate: i32) -> Result<()> {
        (**self).set_exposure_per_second(mode, rate)
    }
}

/// Where and how the device is opened.
#[derive(Debug, Clone, Copy)]
pub struct OpenParams {
    pub location_id: i32,
    pub ar_size: f32,
    pub mode: CameraMode,
}

#[derive(Debug, Clone, Copy)]
struct OpenState {
    mode: CameraMode,
    width: u32,
    height: u32,
}

/// Explicitly owned handle on a [`StereoDevice`].
///
/// Owning the device value is what guarantees a single live session per
/// device; the session itself guarantees strictly alternating open/close.
pub struct DeviceSession<D: StereoDevice> {
    device: D,
    open: Option<OpenState>,
}

impl<D: StereoDevice> DeviceSession<D> {
    pub fn new(device: D) -> Self {
        Self { device, open: None }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Opens the device and returns the image dimensions it reports.
    #[instrument(skip(self))]
    pub fn open(&mut self, params: OpenParams) -> Result<(u32, u32)> {
        if self.open.is_some() {
            return Err(Error::InvalidState {
                operation: "open device session",
                state: "open",
            });
        }

        self.device
            .open(params.location_id, params.ar_size, params.mode)
            .map_err(|e| match e {
                Error::DeviceOpen { .. } => e,
                other => Error::DeviceOpen {
                    mode: params.mode,
                    reason: other.to_string(),
                },
            })?;

        let (width, height) = (self.device.width(), self.device.height());
        if (width, height) != (params.mode.width(), params.mode.height()) {
            warn!(
                "Device reports {}x{} for mode {}",
                width, height, params.mode
            );
        }
        info!("Stereo camera opened: {}x{} per eye", width, height);

        self.open = Some(OpenState {
            mode: params.mode,
            width,
            height,
        });
        Ok((width, height))
    }

    #[instrument(skip(self))]
    pub fn close(&mut self) -> Result<()> {
        if self.open.is_none() {
            return Err(Error::InvalidState {
                operation: "close device session",
                state: "closed",
            });
        }

        // A failed close still leaves the handle unusable.
        self.open = None;
        self.device.close().map_err(|e| match e {
            Error::DeviceClose(_) => e,
            other => Error::DeviceClose(other.to_string()),
        })?;
        debug!("Stereo camera closed");
        Ok(())
    }

    /// Disabled means free-running capture without external frame sync.
    pub fn set_sync_mode(&mut self, enabled: bool) -> Result<()> {
        self.require_open("set sync mode")?;
        self.device.set_sync_mode(enabled)
    }

    pub fn mode(&self) -> Option<CameraMode> {
        self.open.map(|state| state.mode)
    }

    /// Image dimensions reported at the last successful open.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.open.map(|state| (state.width, state.height))
    }

    pub fn pre_fetch(&mut self, processing: ProcessingMode) -> Result<()> {
        self.require_open("fetch frames")?;
        self.device.pre_fetch(processing)
    }

    pub fn fetch_eye(&mut self, buffer: &mut [u8], eye: Eye) -> Result<()> {
        self.require_open("fetch frames")?;
        self.device.fetch_eye(buffer, eye)
    }

    pub fn param(&self, param: DeviceParam) -> Result<i32> {
        self.require_open("read parameters")?;
        self.device.param(param)
    }

    pub fn set_param(&mut self, param: DeviceParam, value: i32) -> Result<()> {
        self.require_open("write parameters")?;
        self.device.set_param(param, param.clamp(value))
    }

    pub fn set_exposure_per_second(&mut self, rate: i32) -> Result<()> {
        let mode = self
            .mode()
            .ok_or(Error::InvalidState {
                operation: "write parameters",
                state: "closed",
            })?;
        self.device.set_exposure_per_second(mode, rate)
    }

    fn require_open(&self, operation: &'static str) -> Result<()> {
        if self.open.is_some() {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: "closed",
            })
        }
    }
}
