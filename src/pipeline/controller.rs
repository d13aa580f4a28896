//! Stereo camera lifecycle and the once-per-render-tick frame relay
//!
//! `Unconfigured -> Configured -> Started -> Stopped`, with `Stopped` allowed
//! to start again or be reconfigured. Out-of-order calls raise
//! [`Error::InvalidState`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use bytes::Bytes;
use flume::{Receiver, Sender};
use tracing::{debug, info, instrument, warn};

use crate::capture::device::{DeviceSession, OpenParams, StereoDevice};
use crate::capture::frame::{
    stereo_buffers, CaptureBuffer, Eye, FrameMetadata, PixelFormat, StereoBuffers, StereoFrame,
};
use crate::capture::mode::{CameraMode, DeviceParam};
use crate::error::{Error, Result};
use crate::params::ParameterAccess;
use crate::pipeline::pump;
use crate::pipeline::relay::{Delivery, FrameRelay, RelayStats};
use crate::rig::{self, StereoCalibration, StereoRig, ViewTarget};
use crate::{CaptureConfig, PipelineConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Unconfigured,
    Configured,
    Started,
    Stopped,
}

impl CameraState {
    fn name(self) -> &'static str {
        match self {
            CameraState::Unconfigured => "unconfigured",
            CameraState::Configured => "configured",
            CameraState::Started => "started",
            CameraState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Notifications fired on the controlling thread, never from the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraEvent {
    Configured,
    Started,
    Stopped,
    ImagesUpdated,
}

/// VR tracking collaborator re-centred whenever the camera is configured.
pub trait TrackingOrigin: Send {
    fn recenter(&mut self);
}

pub struct StereoCamera<D: StereoDevice> {
    capture: CaptureConfig,
    pipeline: PipelineConfig,
    state: CameraState,
    mode: CameraMode,
    calibration: Option<StereoCalibration>,
    relay: FrameRelay<D>,
    running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
    /// Consumer-visible copies of the last relayed frame
    images: StereoBuffers,
    sequence: u64,
    relayed_at: Option<Instant>,
    tracking: Option<Box<dyn TrackingOrigin>>,
    listeners: Vec<Sender<CameraEvent>>,
}

impl<D: StereoDevice> StereoCamera<D> {
    pub fn new(device: D, capture: CaptureConfig, pipeline: PipelineConfig) -> Self {
        Self {
            mode: capture.mode,
            capture,
            pipeline,
            state: CameraState::Unconfigured,
            calibration: None,
            relay: FrameRelay::new(DeviceSession::new(device)),
            running: Arc::new(AtomicBool::new(false)),
            pump: None,
            images: stereo_buffers(0, 0),
            sequence: 0,
            relayed_at: None,
            tracking: None,
            listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == CameraState::Started
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    /// Receives every event fired after this call.
    pub fn subscribe(&mut self) -> Receiver<CameraEvent> {
        let (tx, rx) = flume::unbounded();
        self.listeners.push(tx);
        rx
    }

    pub fn set_tracking_origin(&mut self, tracking: Box<dyn TrackingOrigin>) {
        self.tracking = Some(tracking);
    }

    #[instrument(skip(self, calibration))]
    pub fn configure(
        &mut self,
        mode: CameraMode,
        calibration: Option<StereoCalibration>,
    ) -> Result<()> {
        self.require_not_started("configure")?;

        self.state = CameraState::Unconfigured;
        if let Some(tracking) = self.tracking.as_mut() {
            tracking.recenter();
        }
        self.mode = mode;
        self.calibration = calibration;
        self.images = stereo_buffers(mode.width(), mode.height());
        self.sequence = 0;
        self.relayed_at = None;
        self.state = CameraState::Configured;

        info!("Stereo camera configured for {}", mode);
        self.emit(CameraEvent::Configured);
        Ok(())
    }

    /// Opens the device, sizes the buffers and launches the pump.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            CameraState::Unconfigured | CameraState::Started => {
                return Err(Error::InvalidState {
                    operation: "start",
                    state: self.state.name(),
                })
            }
            CameraState::Configured | CameraState::Stopped => {}
        }

        let (width, height) = {
            let mut shared = self.relay.lock();
            let dims = shared.session.open(OpenParams {
                location_id: self.capture.location_id,
                ar_size: self.capture.ar_size,
                mode: self.mode,
            })?;
            if let Err(e) = shared.session.set_sync_mode(self.capture.sync_mode) {
                close_quietly(&mut shared.session);
                return Err(e);
            }
            shared.reset(dims.0, dims.1);
            dims
        };
        self.images = stereo_buffers(width, height);
        self.sequence = 0;
        self.relayed_at = None;

        self.running.store(true, Ordering::Release);
        match pump::spawn(
            self.relay.clone(),
            Arc::clone(&self.running),
            self.capture.processing,
            &self.pipeline,
        ) {
            Ok(handle) => self.pump = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::Release);
                close_quietly(&mut self.relay.lock().session);
                return Err(e);
            }
        }

        self.state = CameraState::Started;
        info!("Stereo camera started: {}x{} per eye", width, height);
        self.emit(CameraEvent::Started);
        Ok(())
    }

    /// Stops the pump and closes the device.
    ///
    /// The camera ends up `Stopped` even when the close call fails; the
    /// close error is still returned.
    #[instrument(skip(self))]
    pub fn stop(&mut self) -> Result<()> {
        if self.state != CameraState::Started {
            return Err(Error::InvalidState {
                operation: "stop",
                state: self.state.name(),
            });
        }

        self.running.store(false, Ordering::Release);
        self.relay.wake_pump();
        // Taking the lock waits out any in-flight fetch before closing.
        let closed = self.relay.lock().session.close();
        self.join_pump();

        self.state = CameraState::Stopped;
        info!("Stereo camera stopped");
        self.emit(CameraEvent::Stopped);
        closed
    }

    /// Runs once per consumer frame.
    ///
    /// Returns `Ok(true)` when new images were copied in, `Ok(false)` when the
    /// previous images remain current. A capture fault stops the camera and is
    /// returned here, after the `Stopped` notification.
    pub fn tick(&mut self) -> Result<bool> {
        if self.state != CameraState::Started {
            return Ok(false);
        }

        match self.relay.relay_into(&mut self.images) {
            Delivery::Idle => Ok(false),
            Delivery::Frame(sequence) => {
                self.sequence = sequence;
                self.relayed_at = Some(Instant::now());
                self.emit(CameraEvent::ImagesUpdated);
                Ok(true)
            }
            Delivery::Fault(fault) => {
                warn!("Capture fault, stopping stereo camera: {}", fault);
                self.halt();
                Err(fault)
            }
        }
    }

    pub fn image(&self, eye: Eye) -> &CaptureBuffer {
        &self.images[eye.index()]
    }

    pub fn images(&self) -> &StereoBuffers {
        &self.images
    }

    /// Size of each eye image; `None` until configured.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let image = &self.images[0];
        (!image.is_empty()).then(|| (image.width(), image.height()))
    }

    /// Snapshot of the last relayed images for other threads.
    pub fn frame(&self) -> Option<StereoFrame> {
        let timestamp = self.relayed_at?;
        let (width, height) = self.dimensions()?;
        Some(StereoFrame {
            left: Bytes::copy_from_slice(self.image(Eye::Left).as_slice()),
            right: Bytes::copy_from_slice(self.image(Eye::Right).as_slice()),
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width,
                height,
                stride: width * 3,
                format: PixelFormat::Rgb24,
            }),
            timestamp,
        })
    }

    /// Virtual camera setup for the current image size and calibration.
    pub fn solve_rig(&self, target: ViewTarget) -> Result<StereoRig> {
        let (width, height) = self.dimensions().ok_or(Error::InvalidState {
            operation: "solve rig",
            state: self.state.name(),
        })?;
        rig::solve(width, height, target, self.calibration.as_ref())
    }

    pub fn stats(&self) -> RelayStats {
        self.relay.stats()
    }

    fn halt(&mut self) {
        self.running.store(false, Ordering::Release);
        self.relay.wake_pump();
        self.join_pump();
        close_quietly(&mut self.relay.lock().session);
        self.state = CameraState::Stopped;
        self.emit(CameraEvent::Stopped);
    }

    fn join_pump(&mut self) {
        if let Some(handle) = self.pump.take() {
            if handle.join().is_err() {
                warn!("Frame pump thread panicked");
            }
        }
    }

    fn require_not_started(&self, operation: &'static str) -> Result<()> {
        if self.state == CameraState::Started {
            Err(Error::InvalidState {
                operation,
                state: self.state.name(),
            })
        } else {
            Ok(())
        }
    }

    fn emit(&mut self, event: CameraEvent) {
        debug!(?event, "Camera event");
        self.listeners.retain(|tx| tx.send(event).is_ok());
    }
}

fn close_quietly<D: StereoDevice>(session: &mut DeviceSession<D>) {
    if session.is_open() {
        if let Err(e) = session.close() {
            warn!("Failed to close stereo camera: {}", e);
        }
    }
}

impl<D: StereoDevice> ParameterAccess for StereoCamera<D> {
    fn is_started(&self) -> bool {
        StereoCamera::is_started(self)
    }

    fn current_mode(&self) -> Option<CameraMode> {
        self.is_started().then_some(self.mode)
    }

    fn param(&self, param: DeviceParam) -> Result<i32> {
        self.relay.lock().session.param(param)
    }

    fn set_param(&mut self, param: DeviceParam, value: i32) -> Result<()> {
        self.relay.lock().session.set_param(param, value)
    }

    fn set_exposure_per_second(&mut self, rate: i32) -> Result<()> {
        self.relay.lock().session.set_exposure_per_second(rate)
    }
}

impl<D: StereoDevice> Drop for StereoCamera<D> {
    fn drop(&mut self) {
        if self.state == CameraState::Started {
            if let Err(e) = self.stop() {
                warn!("Stereo camera did not stop cleanly: {}", e);
            }
        }
    }
}
