//! Deterministic simulated stereo camera
//!
//! Every staged frame is a solid fill whose byte value is derived from the
//! frame sequence number, identical for both eyes. A consumer can therefore
//! detect torn or mismatched frames by checking that all bytes agree. Delays
//! and failures can be injected at each stage of the device protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::capture::device::StereoDevice;
use crate::capture::frame::{image_data_size, Eye};
use crate::capture::mode::{CameraMode, DeviceParam, ProcessingMode};
use crate::error::{Error, Result};

/// Byte value every pixel of frame `sequence` is filled with.
pub fn fill_value(sequence: u64) -> u8 {
    (sequence % 251) as u8 + 1
}

/// Counters shared between a [`SyntheticDevice`] and the test observing it.
#[derive(Debug, Default)]
pub struct SyntheticProbe {
    opens: AtomicUsize,
    closes: AtomicUsize,
    frames: AtomicU64,
    active_fetchers: AtomicUsize,
    max_fetchers: AtomicUsize,
    sync_mode: AtomicBool,
}

impl SyntheticProbe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Frames staged by `pre_fetch` since creation.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Highest number of threads observed inside `pre_fetch` at once.
    pub fn max_concurrent_fetchers(&self) -> usize {
        self.max_fetchers.load(Ordering::SeqCst)
    }

    pub fn sync_mode(&self) -> bool {
        self.sync_mode.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
struct Faults {
    open: bool,
    close: bool,
    fetch_after: Option<u64>,
    panic_after: Option<u64>,
}

#[derive(Debug, Default)]
pub struct SyntheticDeviceBuilder {
    fetch_delay: Duration,
    eye_write_delay: Duration,
    faults: Faults,
}

impl SyntheticDeviceBuilder {
    /// Time `pre_fetch` blocks, standing in for the hardware frame interval.
    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Pause between writing the two halves of an eye image.
    pub fn eye_write_delay(mut self, delay: Duration) -> Self {
        self.eye_write_delay = delay;
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.faults.open = true;
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.faults.close = true;
        self
    }

    /// Fail the fetch following `frames` successful ones.
    pub fn fail_fetch_after(mut self, frames: u64) -> Self {
        self.faults.fetch_after = Some(frames);
        self
    }

    /// Panic in the fetch following `frames` successful ones.
    pub fn panic_fetch_after(mut self, frames: u64) -> Self {
        self.faults.panic_after = Some(frames);
        self
    }

    pub fn build(self) -> SyntheticDevice {
        SyntheticDevice {
            mode: None,
            sequence: 0,
            fetch_delay: self.fetch_delay,
            eye_write_delay: self.eye_write_delay,
            faults: self.faults,
            params: default_params(),
            probe: Arc::new(SyntheticProbe::default()),
        }
    }
}

fn default_params() -> HashMap<DeviceParam, i32> {
    HashMap::from([
        (DeviceParam::Exposure, 12960),
        (DeviceParam::Gain, 8),
        (DeviceParam::BlackLightCompensation, 32),
        (DeviceParam::WhiteBalanceAuto, 1),
        (DeviceParam::WhiteBalanceRed, 1474),
        (DeviceParam::WhiteBalanceGreen, 1024),
        (DeviceParam::WhiteBalanceBlue, 1738),
    ])
}

pub struct SyntheticDevice {
    mode: Option<CameraMode>,
    sequence: u64,
    fetch_delay: Duration,
    eye_write_delay: Duration,
    faults: Faults,
    params: HashMap<DeviceParam, i32>,
    probe: Arc<SyntheticProbe>,
}

impl SyntheticDevice {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SyntheticDeviceBuilder {
        SyntheticDeviceBuilder::default()
    }

    pub fn probe(&self) -> Arc<SyntheticProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl StereoDevice for SyntheticDevice {
    fn open(&mut self, location_id: i32, _ar_size: f32, mode: CameraMode) -> Result<()> {
        if self.faults.open {
            return Err(Error::DeviceOpen {
                mode,
                reason: format!("no device at location {}", location_id),
            });
        }
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        self.mode = Some(mode);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.mode = None;
        if self.faults.close {
            return Err(Error::DeviceClose("device did not acknowledge close".into()));
        }
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pre_fetch(&mut self, processing: ProcessingMode) -> Result<()> {
        let active = self.probe.active_fetchers.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_fetchers.fetch_max(active, Ordering::SeqCst);

        if !self.fetch_delay.is_zero() {
            thread::sleep(self.fetch_delay);
        }
        self.probe.active_fetchers.fetch_sub(1, Ordering::SeqCst);

        if self.faults.panic_after == Some(self.sequence) {
            panic!("synthetic device crashed at frame {}", self.sequence);
        }
        if self.faults.fetch_after == Some(self.sequence) {
            return Err(Error::DeviceFetch(format!(
                "synthetic device lost frame {}",
                self.sequence
            )));
        }

        self.sequence += 1;
        self.probe.frames.fetch_add(1, Ordering::SeqCst);
        trace!(sequence = self.sequence, ?processing, "Synthetic frame staged");
        Ok(())
    }

    fn fetch_eye(&mut self, buffer: &mut [u8], _eye: Eye) -> Result<()> {
        let expected = image_data_size(self.width(), self.height());
        if buffer.len() != expected {
            return Err(Error::BufferSize {
                expected,
                actual: buffer.len(),
            });
        }

        let value = fill_value(self.sequence);
        let (head, tail) = buffer.split_at_mut(expected / 2);
        head.fill(value);
        if !self.eye_write_delay.is_zero() {
            thread::sleep(self.eye_write_delay);
        }
        tail.fill(value);
        Ok(())
    }

    fn width(&self) -> u32 {
        self.mode.map_or(0, CameraMode::width)
    }

    fn height(&self) -> u32 {
        self.mode.map_or(0, CameraMode::height)
    }

    fn set_sync_mode(&mut self, enabled: bool) -> Result<()> {
        self.probe.sync_mode.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn param(&self, param: DeviceParam) -> Result<i32> {
        self.params
            .get(&param)
            .copied()
            .ok_or(Error::UnsupportedParameter(param))
    }

    fn set_param(&mut self, param: DeviceParam, value: i32) -> Result<()> {
        self.params.insert(param, param.clamp(value));
        Ok(())
    }
}
