//! Background loop pulling stereo frames from the device into the relay

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::capture::device::StereoDevice;
use crate::capture::mode::ProcessingMode;
use crate::error::Result;
use crate::pipeline::relay::FrameRelay;
use crate::PipelineConfig;

/// Spawns the pump thread.
///
/// The loop runs while `running` is set. It needs no sleep: the device fetch
/// blocks until the hardware delivers, which paces it. The first staging
/// failure is left in the relay as the pending fault and ends the thread.
pub fn spawn<D: StereoDevice>(
    relay: FrameRelay<D>,
    running: Arc<AtomicBool>,
    processing: ProcessingMode,
    config: &PipelineConfig,
) -> Result<JoinHandle<()>> {
    let pump_core = config.pump_core;
    let handle = thread::Builder::new()
        .name(config.pump_thread_name.clone())
        .spawn(move || {
            if let Some(id) = pump_core {
                if core_affinity::set_for_current(core_affinity::CoreId { id }) {
                    debug!("Frame pump pinned to core {}", id);
                } else {
                    warn!("Failed to pin frame pump to core {}", id);
                }
            }
            run(&relay, &running, processing);
        })?;
    Ok(handle)
}

fn run<D: StereoDevice>(relay: &FrameRelay<D>, running: &AtomicBool, processing: ProcessingMode) {
    info!("Frame pump started");

    while running.load(Ordering::Acquire) {
        let mut shared = relay.lock();

        // Stop closes the device under this lock; re-check before touching it.
        if !running.load(Ordering::Acquire) {
            break;
        }

        match relay.stage(&mut shared, processing) {
            Ok(true) => {}
            // Previous frame not consumed yet
            Ok(false) => relay.wait_for_consumer(shared, running),
            Err(e) => {
                error!("Frame pump stopped: {}", e);
                return;
            }
        }
    }

    info!("Frame pump finished");
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::capture::device::{DeviceSession, OpenParams};
    use crate::capture::frame::stereo_buffers;
    use crate::capture::mode::CameraMode;
    use crate::capture::synthetic::SyntheticDevice;
    use crate::pipeline::relay::Delivery;

    fn open_relay(device: SyntheticDevice) -> FrameRelay<SyntheticDevice> {
        let relay = FrameRelay::new(DeviceSession::new(device));
        {
            let mut shared = relay.lock();
            let (w, h) = shared
                .session
                .open(OpenParams {
                    location_id: 0,
                    ar_size: 1.0,
                    mode: CameraMode::Qvga320x240At120,
                })
                .unwrap();
            shared.reset(w, h);
        }
        relay
    }

    fn wait_until(mut ready: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ready() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn pending_frame_parks_pump_until_relayed() {
        let device = SyntheticDevice::new();
        let probe = device.probe();
        let relay = open_relay(device);
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn(
            relay.clone(),
            Arc::clone(&running),
            ProcessingMode::Demosaic,
            &PipelineConfig::default(),
        )
        .unwrap();

        wait_until(|| relay.lock().frame_ready());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(probe.frames(), 1);
        assert_eq!(relay.stats().frames_staged, 1);

        let mut images = stereo_buffers(320, 240);
        assert!(matches!(relay.relay_into(&mut images), Delivery::Frame(1)));
        wait_until(|| relay.stats().frames_staged == 2);

        running.store(false, Ordering::Release);
        relay.wake_pump();
        handle.join().unwrap();
    }

    #[test]
    fn cleared_running_flag_releases_parked_pump() {
        let relay = open_relay(SyntheticDevice::new());
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn(
            relay.clone(),
            Arc::clone(&running),
            ProcessingMode::Demosaic,
            &PipelineConfig::default(),
        )
        .unwrap();
        wait_until(|| relay.lock().frame_ready());

        running.store(false, Ordering::Release);
        relay.wake_pump();
        let started = Instant::now();
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        // Still pending, nothing was consumed.
        assert!(relay.lock().frame_ready());
    }
}
