//! Mutex-guarded hand-off of staged stereo frames from the pump to the consumer
//!
//! The device session, both staging buffers, the frame-ready flag and the
//! pending fault live behind one lock. The pump stages under that lock; the
//! consumer copies out under it once per tick.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::utils::CachePadded;

use crate::capture::device::{DeviceSession, StereoDevice};
use crate::capture::frame::{stereo_buffers, Eye, StereoBuffers};
use crate::capture::mode::ProcessingMode;
use crate::error::{Error, Result};

/// Upper bound on one pump wait, so a cleared running flag is noticed even
/// without a wake-up.
const CONSUMER_WAIT: Duration = Duration::from_millis(10);

/// State shared between the pump thread and the consumer.
pub struct Shared<D: StereoDevice> {
    pub session: DeviceSession<D>,
    staging: StereoBuffers,
    frame_ready: bool,
    fault: Option<Error>,
    sequence: u64,
}

impl<D: StereoDevice> Shared<D> {
    /// Reallocates the staging buffers for a newly opened mode and drops
    /// anything left over from a previous stream.
    pub fn reset(&mut self, width: u32, height: u32) {
        self.staging = stereo_buffers(width, height);
        self.frame_ready = false;
        self.fault = None;
    }

    pub fn staging(&self) -> &StereoBuffers {
        &self.staging
    }

    pub fn frame_ready(&self) -> bool {
        self.frame_ready
    }

    /// Pump side: stages a new stereo pair unless one is still pending.
    ///
    /// Returns whether a frame was staged.
    fn stage(&mut self, processing: ProcessingMode) -> Result<bool> {
        if self.frame_ready {
            return Ok(false);
        }

        self.session.pre_fetch(processing)?;
        for eye in Eye::BOTH {
            let buffer = self.staging[eye.index()].as_mut_slice();
            self.session.fetch_eye(buffer, eye)?;
        }
        self.sequence += 1;
        self.frame_ready = true;
        Ok(true)
    }
}

/// What the consumer found in the relay on one tick.
#[derive(Debug)]
pub enum Delivery {
    /// A new frame was copied out; carries its sequence number.
    Frame(u64),
    Fault(Error),
    Idle,
}

#[derive(Default)]
struct Stats {
    frames_staged: AtomicU64,
    frames_relayed: AtomicU64,
    idle_ticks: AtomicU64,
    faults: AtomicU64,
}

/// Counters describing relay activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_staged: u64,
    pub frames_relayed: u64,
    pub idle_ticks: u64,
    pub faults: u64,
}

/// Cloneable handle on the shared relay state.
pub struct FrameRelay<D: StereoDevice> {
    shared: Arc<Mutex<Shared<D>>>,
    /// Signalled when a pending frame is consumed.
    consumed: Arc<Condvar>,
    stats: Arc<CachePadded<Stats>>,
}

impl<D: StereoDevice> Clone for FrameRelay<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            consumed: Arc::clone(&self.consumed),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<D: StereoDevice> FrameRelay<D> {
    pub fn new(session: DeviceSession<D>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                session,
                staging: stereo_buffers(0, 0),
                frame_ready: false,
                fault: None,
                sequence: 0,
            })),
            consumed: Arc::new(Condvar::new()),
            stats: Arc::new(CachePadded::new(Stats::default())),
        }
    }

    /// Staging panics are caught before the guard drops, so a poisoned
    /// lock still holds consistent state.
    pub fn lock(&self) -> MutexGuard<'_, Shared<D>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pump side: releases the lock and parks until the consumer takes the
    /// pending frame, `running` is cleared and [`wake_pump`](Self::wake_pump)
    /// called, or a short timeout passes.
    pub fn wait_for_consumer(&self, guard: MutexGuard<'_, Shared<D>>, running: &AtomicBool) {
        let (guard, _) = self
            .consumed
            .wait_timeout_while(guard, CONSUMER_WAIT, |shared| {
                shared.frame_ready && running.load(Ordering::Acquire)
            })
            .unwrap_or_else(PoisonError::into_inner);
        drop(guard);
    }

    pub fn wake_pump(&self) {
        self.consumed.notify_all();
    }

    /// Pump side: one staging attempt under an already held lock.
    ///
    /// Any error or panic is recorded as the pending fault and returned so
    /// the pump can terminate.
    pub fn stage(&self, shared: &mut Shared<D>, processing: ProcessingMode) -> Result<bool> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| shared.stage(processing)))
            .unwrap_or_else(|payload| Err(Error::DeviceFetch(panic_message(payload))));

        match outcome {
            Ok(staged) => {
                if staged {
                    self.stats.frames_staged.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("stereocam_frames_staged_total").increment(1);
                }
                Ok(staged)
            }
            Err(e) => {
                let reason = e.into_fetch_reason();
                shared.fault = Some(Error::DeviceFetch(reason.clone()));
                self.stats.faults.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("stereocam_capture_faults_total").increment(1);
                Err(Error::DeviceFetch(reason))
            }
        }
    }

    /// Consumer side: takes a pending fault, or copies a pending frame into
    /// `images`. A pending fault wins over a pending frame.
    pub fn relay_into(&self, images: &mut StereoBuffers) -> Delivery {
        let mut shared = self.lock();

        if let Some(fault) = shared.fault.take() {
            return Delivery::Fault(fault);
        }

        if !shared.frame_ready {
            self.stats.idle_ticks.fetch_add(1, Ordering::Relaxed);
            return Delivery::Idle;
        }

        for (dst, src) in images.iter_mut().zip(shared.staging.iter()) {
            dst.copy_from(src);
        }
        shared.frame_ready = false;
        let sequence = shared.sequence;
        drop(shared);
        self.consumed.notify_one();

        self.stats.frames_relayed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("stereocam_frames_relayed_total").increment(1);
        Delivery::Frame(sequence)
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            frames_staged: self.stats.frames_staged.load(Ordering::Relaxed),
            frames_relayed: self.stats.frames_relayed.load(Ordering::Relaxed),
            idle_ticks: self.stats.idle_ticks.load(Ordering::Relaxed),
            faults: self.stats.faults.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("device panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("device panicked: {}", message)
    } else {
        "device panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::OpenParams;
    use crate::capture::mode::CameraMode;
    use crate::capture::synthetic::{fill_value, SyntheticDevice};

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

    #[test]
    fn idle_relay_delivers_nothing() {
        let relay = open_relay(SyntheticDevice::new());
        let mut images = stereo_buffers(320, 240);
        assert!(matches!(relay.relay_into(&mut images), Delivery::Idle));
        assert_eq!(relay.stats().idle_ticks, 1);
    }

    #[test]
    fn pending_frame_is_not_overwritten() {
        let relay = open_relay(SyntheticDevice::new());
        {
            let mut shared = relay.lock();
            assert!(relay.stage(&mut shared, ProcessingMode::Demosaic).unwrap());
            assert!(!relay.stage(&mut shared, ProcessingMode::Demosaic).unwrap());
            assert!(shared.frame_ready());
        }

        let mut images = stereo_buffers(320, 240);
        assert!(matches!(relay.relay_into(&mut images), Delivery::Frame(1)));
        for image in &images {
            assert!(image.as_slice().iter().all(|&b| b == fill_value(1)));
        }
        assert!(!relay.lock().frame_ready());
    }

    #[test]
    fn fault_takes_priority_over_pending_frame() {
        let relay = open_relay(SyntheticDevice::builder().fail_fetch_after(1).build());
        {
            let mut shared = relay.lock();
            relay.stage(&mut shared, ProcessingMode::Demosaic).unwrap();
            // Force a second attempt while the first frame is still pending.
            shared.frame_ready = false;
            assert!(relay.stage(&mut shared, ProcessingMode::Demosaic).is_err());
            shared.frame_ready = true;
        }

        let mut images = stereo_buffers(320, 240);
        assert!(matches!(
            relay.relay_into(&mut images),
            Delivery::Fault(Error::DeviceFetch(_))
        ));
        // The fault is surfaced once.
        assert!(matches!(relay.relay_into(&mut images), Delivery::Frame(_)));
    }

    #[test]
    fn panics_become_fetch_faults() {
        let relay = open_relay(SyntheticDevice::builder().panic_fetch_after(0).build());
        let err = {
            let mut shared = relay.lock();
            relay.stage(&mut shared, ProcessingMode::Demosaic).unwrap_err()
        };
        assert!(err.to_string().contains("synthetic device crashed"));
        assert_eq!(relay.stats().faults, 1);
    }
}
