//! Stereo camera capture with SDL2 preview

use std::path::{Path, PathBuf};
use std::sync::Arc;

use color_eyre::Result;
use stereocam::capture::{StereoDevice, SyntheticDevice, V4l2StereoDevice};
use stereocam::rig::StereoCalibration;
use stereocam::{utils, Backend, Config, StereoCamera};
use tracing::info;

fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stereocam=debug"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Stereo camera launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    stereocam::CONFIG.store(Arc::new(config.clone()));

    let mut capture_config = config.capture.clone();
    let device: Box<dyn StereoDevice> = match capture_config.backend {
        Backend::Synthetic => Box::new(SyntheticDevice::new()),
        Backend::V4l2 => {
            // Auto-detect capture device if needed
            if capture_config.device.path.is_empty() {
                capture_config.device = utils::auto_detect_device()?;
            }
            info!("Using capture device: {:?}", capture_config.device);
            Box::new(V4l2StereoDevice::new(&capture_config))
        }
    };

    let calibration = match &capture_config.calibration_path {
        Some(path) => Some(StereoCalibration::load(Path::new(path))?),
        None => None,
    };

    let mode = capture_config.mode;
    let mut camera = StereoCamera::new(device, capture_config, config.pipeline.clone());
    camera.configure(mode, calibration)?;
    camera.start()?;

    let mut parameters = config.parameters.clone();
    parameters.on_started(&mut camera)?;
    info!(
        exposure = parameters.exposure(),
        gain = parameters.gain(),
        "Camera parameters synchronised"
    );

    let rig = camera.solve_rig(config.rig.target())?;
    for eye in &rig.eyes {
        info!(
            "{} eye: fov {:.2} deg, plane at {:.1}, far clip {:.1}, K = {:?}",
            eye.eye,
            eye.field_of_view,
            eye.plane_distance,
            eye.far_clip,
            eye.camera_matrix.as_slice()
        );
    }

    let result = run(&mut camera);

    if camera.is_started() {
        camera.stop()?;
    }
    let stats = camera.stats();
    info!(
        "Relayed {} of {} staged frames ({} idle ticks)",
        stats.frames_relayed, stats.frames_staged, stats.idle_ticks
    );

    info!("Stereo camera shutting down");
    result
}

#[cfg(feature = "display")]
fn run(camera: &mut StereoCamera<Box<dyn StereoDevice>>) -> Result<()> {
    use color_eyre::eyre::eyre;
    use stereocam::display::StereoDisplay;

    let (width, height) = camera
        .dimensions()
        .ok_or_else(|| eyre!("Camera has no image size"))?;

    // Initialize SDL2
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;

    // Both eyes at half size, side by side
    let mut app = StereoDisplay::new(&sdl_context, width, height / 2)?;
    app.run(&sdl_context, camera)
}

#[cfg(not(feature = "display"))]
fn run(camera: &mut StereoCamera<Box<dyn StereoDevice>>) -> Result<()> {
    use std::time::{Duration, Instant};

    // Headless: tick at roughly display rate for a few seconds
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut updates = 0u64;
    while Instant::now() < deadline {
        if camera.tick()? {
            updates += 1;
        }
        std::thread::sleep(Duration::from_millis(11));
    }
    info!("Received {} stereo frames", updates);
    Ok(())
}
