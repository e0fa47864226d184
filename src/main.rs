//! Stillview: live camera view with on-demand long-exposure FITS capture

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stillview::capture::{CameraDevice, SimulatedCamera};
use stillview::storage::PersistenceSink;
use stillview::{Config, Pipeline, PipelineEvent, PipelineHandle};

#[derive(Parser, Debug)]
#[command(name = "stillview")]
#[command(about = "Live camera view with on-demand FITS capture")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "stillview.toml")]
    config: PathBuf,

    /// V4L2 device path (auto-detected when omitted)
    #[arg(short, long)]
    device: Option<String>,

    /// Use the simulated camera
    #[arg(long)]
    simulate: bool,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Frames to capture at startup
    #[arg(short = 'n', long, default_value = "0")]
    captures: u32,

    /// Directory for saved images
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporting: {e}");
    }
    init_tracing();

    if let Err(report) = try_main(Args::parse()) {
        error!("fatal: {report:#}");
        eprintln!("{report:?}");
        eprintln!("Press Enter to exit");
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stillview=info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.init();
}

fn try_main(args: Args) -> Result<()> {
    info!("Stillview launching...");

    let mut config = Config::load(Some(args.config.as_path()))?;
    if let Some(device) = args.device.clone() {
        config.capture.device = device;
    }
    if let Some(dir) = args.output_dir.clone() {
        config.storage.output_dir = dir;
    }
    config.capture.simulate |= args.simulate;

    if config.capture.simulate {
        let camera = SimulatedCamera::new(
            config.capture.sim_width,
            config.capture.sim_height,
            config.capture.buffer_count as usize,
        )
        .realtime(true);
        info!("Using simulated camera");
        run(camera, &config, &args)
    } else {
        let camera = open_v4l2(&mut config)?;
        run(camera, &config, &args)
    }
}

#[cfg(feature = "v4l2")]
fn open_v4l2(config: &mut Config) -> Result<stillview::capture::V4l2Camera> {
    if config.capture.device.is_empty() {
        stillview::utils::auto_detect_device()?.apply_to(&mut config.capture);
    }
    info!("Using capture device: {}", config.capture.device);
    Ok(stillview::capture::V4l2Camera::open(
        &config.capture.device,
        config.capture.buffer_count as usize,
    )?)
}

#[cfg(not(feature = "v4l2"))]
fn open_v4l2(_config: &mut Config) -> Result<SimulatedCamera> {
    Err(eyre!("built without V4L2 support; use --simulate"))
}

fn run<D: CameraDevice + 'static>(device: D, config: &Config, args: &Args) -> Result<()> {
    let sink = PersistenceSink::fits(&config.storage.output_dir);
    sink.ensure_dir()?;
    info!("Saving images to {}", sink.dir().display());

    let (handle, acquisition) = Pipeline::spawn(device, sink, config)?;
    for _ in 0..args.captures {
        handle.request_capture();
    }

    let outcome = if args.headless {
        run_headless(&handle, args.captures > 0)
    } else {
        run_window(&handle, &acquisition, config)
    };

    handle.shutdown();
    let joined = acquisition.join();
    info!(
        frames = handle.frames_published(),
        "Stillview shutting down"
    );
    outcome?;
    joined?;
    Ok(())
}

/// Wait for the requested batch, or for Ctrl-C when nothing was requested.
fn run_headless(handle: &PipelineHandle, until_complete: bool) -> Result<()> {
    let interrupt = handle.clone();
    ctrlc::set_handler(move || {
        info!("Interrupted");
        interrupt.shutdown();
    })?;

    while !handle.is_shutting_down() {
        match handle.events().recv_timeout(Duration::from_millis(100)) {
            Ok(PipelineEvent::FrameSaved(path)) => info!("Saved {}", path.display()),
            Ok(PipelineEvent::SaveFailed(reason)) => warn!(%reason, "frame was not saved"),
            Ok(PipelineEvent::CaptureComplete) if until_complete => {
                info!("All captures complete");
                break;
            }
            Ok(PipelineEvent::CaptureComplete) => {}
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

#[cfg(feature = "display")]
fn run_window(
    handle: &PipelineHandle,
    acquisition: &stillview::pipeline::AcquisitionThread,
    config: &Config,
) -> Result<()> {
    use stillview::display::{Sdl2Display, ViewSettings};

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let settings =
        ViewSettings::from_exposures(config.exposure.live_seconds, config.exposure.capture_seconds);
    let mut app = Sdl2Display::new(&sdl_context, &config.display)?.with_settings(settings);
    app.run(handle, acquisition)
}

#[cfg(not(feature = "display"))]
fn run_window(
    _handle: &PipelineHandle,
    _acquisition: &stillview::pipeline::AcquisitionThread,
    _config: &Config,
) -> Result<()> {
    Err(eyre!("built without display support; use --headless"))
}
