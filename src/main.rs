//! Live fisheye viewer: camera frames through the GPU pipeline onto a window

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use color_eyre::Result;
use fisheye::capture::{self, FrameSource};
use fisheye::display::{self, AppEvent};
use fisheye::{utils, CaptureConfig, Config, FramePipeline};
use tracing::{error, info};
use tracing_subscriber::{fmt::time::uptime, prelude::*, EnvFilter};
use winit::event_loop::EventLoop;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Fisheye launching...");

    let mut config = Config::load("fisheye.toml")?;

    // Auto-detect capture device if needed
    if config.capture.device.path.is_empty() {
        config.capture.device = utils::auto_detect_device()?;
    }
    info!("Using capture device: {:?}", config.capture.device);

    let event_loop = EventLoop::<AppEvent>::with_user_event().build()?;
    let shutdown = Arc::new(AtomicBool::new(false));

    let proxy = event_loop.create_proxy();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = proxy.send_event(AppEvent::Shutdown);
        }
    });

    let runtime = tokio::runtime::Handle::current();
    let capture_config = config.capture.clone();
    let producer_core = config.pipeline.producer_core;
    let producer_shutdown = shutdown.clone();
    let start_producer = Box::new(move |pipeline: Arc<FramePipeline>| {
        runtime.spawn_blocking(move || {
            if let Some(core) = producer_core {
                utils::pin_current_thread(core);
            }
            match open_source(&capture_config) {
                Ok(mut source) => {
                    capture::run_producer(source.as_mut(), pipeline.as_ref(), &producer_shutdown)
                }
                Err(e) => error!("Failed to open capture device: {}", e),
            }
        });
    });

    display::run_display(event_loop, config, shutdown, start_producer)?;

    info!("Fisheye shutting down");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fisheye=info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_timer(uptime()));

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

#[cfg(feature = "gstreamer-pipeline")]
fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    let mut capture = capture::GstCapture::new(config)?;
    capture.start_stream()?;
    Ok(Box::new(capture))
}

#[cfg(not(feature = "gstreamer-pipeline"))]
fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    let mut capture = capture::V4l2Capture::new(config)?;
    capture.start_stream()?;
    Ok(Box::new(capture))
}
