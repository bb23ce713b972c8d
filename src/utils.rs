use crate::capture::frame::PixelFormat;
use crate::capture::v4l2::pixel_format;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use v4l::{capability::Flags, video::Capture, Device};

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Preference among formats the pipeline can ingest; lower ranks first
fn format_rank(format: PixelFormat) -> Option<u8> {
    match format {
        PixelFormat::Mjpeg => Some(0),
        PixelFormat::Bgra8 | PixelFormat::Rgba8 => Some(1),
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(2),
        PixelFormat::Yuyv4 | PixelFormat::Nv12 => None,
    }
}

/// Best ingestible format among those a device offers
pub fn preferred_format(formats: impl IntoIterator<Item = PixelFormat>) -> Option<PixelFormat> {
    formats
        .into_iter()
        .filter_map(|f| format_rank(f).map(|rank| (rank, f)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, f)| f)
}

/// Auto-detect best capture device
pub fn auto_detect_device() -> Result<FoundDevice> {
    use std::path::Path;

    info!("Auto-detecting capture devices...");

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
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        if let Some(format) = preferred_format(formats.iter().filter_map(|f| pixel_format(f.fourcc))) {
            info!("Found {:?} device: {} - {}", format, path, caps.card);
            return Ok(FoundDevice { path, format });
        }
    }

    Err(eyre!("No suitable capture device found"))
}

/// Pin the calling thread to `core`, if it exists
pub fn pin_current_thread(core: usize) {
    let Some(id) = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core))
    else {
        warn!("CPU core {} not available, producer left unpinned", core);
        return;
    };
    if core_affinity::set_for_current(id) {
        info!("Producer pinned to core {}", core);
    } else {
        warn!("Failed to pin producer to core {}", core);
    }
}
