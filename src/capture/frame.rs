use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

impl Frame {
    /// Wrap a packed buffer whose stride equals `width * bytes_per_pixel`
    pub fn packed(sequence: u64, width: u32, height: u32, format: PixelFormat, data: Bytes) -> Self {
        // Saturates so an impossible width fails the payload check instead of wrapping
        let stride = format
            .bytes_per_pixel()
            .map_or(width, |bpp| width.saturating_mul(bpp));

        Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride,
                format,
            }),
            timestamp: Instant::now(),
        }
    }

    /// Time since the producer captured this frame
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of `data`
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats a producer may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Bgra8,
    Rgba8,
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for compressed or planar ones
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => Some(4),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg | PixelFormat::Nv12 => None,
        }
    }
}
