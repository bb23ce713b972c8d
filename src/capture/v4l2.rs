//! V4L2 frame producer over memory-mapped buffers

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
    capture::frame::{Frame, FrameMetadata, PixelFormat},
    capture::FrameSource,
    CaptureConfig,
};

/// Driver format code for `format`
pub fn fourcc(format: PixelFormat) -> FourCC {
    FourCC::new(match format {
        PixelFormat::Mjpeg => b"MJPG",
        PixelFormat::Rgb24 => b"RGB3",
        PixelFormat::Bgr24 => b"BGR3",
        PixelFormat::Bgra8 => b"BGR4",
        PixelFormat::Rgba8 => b"AB24",
        PixelFormat::Yuyv4 => b"YUYV",
        PixelFormat::Nv12 => b"NV12",
    })
}

/// Inverse of [`fourcc`]
pub fn pixel_format(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"MJPG" => Some(PixelFormat::Mjpeg),
        b"RGB3" => Some(PixelFormat::Rgb24),
        b"BGR3" => Some(PixelFormat::Bgr24),
        b"BGR4" => Some(PixelFormat::Bgra8),
        b"AB24" => Some(PixelFormat::Rgba8),
        b"YUYV" => Some(PixelFormat::Yuyv4),
        b"NV12" => Some(PixelFormat::Nv12),
        _ => None,
    }
}

pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    buffer_count: u32,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    sequence: u64,
}

impl V4l2Capture {
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        info!("Initializing V4L2 capture: {:?}", config.device);

        let device = Device::with_path(&config.device.path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = fourcc(config.device.format);

        // The driver may adjust any of these; trust what it hands back
        let fmt = device.set_format(&fmt)?;
        let format = pixel_format(fmt.fourcc)
            .ok_or_else(|| eyre!("Driver selected unknown format {}", fmt.fourcc))?;
        if format != config.device.format {
            warn!(
                "Requested {:?}, driver selected {:?}",
                config.device.format, format
            );
        }
        info!(
            "Capture format {}x{} {:?} (stride {})",
            fmt.width, fmt.height, format, fmt.stride
        );

        if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
            warn!("Failed to set {} fps: {}", config.fps, e);
        }

        Ok(Self {
            device: Box::new(device),
            stream: None,
            buffer_count: config.buffer_count,
            width: fmt.width,
            height: fmt.height,
            stride: fmt.stride,
            format,
            sequence: 0,
        })
    }

    pub fn start_stream(&mut self) -> Result<()> {
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;

        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }
}

impl FrameSource for V4l2Capture {
    #[instrument(skip(self))]
    fn next_frame(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| eyre!("Stream not started"))?;

        let (buf, meta) = stream.next()?;
        let timestamp = Instant::now();

        // Some drivers leave bytesused unset for raw formats
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let data = Bytes::copy_from_slice(&buf[..used]);

        self.sequence += 1;

        let frame_meta = Arc::new(FrameMetadata {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: self.format,
        });

        Ok(Frame {
            data,
            meta: frame_meta,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_mapping_is_invertible() {
        for format in [
            PixelFormat::Bgra8,
            PixelFormat::Rgba8,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Yuyv4,
            PixelFormat::Mjpeg,
            PixelFormat::Nv12,
        ] {
            assert_eq!(pixel_format(fourcc(format)), Some(format));
        }
    }

    #[test]
    fn unknown_fourcc_has_no_format() {
        assert_eq!(pixel_format(FourCC::new(b"H264")), None);
    }
}
