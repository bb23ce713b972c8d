//! CPU expansion of frames the GPU cannot sample directly

use crate::error::FrameError;

use super::frame::{Frame, PixelFormat};

/// Tightly packed RGBA8 pixels
#[derive(Debug)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Expand `frame` into RGBA8. Only called for formats without a direct GPU mapping.
pub fn decode_to_rgba(frame: &Frame) -> Result<RgbaImage, FrameError> {
    let meta = &frame.meta;
    match meta.format {
        PixelFormat::Rgb24 => expand_rgb(&frame.data, meta.width, meta.height, meta.stride, [0, 1, 2]),
        PixelFormat::Bgr24 => expand_rgb(&frame.data, meta.width, meta.height, meta.stride, [2, 1, 0]),
        PixelFormat::Mjpeg => decode_jpeg(&frame.data),
        format => Err(FrameError::UnsupportedPixelFormat(format)),
    }
}

/// Check that `data` holds `height` rows of `stride` bytes
pub fn check_payload(data: &[u8], stride: u32, height: u32) -> Result<(), FrameError> {
    let expected = stride as usize * height as usize;
    if data.len() < expected {
        return Err(FrameError::TruncatedFrame {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn expand_rgb(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    order: [usize; 3],
) -> Result<RgbaImage, FrameError> {
    let row_bytes = width as usize * 3;
    if (stride as usize) < row_bytes {
        return Err(FrameError::TruncatedFrame {
            expected: row_bytes,
            actual: stride as usize,
        });
    }
    check_payload(data, stride, height)?;

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for row in data.chunks(stride as usize).take(height as usize) {
        for px in row[..row_bytes].chunks_exact(3) {
            pixels.extend_from_slice(&[px[order[0]], px[order[1]], px[order[2]], 255]);
        }
    }

    Ok(RgbaImage {
        width,
        height,
        pixels,
    })
}

fn decode_jpeg(data: &[u8]) -> Result<RgbaImage, FrameError> {
    let mut decoder = zune_jpeg::JpegDecoder::new(data);
    let decoded = decoder
        .decode()
        .map_err(|e| FrameError::Decode(e.to_string()))?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| FrameError::Decode("missing JPEG dimensions".into()))?;

    let area = width * height;
    let pixels = if decoded.len() == area * 4 {
        decoded
    } else if decoded.len() == area * 3 {
        let mut rgba = Vec::with_capacity(area * 4);
        for px in decoded.chunks_exact(3) {
            rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
        }
        rgba
    } else if decoded.len() == area {
        decoded.iter().flat_map(|&l| [l, l, l, 255]).collect()
    } else {
        return Err(FrameError::Decode(format!(
            "unexpected JPEG output of {} bytes for {}x{}",
            decoded.len(),
            width,
            height
        )));
    };

    Ok(RgbaImage {
        width: width as u32,
        height: height as u32,
        pixels,
    })
}
