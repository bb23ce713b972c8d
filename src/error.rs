//! Error taxonomy: fatal construction errors and per-frame drops

use thiserror::Error;

use crate::capture::frame::PixelFormat;
use crate::pipeline::RunState;

/// Failures that abort construction of the pipeline. Nothing runs without these resources.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create rendering surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("failed to request GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("surface is not supported by the selected adapter")]
    UnsupportedSurface,

    #[error("failed to build {program}: {message}")]
    ProgramBuild {
        program: &'static str,
        message: String,
    },

    #[error("texture cache needs a capacity of at least one entry")]
    TextureCache,
}

/// Failures that abandon the run for a single frame. The next frame starts fresh.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("pixel format {0:?} cannot be mapped to a GPU texture")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("failed to create {width}x{height} texture")]
    TextureCreationFailed { width: u32, height: u32 },

    #[error("frame has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },

    #[error("frame payload is {actual} bytes, expected at least {expected}")]
    TruncatedFrame { expected: usize, actual: usize },

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("invalid run transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunState, to: RunState },
}

impl FrameError {
    /// Short label used for the dropped-frame counter
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedPixelFormat(_) => "unsupported_format",
            Self::TextureCreationFailed { .. } => "texture_creation",
            Self::ZeroArea { .. } => "zero_area",
            Self::TruncatedFrame { .. } => "truncated",
            Self::Decode(_) => "decode",
            Self::InvalidTransition { .. } => "invalid_transition",
        }
    }
}
