pub mod capture;
pub mod display;
pub mod error;
pub mod gpu;
pub mod layout;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

use crate::layout::{ContentMode, LayoutParameters, Rotation};
use crate::utils::FoundDevice;

pub use capture::{Frame, FrameSink};
pub use error::{FrameError, InitError};
pub use pipeline::FramePipeline;

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub effect: EffectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub vsync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ingestion textures kept alive between frames
    pub texture_cache_capacity: usize,
    /// Flushes an unused ingestion texture survives before eviction
    pub max_texture_age: u32,
    /// Pin the frame producer thread to this core
    pub producer_core: Option<usize>,
}

/// Initial values for the parameters the controlling context can change at runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectConfig {
    pub modifier: f32,
    pub rotation: Rotation,
    pub content_mode: ContentMode,
    pub mirrored: bool,
    pub front_facing: bool,
}

impl EffectConfig {
    pub fn layout(&self) -> LayoutParameters {
        LayoutParameters {
            rotation: self.rotation,
            content_mode: self.content_mode,
            mirrored: self.mirrored,
            front_facing: self.front_facing,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `FISHEYE__*` environment variables
    pub fn load(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("FISHEYE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: FoundDevice::new("/dev/video0".into(), PixelFormat::Mjpeg),
                width: 1280,
                height: 720,
                fps: 30,
                buffer_count: 4,
            },
            display: DisplayConfig {
                width: 720,
                height: 720,
                fullscreen: false,
                vsync: true,
            },
            pipeline: PipelineConfig {
                texture_cache_capacity: 2,
                max_texture_age: 1,
                producer_core: None,
            },
            effect: EffectConfig {
                modifier: 0.5,
                rotation: Rotation::Deg0,
                content_mode: ContentMode::Fit,
                mirrored: false,
                front_facing: false,
            },
        }
    }
}
