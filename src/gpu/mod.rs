//! WebGPU device ownership and the per-frame compute stages

pub mod crop;
pub mod fisheye;
pub mod ingest;
pub mod readback;

use tracing::{error, info, instrument};
use wgpu::*;

use crate::error::{FrameError, InitError};
use crate::layout::Size;

pub use crop::SquareCropper;
pub use fisheye::{FisheyeKernel, FisheyeModifier};
pub use ingest::{IngestedTexture, TextureCache};

/// Format of every texture the pipeline produces
pub const PROCESSED_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Adapter, device and the single shared submission queue
pub struct GpuContext {
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    pub threadgroup: ThreadgroupSize,
}

impl GpuContext {
    pub fn instance() -> Instance {
        Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        })
    }

    /// Device without a presentation surface
    pub async fn headless() -> Result<Self, InitError> {
        Self::from_instance(&Self::instance(), None).await
    }

    /// Device able to present to `surface` when given
    #[instrument(skip_all)]
    pub async fn from_instance(
        instance: &Instance,
        surface: Option<&Surface<'_>>,
    ) -> Result<Self, InitError> {
        // Get adapter - prefer high-performance
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(InitError::NoAdapter)?;

        let info = adapter.get_info();
        info!("GPU: {} ({:?})", info.name, info.backend);

        // Ask for everything the adapter reports so the compute shape reflects the hardware
        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("Fisheye GPU Device"),
                    required_features: Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: MemoryHints::Performance,
                },
                None,
            )
            .await?;

        device.on_uncaptured_error(Box::new(|e| error!("Uncaptured GPU error: {}", e)));

        let threadgroup = ThreadgroupSize::from_limits(&device.limits());
        info!(
            "Compute thread group {}x{}",
            threadgroup.width, threadgroup.height
        );

        Ok(Self {
            adapter,
            device,
            queue,
            threadgroup,
        })
    }

    /// Allocate a texture, mapping allocation failures to a per-frame error
    pub fn create_texture(&self, descriptor: &TextureDescriptor<'_>) -> Result<Texture, FrameError> {
        let Extent3d { width, height, .. } = descriptor.size;
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(FrameError::TextureCreationFailed { width, height });
        }

        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(descriptor);
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(texture),
            Some(_) => Err(FrameError::TextureCreationFailed { width, height }),
        }
    }

    /// Square texture the compute stages can write and the presenter can sample
    pub fn create_processed_texture(&self, label: &str, side: u32) -> Result<Texture, FrameError> {
        self.create_texture(&TextureDescriptor {
            label: Some(label),
            size: Extent3d {
                width: side,
                height: side,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: PROCESSED_FORMAT,
            usage: TextureUsages::STORAGE_BINDING
                | TextureUsages::TEXTURE_BINDING
                | TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    /// Build a compute pipeline from `source`, substituting the thread group shape
    pub(crate) fn create_compute_pipeline(
        &self,
        program: &'static str,
        source: &str,
        entry_point: &str,
        bind_group_layout: &BindGroupLayout,
    ) -> Result<ComputePipeline, InitError> {
        let source = self.threadgroup.specialize(source);

        self.device.push_error_scope(ErrorFilter::Validation);
        let shader = self.device.create_shader_module(ShaderModuleDescriptor {
            label: Some(program),
            source: ShaderSource::Wgsl(source.into()),
        });
        let layout = self.device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some(program),
            bind_group_layouts: &[bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = self.device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some(program),
            layout: Some(&layout),
            module: &shader,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });
        check_build(&self.device, program)?;

        Ok(pipeline)
    }

    /// Submit and block the caller until the GPU has finished the work
    pub fn submit_and_wait(&self, commands: CommandBuffer) {
        let index = self.queue.submit(Some(commands));
        self.device.poll(Maintain::WaitForSubmissionIndex(index));
    }
}

/// Pop a validation scope pushed before building `program`
pub(crate) fn check_build(device: &Device, program: &'static str) -> Result<(), InitError> {
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(()),
        Some(e) => Err(InitError::ProgramBuild {
            program,
            message: e.to_string(),
        }),
    }
}

/// Compute work group shape derived from the device's reported limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadgroupSize {
    pub width: u32,
    pub height: u32,
}

impl ThreadgroupSize {
    /// The width is the largest power of two whose square fits the invocation budget; the
    /// height takes the rest of the budget.
    pub fn from_limits(limits: &Limits) -> Self {
        let budget = limits.max_compute_invocations_per_workgroup.max(1);
        let mut width = 1u32;
        while u64::from(width * 2).pow(2) <= u64::from(budget) {
            width *= 2;
        }
        let width = width.min(limits.max_compute_workgroup_size_x).max(1);
        let height = (budget / width)
            .min(limits.max_compute_workgroup_size_y)
            .max(1);

        Self { width, height }
    }

    /// Work groups needed to cover every pixel of `size`
    pub fn grid(&self, size: Size) -> (u32, u32) {
        (
            size.width.div_ceil(self.width),
            size.height.div_ceil(self.height),
        )
    }

    fn specialize(&self, source: &str) -> String {
        source
            .replace("WORKGROUP_X", &self.width.to_string())
            .replace("WORKGROUP_Y", &self.height.to_string())
    }
}
