//! Fisheye compute kernel
//!
//! Every destination pixel `p` samples the source at `c + (p - c) * (1 - k * S * ρ)`, where
//! `c` is the texture centre, `ρ` the distance from `c` relative to the half diagonal, `k`
//! the modifier and `S` [`STRENGTH`]. Displacement grows with `ρ²` and with `k`; the centre
//! never moves and `k = 0` is the identity.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::{instrument, warn};
use wgpu::*;

use crate::error::InitError;
use crate::layout::Size;

use super::{GpuContext, PROCESSED_FORMAT};

/// Scale of the warp at modifier 1. Kept at or below 0.5 so the mapping stays monotonic in radius.
pub const STRENGTH: f32 = 0.5;

/// Host mirror of the shader's sampling position for the pixel centre `p`
pub fn source_position(p: [f32; 2], size: Size, modifier: f32) -> [f32; 2] {
    let centre = [size.width as f32 * 0.5, size.height as f32 * 0.5];
    let offset = [p[0] - centre[0], p[1] - centre[1]];
    let rho = offset[0].hypot(offset[1]) / centre[0].hypot(centre[1]);
    let factor = 1.0 - modifier * STRENGTH * rho;
    [centre[0] + offset[0] * factor, centre[1] + offset[1] * factor]
}

/// Distance between a pixel centre and the position it samples
pub fn displacement(p: [f32; 2], size: Size, modifier: f32) -> f32 {
    let s = source_position(p, size, modifier);
    (s[0] - p[0]).hypot(s[1] - p[1])
}

/// Warp strength in [0, 1], written by the controlling context and snapshotted once per frame
#[derive(Debug)]
pub struct FisheyeModifier(AtomicU32);

impl FisheyeModifier {
    pub fn new(value: f32) -> Self {
        let modifier = Self(AtomicU32::new(0f32.to_bits()));
        modifier.set(value);
        modifier
    }

    /// Clamp into [0, 1]; NaN is ignored
    pub fn set(&self, value: f32) {
        if value.is_nan() {
            warn!("Ignoring NaN fisheye modifier");
            return;
        }
        self.0
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FisheyeParams {
    modifier: f32,
    strength: f32,
    _pad: [f32; 2],
}

pub struct FisheyeKernel {
    gpu: Arc<GpuContext>,
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    params: Buffer,
}

impl FisheyeKernel {
    #[instrument(skip_all)]
    pub fn new(gpu: Arc<GpuContext>) -> Result<Self, InitError> {
        let bind_group_layout = gpu
            .device
            .create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Fisheye Bind Group Layout"),
                entries: &[
                    BindGroupLayoutEntry {
                        binding: 0,
                        visibility: ShaderStages::COMPUTE,
                        ty: BindingType::Texture {
                            sample_type: TextureSampleType::Float { filterable: false },
                            view_dimension: TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    BindGroupLayoutEntry {
                        binding: 1,
                        visibility: ShaderStages::COMPUTE,
                        ty: BindingType::StorageTexture {
                            access: StorageTextureAccess::WriteOnly,
                            format: PROCESSED_FORMAT,
                            view_dimension: TextureViewDimension::D2,
                        },
                        count: None,
                    },
                    BindGroupLayoutEntry {
                        binding: 2,
                        visibility: ShaderStages::COMPUTE,
                        ty: BindingType::Buffer {
                            ty: BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline = gpu.create_compute_pipeline(
            "Fisheye Pipeline",
            include_str!("fisheye.wgsl"),
            "fisheye",
            &bind_group_layout,
        )?;

        let params = gpu.device.create_buffer(&BufferDescriptor {
            label: Some("Fisheye Params"),
            size: std::mem::size_of::<FisheyeParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            gpu,
            pipeline,
            bind_group_layout,
            params,
        })
    }

    /// Record the warp of `source` into `destination`; both must be `size`.
    ///
    /// The parameter buffer is shared between calls, so runs must not overlap.
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        source: &TextureView,
        destination: &TextureView,
        size: Size,
        modifier: f32,
    ) {
        let params = FisheyeParams {
            modifier,
            strength: STRENGTH,
            _pad: [0.0; 2],
        };
        self.gpu
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&params));

        let bind_group = self.gpu.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Fisheye Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(source),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(destination),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: self.params.as_entire_binding(),
                },
            ],
        });

        let (x, y) = self.gpu.threadgroup.grid(size);
        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Fisheye Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, 1);
    }
}
