//! Centered square crop of the ingested frame

use std::sync::Arc;

use tracing::instrument;
use wgpu::*;

use crate::error::InitError;
use crate::layout::Size;

use super::{GpuContext, PROCESSED_FORMAT};

/// Side of the square cut out of `size`
pub fn square_side(size: Size) -> u32 {
    size.width.min(size.height)
}

/// Top-left corner of the centered square inside `size`
pub fn crop_origin(size: Size) -> (u32, u32) {
    let side = square_side(size);
    ((size.width - side) / 2, (size.height - side) / 2)
}

pub struct SquareCropper {
    gpu: Arc<GpuContext>,
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
}

impl SquareCropper {
    #[instrument(skip_all)]
    pub fn new(gpu: Arc<GpuContext>) -> Result<Self, InitError> {
        let bind_group_layout = gpu
            .device
            .create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Crop Bind Group Layout"),
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
                ],
            });

        let pipeline = gpu.create_compute_pipeline(
            "Crop Pipeline",
            include_str!("crop.wgsl"),
            "crop_to_square",
            &bind_group_layout,
        )?;

        Ok(Self {
            gpu,
            pipeline,
            bind_group_layout,
        })
    }

    /// Record the crop of `source` into `destination`, whose side must be
    /// [`square_side`] of `source`. Nothing is submitted.
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        source: &TextureView,
        destination: &TextureView,
        side: u32,
    ) {
        let bind_group = self.gpu.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Crop Bind Group"),
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
            ],
        });

        let (x, y) = self.gpu.threadgroup.grid(Size::new(side, side));
        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Crop Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_is_the_shorter_dimension() {
        for (w, h) in [(1920, 1080), (1080, 1920), (1, 1), (7, 3), (640, 640)] {
            let side = square_side(Size::new(w, h));
            assert_eq!(side, w.min(h));
        }
    }

    #[test]
    fn origin_centers_the_square() {
        assert_eq!(crop_origin(Size::new(1920, 1080)), (420, 0));
        assert_eq!(crop_origin(Size::new(1080, 1920)), (0, 420));
        assert_eq!(crop_origin(Size::new(641, 640)), (0, 0));
        assert_eq!(crop_origin(Size::new(643, 640)), (1, 0));
    }
}
