//! WebGPU presenter: draws the latest processed frame once per display refresh

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, trace, warn};
use wgpu::*;
use winit::window::Window;

use crate::error::InitError;
use crate::gpu::{check_build, GpuContext};
use crate::layout::{LayoutController, QuadGeometry, Size, Vertex};
use crate::pipeline::{ProcessedFrame, PublishedSlot};
use crate::DisplayConfig;

const POSITION_ATTRIBUTES: [VertexAttribute; 1] = vertex_attr_array![0 => Float32x2];
const TEX_COORD_ATTRIBUTES: [VertexAttribute; 1] = vertex_attr_array![1 => Float32x2];

/// How a tick reacts to a failed drawable acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceRecovery {
    Skip,
    Reconfigure,
}

fn surface_recovery(error: &SurfaceError) -> SurfaceRecovery {
    match error {
        SurfaceError::Outdated | SurfaceError::Lost => SurfaceRecovery::Reconfigure,
        _ => SurfaceRecovery::Skip,
    }
}

/// A tick draws only once both a published frame and a geometry exist
fn ready<F, G>(frame: Option<F>, geometry: Option<G>) -> Option<(F, G)> {
    frame.zip(geometry)
}

pub struct Presenter {
    gpu: Arc<GpuContext>,
    surface: Surface<'static>,
    surface_config: SurfaceConfiguration,
    pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    sampler: Sampler,
    positions: Buffer,
    tex_coords: Buffer,
    geometry: Option<Arc<QuadGeometry>>,
    bound: Option<(Arc<ProcessedFrame>, BindGroup)>,
    last_sequence: Option<u64>,
    layout: Arc<LayoutController>,
    published: Arc<PublishedSlot>,
    pub window: Arc<Window>,
}

impl Presenter {
    #[instrument(skip_all)]
    pub fn new(
        gpu: Arc<GpuContext>,
        window: Arc<Window>,
        surface: Surface<'static>,
        config: &DisplayConfig,
        layout: Arc<LayoutController>,
        published: Arc<PublishedSlot>,
    ) -> Result<Self, InitError> {
        info!("Initializing presenter");

        let surface_caps = surface.get_capabilities(&gpu.adapter);
        // Processed textures already hold display-encoded values
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or(InitError::UnsupportedSurface)?;
        let alpha_mode = if surface_caps.alpha_modes.contains(&CompositeAlphaMode::Opaque) {
            CompositeAlphaMode::Opaque
        } else {
            surface_caps
                .alpha_modes
                .first()
                .copied()
                .ok_or(InitError::UnsupportedSurface)?
        };

        let window_size = window.inner_size();
        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: window_size.width.max(1),
            height: window_size.height.max(1),
            present_mode: if config.vsync {
                PresentMode::Fifo
            } else {
                PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&gpu.device, &surface_config);
        info!(
            "Surface {}x{} {:?}",
            surface_config.width, surface_config.height, surface_format
        );

        let bind_group_layout = gpu
            .device
            .create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Display Bind Group Layout"),
                entries: &[
                    BindGroupLayoutEntry {
                        binding: 0,
                        visibility: ShaderStages::FRAGMENT,
                        ty: BindingType::Texture {
                            sample_type: TextureSampleType::Float { filterable: true },
                            view_dimension: TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    BindGroupLayoutEntry {
                        binding: 1,
                        visibility: ShaderStages::FRAGMENT,
                        ty: BindingType::Sampler(SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });
        let pipeline = Self::create_render_pipeline(&gpu.device, &bind_group_layout, surface_format)?;

        let sampler = gpu.device.create_sampler(&SamplerDescriptor {
            label: Some("Display Sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        let vertex_buffer = |label| {
            gpu.device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size: std::mem::size_of::<[Vertex; 4]>() as u64,
                usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let positions = vertex_buffer("Quad Positions");
        let tex_coords = vertex_buffer("Quad Texture Coordinates");

        layout.surface_resized(Size::new(surface_config.width, surface_config.height));

        Ok(Self {
            gpu,
            surface,
            surface_config,
            pipeline,
            bind_group_layout,
            sampler,
            positions,
            tex_coords,
            geometry: None,
            bound: None,
            last_sequence: None,
            layout,
            published,
            window,
        })
    }

    /// Reconfigure the drawable and force a geometry recomputation
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to {}x{}", width, height);
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.gpu.device, &self.surface_config);
        self.layout.surface_resized(Size::new(width, height));
    }

    /// One display tick. A no-op until both a frame and geometry exist.
    pub fn render(&mut self) {
        let Some((_, geometry)) = ready(self.published.latest(), self.layout.geometry()) else {
            return;
        };

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(e) => {
                match surface_recovery(&e) {
                    SurfaceRecovery::Reconfigure => {
                        debug!("Surface {}, reconfiguring", e);
                        self.surface.configure(&self.gpu.device, &self.surface_config);
                    }
                    SurfaceRecovery::Skip if matches!(e, SurfaceError::Timeout) => {
                        trace!("Drawable unavailable, skipping tick");
                    }
                    SurfaceRecovery::Skip => warn!("Surface error: {}", e),
                }
                return;
            }
        };

        let Some(frame) = self.published.acquire() else {
            return;
        };
        let render_start = Instant::now();

        if self.last_sequence == Some(frame.sequence) {
            metrics::counter!("frames_repeated").increment(1);
        }
        self.last_sequence = Some(frame.sequence);

        self.upload_geometry(geometry);
        self.bind(frame);
        let Some((_, bind_group)) = &self.bound else {
            return;
        };

        let view = output
            .texture
            .create_view(&TextureViewDescriptor::default());
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::BLACK),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_vertex_buffer(0, self.positions.slice(..));
            render_pass.set_vertex_buffer(1, self.tex_coords.slice(..));
            render_pass.set_bind_group(0, bind_group, &[]);
            render_pass.draw(0..4, 0..1);
        }

        // Submit commands
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        let render_time = render_start.elapsed();
        metrics::histogram!("render_time_us").record(render_time.as_micros() as f64);
    }

    fn upload_geometry(&mut self, geometry: Arc<QuadGeometry>) {
        if self
            .geometry
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &geometry))
        {
            return;
        }
        self.gpu
            .queue
            .write_buffer(&self.positions, 0, bytemuck::cast_slice(&geometry.positions));
        self.gpu
            .queue
            .write_buffer(&self.tex_coords, 0, bytemuck::cast_slice(&geometry.tex_coords));
        self.geometry = Some(geometry);
    }

    /// Bind groups are rebuilt only when a new frame was published
    fn bind(&mut self, frame: Arc<ProcessedFrame>) {
        if matches!(&self.bound, Some((bound, _)) if Arc::ptr_eq(bound, &frame)) {
            return;
        }
        let bind_group = self.gpu.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Display Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&frame.view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        self.bound = Some((frame, bind_group));
    }

    fn create_render_pipeline(
        device: &Device,
        bind_group_layout: &BindGroupLayout,
        format: TextureFormat,
    ) -> Result<RenderPipeline, InitError> {
        device.push_error_scope(ErrorFilter::Validation);

        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Display Shader"),
            source: ShaderSource::Wgsl(include_str!("quad.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Display Pipeline Layout"),
            bind_group_layouts: &[bind_group_layout],
            push_constant_ranges: &[],
        });

        let vertex_layout = |attributes| VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as BufferAddress,
            step_mode: VertexStepMode::Vertex,
            attributes,
        };

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Display Pipeline"),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[
                    vertex_layout(&POSITION_ATTRIBUTES),
                    vertex_layout(&TEX_COORD_ATTRIBUTES),
                ],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        });
        check_build(device, "Display Pipeline")?;

        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutParameters;

    #[test]
    fn tick_is_a_no_op_until_frame_and_geometry_exist() {
        let slot = PublishedSlot::<u64>::new();
        let layout = LayoutController::new(LayoutParameters::default());
        assert!(ready(slot.latest(), layout.geometry()).is_none());

        slot.publish(Arc::new(1));
        assert!(ready(slot.latest(), layout.geometry()).is_none());

        layout.surface_resized(Size::new(720, 720));
        layout.texture_resized(Size::new(1080, 1080));
        let (frame, geometry) = ready(slot.latest(), layout.geometry()).expect("ready to draw");
        assert_eq!(*frame, 1);
        assert_eq!(geometry.scale(), (1.0, 1.0));

        // Peeking must not count as presenting
        assert_eq!(slot.stats().presented, 0);
    }

    #[test]
    fn geometry_without_frame_does_not_draw() {
        let layout = LayoutController::new(LayoutParameters::default());
        layout.surface_resized(Size::new(720, 720));
        layout.texture_resized(Size::new(720, 720));
        assert!(ready(None::<Arc<u64>>, layout.geometry()).is_none());
    }

    #[test]
    fn surface_errors_skip_or_reconfigure() {
        assert_eq!(surface_recovery(&SurfaceError::Timeout), SurfaceRecovery::Skip);
        assert_eq!(surface_recovery(&SurfaceError::OutOfMemory), SurfaceRecovery::Skip);
        assert_eq!(
            surface_recovery(&SurfaceError::Outdated),
            SurfaceRecovery::Reconfigure
        );
        assert_eq!(surface_recovery(&SurfaceError::Lost), SurfaceRecovery::Reconfigure);
    }
}
