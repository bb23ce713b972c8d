//! Per-frame crop and distort runs, published for the presenter

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, info, instrument};
use wgpu::CommandEncoderDescriptor;

use crate::capture::{Frame, FrameSink};
use crate::error::{FrameError, InitError};
use crate::gpu::crop::square_side;
use crate::gpu::{FisheyeKernel, FisheyeModifier, GpuContext, SquareCropper, TextureCache};
use crate::layout::LayoutController;
use crate::{EffectConfig, PipelineConfig};

use super::{ProcessedFrame, PublishedSlot, RunState};

/// Turns each incoming frame into a cropped, distorted texture and publishes it.
///
/// A run holds the run lock from ingestion until the GPU has finished, so a frame arriving
/// while another is in flight waits for it. This is the producer's backpressure: capture is
/// throttled to GPU throughput instead of queueing.
pub struct FramePipeline {
    gpu: Arc<GpuContext>,
    textures: TextureCache,
    cropper: SquareCropper,
    fisheye: FisheyeKernel,
    modifier: FisheyeModifier,
    layout: Arc<LayoutController>,
    published: Arc<PublishedSlot>,
    run: Mutex<RunState>,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
}

impl FramePipeline {
    #[instrument(skip_all)]
    pub fn new(
        gpu: Arc<GpuContext>,
        config: &PipelineConfig,
        effect: &EffectConfig,
    ) -> Result<Self, InitError> {
        info!("Building frame pipeline");

        let textures = TextureCache::new(
            gpu.clone(),
            config.texture_cache_capacity,
            config.max_texture_age,
        )?;
        let cropper = SquareCropper::new(gpu.clone())?;
        let fisheye = FisheyeKernel::new(gpu.clone())?;

        Ok(Self {
            gpu,
            textures,
            cropper,
            fisheye,
            modifier: FisheyeModifier::new(effect.modifier),
            layout: Arc::new(LayoutController::new(effect.layout())),
            published: Arc::new(PublishedSlot::new()),
            run: Mutex::new(RunState::Idle),
            in_flight: AtomicU32::new(0),
            peak_in_flight: AtomicU32::new(0),
        })
    }

    pub fn gpu(&self) -> &Arc<GpuContext> {
        &self.gpu
    }

    pub fn layout(&self) -> &Arc<LayoutController> {
        &self.layout
    }

    pub fn published(&self) -> &Arc<PublishedSlot> {
        &self.published
    }

    /// Takes effect from the next frame
    pub fn set_modifier(&self, value: f32) {
        self.modifier.set(value);
    }

    pub fn modifier(&self) -> f32 {
        self.modifier.get()
    }

    /// Most runs ever seen executing at the same time
    pub fn peak_in_flight(&self) -> u32 {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    /// Run `frame` through the pipeline, blocking until the result is published
    #[instrument(skip_all, fields(sequence = frame.meta.sequence))]
    pub fn process(&self, frame: &Frame) -> Result<Arc<ProcessedFrame>, FrameError> {
        let mut state = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        let running = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::AcqRel);

        let result = self.run_locked(&mut state, frame);
        if result.is_err() {
            *state = RunState::Idle;
        }
        self.textures.flush();

        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        result
    }

    fn run_locked(
        &self,
        state: &mut RunState,
        frame: &Frame,
    ) -> Result<Arc<ProcessedFrame>, FrameError> {
        state.advance(RunState::Idle)?;
        let source = self.textures.ingest(frame)?;
        let side = square_side(source.size);

        state.advance(RunState::Cropping)?;
        let cropped = self.gpu.create_processed_texture("Cropped Frame", side)?;
        let cropped_view = cropped.create_view(&Default::default());
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        self.cropper
            .encode(&mut encoder, &source.view, &cropped_view, side);

        state.advance(RunState::Distorting)?;
        let distorted = ProcessedFrame::new(
            frame.meta.sequence,
            self.gpu.create_processed_texture("Distorted Frame", side)?,
        );
        let modifier = self.modifier.get();
        self.fisheye.encode(
            &mut encoder,
            &cropped_view,
            &distorted.view,
            distorted.size,
            modifier,
        );

        // Throttle point: the producer's callback returns only once the GPU is done
        self.gpu.submit_and_wait(encoder.finish());
        drop(source);

        let distorted = Arc::new(distorted);
        self.published.publish(distorted.clone());
        state.advance(RunState::Published)?;

        self.layout.texture_resized(distorted.size);

        Ok(distorted)
    }
}

impl FrameSink for FramePipeline {
    fn accept_frame(&self, frame: &Frame) {
        let start = Instant::now();

        match self.process(frame) {
            Ok(_) => {
                metrics::counter!("frames_published").increment(1);
                metrics::histogram!("frame_pipeline_time_us")
                    .record(start.elapsed().as_micros() as f64);
                metrics::histogram!("frame_latency_us").record(frame.age().as_micros() as f64);
            }
            Err(e) => {
                debug!(sequence = frame.meta.sequence, "Dropping frame: {}", e);
                metrics::counter!("frames_dropped", "reason" => e.reason()).increment(1);
            }
        }
    }
}
