//! GStreamer frame producer delivering BGRA, which the GPU ingests without CPU conversion

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{info, instrument};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::FrameSource;
use crate::CaptureConfig;

pub struct GstCapture {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    sequence: u64,
}

impl GstCapture {
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        gst::init().map_err(|e| eyre!("Failed to initialize GStreamer: {}", e))?;

        info!("Initializing GStreamer capture pipeline");

        let pipeline_str = Self::pipeline_string(config);
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| eyre!("Failed to create pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| eyre!("Failed to find appsink element"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| eyre!("Failed to cast to AppSink"))?;

        // Latest frame only; stale buffers are dropped inside GStreamer
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 1u32);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        Ok(Self {
            pipeline,
            appsink,
            sequence: 0,
        })
    }

    fn pipeline_string(config: &CaptureConfig) -> String {
        let decode = match config.device.format {
            PixelFormat::Mjpeg => format!(
                "image/jpeg,width={},height={},framerate={}/1 ! jpegdec ! ",
                config.width, config.height, config.fps
            ),
            _ => format!(
                "video/x-raw,width={},height={},framerate={}/1 ! ",
                config.width, config.height, config.fps
            ),
        };
        format!(
            "v4l2src device={} ! {}\
             queue max-size-buffers=2 max-size-time=0 max-size-bytes=0 ! \
             videoconvert ! video/x-raw,format=BGRA ! \
             appsink name=appsink",
            config.device.path, decode
        )
    }

    pub fn start_stream(&mut self) -> Result<()> {
        info!("Starting GStreamer pipeline");

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| eyre!("Failed to start pipeline: {:?}", e))?;

        let (state_change, _, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        match state_change {
            Ok(gst::StateChangeSuccess::Success) => info!("Pipeline started"),
            Ok(gst::StateChangeSuccess::Async) => info!("Pipeline starting asynchronously"),
            _ => return Err(eyre!("Failed to start pipeline")),
        }
        Ok(())
    }

    pub fn stop_stream(&mut self) -> Result<()> {
        info!("Stopping GStreamer pipeline");

        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| eyre!("Failed to stop pipeline: {:?}", e))?;

        Ok(())
    }
}

impl FrameSource for GstCapture {
    #[instrument(skip(self))]
    fn next_frame(&mut self) -> Result<Frame> {
        let sample = self
            .appsink
            .pull_sample()
            .map_err(|_| eyre!("Failed to pull sample from pipeline"))?;
        let timestamp = Instant::now();

        let buffer = sample
            .buffer()
            .ok_or_else(|| eyre!("Sample contains no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|_| eyre!("Failed to map buffer"))?;
        let data = Bytes::copy_from_slice(map.as_slice());

        let caps = sample.caps().ok_or_else(|| eyre!("Sample has no caps"))?;
        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| eyre!("Failed to parse video info from caps"))?;
        let stride = video_info
            .stride()
            .first()
            .copied()
            .ok_or_else(|| eyre!("Video info has no planes"))?;

        self.sequence += 1;

        let meta = Arc::new(FrameMetadata {
            sequence: self.sequence,
            width: video_info.width(),
            height: video_info.height(),
            stride: stride as u32,
            format: PixelFormat::Bgra8,
        });

        Ok(Frame {
            data,
            meta,
            timestamp,
        })
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}
