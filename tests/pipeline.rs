//! End-to-end runs of the frame pipeline on a headless adapter

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use fisheye::capture::PixelFormat;
use fisheye::gpu::fisheye::source_position;
use fisheye::gpu::readback::read_rgba;
use fisheye::gpu::GpuContext;
use fisheye::layout::{ContentMode, Size};
use fisheye::{Config, Frame, FrameError, FramePipeline, FrameSink};

const WIDTH: u32 = 1920;
const HEIGHT: u32 = 1080;
const SIDE: u32 = 1080;
const CROP_X: u32 = (WIDTH - SIDE) / 2;

fn pipeline(modifier: f32) -> Option<FramePipeline> {
    let gpu = match pollster::block_on(GpuContext::headless()) {
        Ok(gpu) => Arc::new(gpu),
        Err(e) => {
            eprintln!("skipping: no GPU adapter available ({e})");
            return None;
        }
    };
    let mut config = Config::default();
    config.effect.modifier = modifier;
    config.effect.content_mode = ContentMode::Fit;
    let pipeline = FramePipeline::new(gpu, &config.pipeline, &config.effect)
        .expect("pipeline should build on any adapter");
    Some(pipeline)
}

/// Smooth horizontal/vertical ramps, in RGB order
fn source_rgb(x: u32, y: u32) -> [u8; 3] {
    [
        (x * 255 / (WIDTH - 1)) as u8,
        (y * 255 / (HEIGHT - 1)) as u8,
        128,
    ]
}

fn bgra_frame(sequence: u64) -> Frame {
    let mut data = Vec::with_capacity((WIDTH * HEIGHT * 4) as usize);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let [r, g, b] = source_rgb(x, y);
            data.extend_from_slice(&[b, g, r, 255]);
        }
    }
    Frame::packed(sequence, WIDTH, HEIGHT, PixelFormat::Bgra8, Bytes::from(data))
}

fn pixel(pixels: &[u8], x: u32, y: u32) -> [u8; 4] {
    let i = ((y * SIDE + x) * 4) as usize;
    [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
}

/// Host-side bilinear sample of the cropped source, clamped at the edges
fn expected_warped(x: u32, y: u32, modifier: f32) -> [f32; 3] {
    let size = Size::new(SIDE, SIDE);
    let s = source_position([x as f32 + 0.5, y as f32 + 0.5], size, modifier);
    let p = [s[0] - 0.5, s[1] - 0.5];
    let base = [p[0].floor(), p[1].floor()];
    let t = [p[0] - base[0], p[1] - base[1]];

    let load = |dx: i32, dy: i32| {
        let cx = (base[0] as i32 + dx).clamp(0, SIDE as i32 - 1) as u32;
        let cy = (base[1] as i32 + dy).clamp(0, SIDE as i32 - 1) as u32;
        source_rgb(cx + CROP_X, cy).map(f32::from)
    };
    let lerp = |a: [f32; 3], b: [f32; 3], t: f32| {
        [
            a[0] + (b[0] - a[0]) * t,
            a[1] + (b[1] - a[1]) * t,
            a[2] + (b[2] - a[2]) * t,
        ]
    };

    let top = lerp(load(0, 0), load(1, 0), t[0]);
    let bottom = lerp(load(0, 1), load(1, 1), t[0]);
    lerp(top, bottom, t[1])
}

fn assert_close(actual: [u8; 4], expected: [f32; 3], tolerance: f32, at: (u32, u32)) {
    for channel in 0..3 {
        let diff = (actual[channel] as f32 - expected[channel]).abs();
        assert!(
            diff <= tolerance,
            "pixel {at:?} channel {channel}: got {}, expected {:.2}",
            actual[channel],
            expected[channel]
        );
    }
}

#[test]
fn zero_modifier_crops_exactly() {
    let Some(pipeline) = pipeline(0.0) else {
        return;
    };
    pipeline.layout().surface_resized(Size::new(SIDE, SIDE));

    let processed = pipeline.process(&bgra_frame(1)).expect("frame should process");
    assert_eq!(processed.size, Size::new(SIDE, SIDE));
    assert_eq!(processed.sequence, 1);

    let geometry = pipeline.layout().geometry().expect("geometry after first frame");
    assert_eq!(geometry.scale(), (1.0, 1.0));

    let pixels = read_rgba(pipeline.gpu(), &processed.texture).expect("readback");
    assert_eq!(pixels.len(), (SIDE * SIDE * 4) as usize);
    for y in (0..SIDE).step_by(7) {
        for x in (0..SIDE).step_by(5) {
            let [r, g, b] = source_rgb(x + CROP_X, y);
            assert_eq!(pixel(&pixels, x, y), [r, g, b, 255], "pixel ({x}, {y})");
        }
    }
}

#[test]
fn full_modifier_warps_towards_the_centre() {
    let Some(pipeline) = pipeline(1.0) else {
        return;
    };
    pipeline.layout().surface_resized(Size::new(SIDE, SIDE));

    let processed = pipeline.process(&bgra_frame(1)).expect("frame should process");
    let pixels = read_rgba(pipeline.gpu(), &processed.texture).expect("readback");

    // Centre barely moves
    let centre = source_rgb(SIDE / 2 + CROP_X, SIDE / 2).map(f32::from);
    assert_close(pixel(&pixels, SIDE / 2, SIDE / 2), centre, 2.0, (SIDE / 2, SIDE / 2));

    // Corners pull from well inside the image
    for (x, y) in [(0, 0), (SIDE - 1, 0), (0, SIDE - 1), (SIDE - 1, SIDE - 1)] {
        let [r, g, b] = source_rgb(x + CROP_X, y);
        assert_ne!(pixel(&pixels, x, y), [r, g, b, 255], "corner ({x}, {y}) unchanged");
    }

    for y in (0..SIDE).step_by(31) {
        for x in (0..SIDE).step_by(29) {
            assert_close(pixel(&pixels, x, y), expected_warped(x, y, 1.0), 2.0, (x, y));
        }
    }
}

#[test]
fn steady_size_recomputes_geometry_once() {
    let Some(pipeline) = pipeline(0.5) else {
        return;
    };
    pipeline.layout().surface_resized(Size::new(SIDE, SIDE));

    pipeline.process(&bgra_frame(1)).expect("first frame");
    let first = pipeline.layout().geometry().expect("geometry");
    pipeline.process(&bgra_frame(2)).expect("second frame");
    let second = pipeline.layout().geometry().expect("geometry");

    assert_eq!(pipeline.layout().recomputations(), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(pipeline.published().latest().map(|f| f.sequence), Some(2));
}

#[test]
fn concurrent_producers_are_serialized() {
    let Some(pipeline) = pipeline(0.5) else {
        return;
    };
    let pipeline = Arc::new(pipeline);
    let frame = |sequence| {
        Frame::packed(
            sequence,
            320,
            240,
            PixelFormat::Bgra8,
            Bytes::from(vec![90; 320 * 240 * 4]),
        )
    };

    let handles: Vec<_> = (0..4u64)
        .map(|producer| {
            let pipeline = pipeline.clone();
            thread::spawn(move || {
                for i in 0..3 {
                    pipeline.accept_frame(&frame(producer * 3 + i + 1));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("producer thread");
    }

    // A run never starts while another is still waiting on the GPU
    assert_eq!(pipeline.peak_in_flight(), 1);
    assert_eq!(pipeline.published().stats().published, 12);
    let latest = pipeline.published().latest().expect("a published frame");
    assert!((1..=12).contains(&latest.sequence));
}

#[test]
fn process_returns_after_its_own_publish() {
    let Some(pipeline) = pipeline(0.5) else {
        return;
    };
    for sequence in 1..=3 {
        let frame = Frame::packed(
            sequence,
            64,
            48,
            PixelFormat::Bgra8,
            Bytes::from(vec![10; 64 * 48 * 4]),
        );
        let processed = pipeline.process(&frame).expect("frame should process");
        let latest = pipeline.published().latest().expect("published");
        assert!(Arc::ptr_eq(&processed, &latest));
        assert_eq!(latest.sequence, sequence);
    }
    assert_eq!(pipeline.peak_in_flight(), 1);
}

#[test]
fn packed_rgb_is_expanded_before_upload() {
    let Some(pipeline) = pipeline(0.0) else {
        return;
    };
    // 4x2 frame; the centered 2x2 square starts at column 1
    let mut data = Vec::new();
    for y in 0..2u8 {
        for x in 0..4u8 {
            data.extend_from_slice(&[x * 60, y * 100, 7]);
        }
    }
    let frame = Frame::packed(1, 4, 2, PixelFormat::Rgb24, Bytes::from(data));

    let processed = pipeline.process(&frame).expect("frame should process");
    assert_eq!(processed.size, Size::new(2, 2));

    let pixels = read_rgba(pipeline.gpu(), &processed.texture).expect("readback");
    assert_eq!(
        pixels,
        vec![
            60, 0, 7, 255, 120, 0, 7, 255, //
            60, 100, 7, 255, 120, 100, 7, 255,
        ]
    );
}

#[test]
fn zero_area_frames_are_dropped() {
    let Some(pipeline) = pipeline(0.5) else {
        return;
    };
    let frame = Frame::packed(1, 0, 720, PixelFormat::Bgra8, Bytes::new());

    let err = pipeline.process(&frame).err().expect("zero area must fail");
    assert!(matches!(err, FrameError::ZeroArea { width: 0, .. }));

    pipeline.accept_frame(&frame);
    assert_eq!(pipeline.published().stats().published, 0);
    assert!(pipeline.published().latest().is_none());
}

#[test]
fn unsupported_formats_are_dropped_and_pipeline_recovers() {
    let Some(pipeline) = pipeline(0.5) else {
        return;
    };
    let yuyv = Frame::packed(1, 64, 64, PixelFormat::Yuyv4, Bytes::from(vec![0; 64 * 64 * 2]));

    let err = pipeline.process(&yuyv).err().expect("yuyv must fail");
    assert!(matches!(
        err,
        FrameError::UnsupportedPixelFormat(PixelFormat::Yuyv4)
    ));
    assert!(pipeline.published().latest().is_none());

    let truncated = Frame::packed(2, 64, 64, PixelFormat::Bgra8, Bytes::from(vec![0; 100]));
    assert!(matches!(
        pipeline.process(&truncated),
        Err(FrameError::TruncatedFrame { .. })
    ));

    // The next valid frame runs normally
    let ok = Frame::packed(3, 64, 64, PixelFormat::Bgra8, Bytes::from(vec![255; 64 * 64 * 4]));
    let processed = pipeline.process(&ok).expect("recovered");
    assert_eq!(processed.sequence, 3);
}
