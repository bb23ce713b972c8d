pub mod decoder;
pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
pub mod v4l2;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info};

pub use frame::Frame;
pub use frame::PixelFormat;
#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstCapture;
pub use v4l2::V4l2Capture;

/// Receiver of captured frames.
///
/// Called on the producer's context once per frame. The frame is only borrowed for the
/// duration of the call and may be released by the producer as soon as it returns.
pub trait FrameSink: Send + Sync {
    fn accept_frame(&self, frame: &Frame);
}

/// Blocking source of frames
pub trait FrameSource {
    fn next_frame(&mut self) -> color_eyre::Result<Frame>;
}

/// Pull frames from `source` into `sink` until `shutdown` is raised.
///
/// Each call into the sink blocks until the frame has been processed, so the source is
/// drained no faster than the sink keeps up.
pub fn run_producer(source: &mut dyn FrameSource, sink: &dyn FrameSink, shutdown: &AtomicBool) {
    info!("Frame producer running");
    while !shutdown.load(Ordering::Acquire) {
        match source.next_frame() {
            Ok(frame) => sink.accept_frame(&frame),
            Err(e) => {
                error!("Capture error: {}", e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    info!("Frame producer stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use bytes::Bytes;
    use color_eyre::eyre::eyre;

    use super::*;

    struct Counter {
        frames: AtomicU64,
        last_sequence: AtomicU64,
        stop_after: u64,
        shutdown: AtomicBool,
    }

    impl FrameSink for Counter {
        fn accept_frame(&self, frame: &Frame) {
            let seen = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
            self.last_sequence
                .store(frame.meta.sequence, Ordering::Relaxed);
            if seen == self.stop_after {
                self.shutdown.store(true, Ordering::Release);
            }
        }
    }

    struct Flaky {
        sequence: u64,
    }

    impl FrameSource for Flaky {
        fn next_frame(&mut self) -> color_eyre::Result<Frame> {
            self.sequence += 1;
            if self.sequence % 3 == 0 {
                return Err(eyre!("device hiccup"));
            }
            Ok(Frame::packed(
                self.sequence,
                2,
                2,
                PixelFormat::Bgra8,
                Bytes::from(vec![0; 16]),
            ))
        }
    }

    #[test]
    fn producer_survives_errors_and_stops_on_shutdown() {
        let sink = Counter {
            frames: AtomicU64::new(0),
            last_sequence: AtomicU64::new(0),
            stop_after: 4,
            shutdown: AtomicBool::new(false),
        };
        let mut source = Flaky { sequence: 0 };

        run_producer(&mut source, &sink, &sink.shutdown);

        assert_eq!(sink.frames.load(Ordering::Relaxed), 4);
        // Sequences 3 failed, so the fourth delivered frame is sequence 5
        assert_eq!(sink.last_sequence.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn raised_flag_stops_before_pulling() {
        let sink = Counter {
            frames: AtomicU64::new(0),
            last_sequence: AtomicU64::new(0),
            stop_after: 1,
            shutdown: AtomicBool::new(true),
        };
        let mut source = Flaky { sequence: 0 };

        run_producer(&mut source, &sink, &sink.shutdown);

        assert_eq!(source.sequence, 0);
        assert_eq!(sink.frames.load(Ordering::Relaxed), 0);
    }
}
