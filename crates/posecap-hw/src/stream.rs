//! Live camera stream: a pump thread publishing the newest frame.
//!
//! `LiveStream` owns the camera for as long as it lives. Dropping it (or
//! calling [`LiveStream::release`]) stops the pump and closes the device, so
//! the camera indicator turns off on every exit path.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

/// Consecutive capture errors after which the pump gives up.
const MAX_CONSECUTIVE_ERRORS: usize = 10;
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Anything that yields camera frames one at a time.
///
/// `next_frame` may block until the next frame is ready, but should give up
/// with [`CameraError::Timeout`] after a bounded wait so the stream can stop.
pub trait VideoSource: Send + 'static {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Newest published frame, `None` until the source produced one.
pub type FrameSlot = Option<Arc<Frame>>;

/// A running camera stream.
pub struct LiveStream {
    label: String,
    frames: watch::Receiver<FrameSlot>,
    stop: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl LiveStream {
    /// Open the camera, discard `warmup_frames` while exposure settles, and
    /// start streaming.
    pub fn acquire(device_path: &str, warmup_frames: usize) -> Result<Self, CameraError> {
        let mut camera = Camera::open(device_path)?;

        if warmup_frames > 0 {
            tracing::info!(count = warmup_frames, "discarding warmup frames");
            for _ in 0..warmup_frames {
                let _ = camera.capture_frame();
            }
        }

        Self::start(camera, device_path)
    }

    /// Start pumping frames from any source on a dedicated thread.
    pub fn start<S: VideoSource>(mut source: S, label: &str) -> Result<Self, CameraError> {
        let (tx, rx) = watch::channel::<FrameSlot>(None);
        let stop = Arc::new(AtomicBool::new(false));
        let pump_stop = Arc::clone(&stop);
        let pump_label = label.to_string();

        let pump = std::thread::Builder::new()
            .name("posecap-camera".into())
            .spawn(move || {
                tracing::debug!(source = %pump_label, "camera pump started");
                let mut errors = 0usize;
                while !pump_stop.load(Ordering::Acquire) {
                    match source.next_frame() {
                        Ok(frame) => {
                            errors = 0;
                            tx.send_replace(Some(Arc::new(frame)));
                        }
                        Err(CameraError::Timeout(waited)) => {
                            tracing::trace!(?waited, "no frame yet");
                        }
                        Err(e) => {
                            errors += 1;
                            tracing::warn!(error = %e, errors, "frame capture failed");
                            if errors >= MAX_CONSECUTIVE_ERRORS {
                                tracing::error!(source = %pump_label, "camera stopped producing frames");
                                break;
                            }
                            std::thread::sleep(ERROR_BACKOFF);
                        }
                    }
                }
                drop(source);
                tracing::debug!(source = %pump_label, "camera pump exited");
            })
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn camera thread: {e}")))?;

        tracing::info!(source = label, "camera stream acquired");

        Ok(Self {
            label: label.to_string(),
            frames: rx,
            stop,
            pump: Some(pump),
        })
    }

    /// Newest frame, if any has arrived yet.
    pub fn latest(&self) -> FrameSlot {
        self.frames.borrow().clone()
    }

    /// A receiver that wakes on every new frame.
    pub fn subscribe(&self) -> watch::Receiver<FrameSlot> {
        self.frames.clone()
    }

    /// Frame dimensions once the stream has produced a usable frame.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.frames
            .borrow()
            .as_ref()
            .filter(|f| f.has_dimensions())
            .map(|f| (f.width, f.height))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_released(&self) -> bool {
        self.pump.is_none()
    }

    /// Stop streaming and close the device. Calling it again is a no-op.
    pub fn release(&mut self) {
        let Some(pump) = self.pump.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        if pump.join().is_err() {
            tracing::error!(source = %self.label, "camera pump panicked");
        }
        tracing::info!(source = %self.label, "camera stream released");
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.release();
    }
}
