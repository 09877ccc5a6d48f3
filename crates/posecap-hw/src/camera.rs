//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::stream::VideoSource;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// Longest a dequeue may block before the caller gets control back.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no frame within {0:?}")]
    Timeout(Duration),
}

impl CameraError {
    /// The camera cannot be used at all: missing, denied, or held by
    /// another process. The user has to act before retrying.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_) | Self::PermissionDenied(_) | Self::DeviceBusy
        )
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpeg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(Self::Y16)
        } else if fourcc == FourCC::new(b"MJPG") {
            Some(Self::Mjpeg)
        } else {
            None
        }
    }
}

/// V4L2 camera device handle with a persistent mmap stream.
pub struct Camera {
    // Declared before `device` so the stream is torn down first.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(format!("{device_path}: {e}"))
            }
            _ if e.raw_os_error() == Some(16) => CameraError::DeviceBusy,
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV so stills keep their colour; accept whatever
        // supported format the driver settles on.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, Y16 or MJPG)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            stream: None,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Negotiated pixel format.
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Dequeue the next buffer, starting the mmap stream on first use.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                })?;
            stream.set_timeout(DEQUEUE_TIMEOUT);
            self.stream = Some(stream);
        }
        let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("stream not started".into()));
        };

        let (buf, meta) = stream.next().map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => CameraError::Timeout(DEQUEUE_TIMEOUT),
            _ => CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")),
        })?;

        decode_buffer(buf, width, height, pixel_format, meta.sequence)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl VideoSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        // Stopping the stream before closing the fd turns the indicator off.
        self.stream.take();
        tracing::debug!(device = %self.device_path, "camera closed");
    }
}

/// Convert one raw buffer in the negotiated format into a [`Frame`].
fn decode_buffer(
    buf: &[u8],
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    sequence: u32,
) -> Result<Frame, CameraError> {
    let pixels = (width * height) as usize;
    let too_short = |expected: usize| {
        CameraError::CaptureFailed(format!(
            "{pixel_format:?} buffer too short: expected {expected}, got {}",
            buf.len()
        ))
    };

    match pixel_format {
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(too_short(pixels));
            }
            Ok(Frame::from_gray(buf[..pixels].to_vec(), width, height, sequence))
        }
        PixelFormat::Y16 => {
            if buf.len() < pixels * 2 {
                return Err(too_short(pixels * 2));
            }
            // Keep the high byte of each little-endian sample.
            let gray = buf[..pixels * 2].chunks_exact(2).map(|s| s[1]).collect();
            Ok(Frame::from_gray(gray, width, height, sequence))
        }
        PixelFormat::Yuyv => {
            let conv = |e: frame::FrameError| {
                CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))
            };
            let gray = frame::yuyv_to_grayscale(buf, width, height).map_err(conv)?;
            let rgb = frame::yuyv_to_rgb(buf, width, height).map_err(conv)?;
            Ok(Frame {
                is_dark: frame::is_dark_frame(&gray, frame::DARK_FRAME_PCT),
                data: gray,
                rgb,
                width,
                height,
                timestamp: std::time::Instant::now(),
                sequence,
            })
        }
        PixelFormat::Mjpeg => {
            let decoded = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}")))?
                .into_rgb8();
            let (w, h) = decoded.dimensions();
            Frame::from_rgb(decoded.into_raw(), w, h, sequence)
                .map_err(|e| CameraError::CaptureFailed(format!("MJPG frame invalid: {e}")))
        }
    }
}
