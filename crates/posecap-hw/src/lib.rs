//! posecap-hw — camera stream and still capture.
//!
//! Provides V4L2 camera access, a live frame stream scoped to its owner,
//! and PNG still capture for the guided capture session.

pub mod camera;
pub mod capture;
pub mod frame;
pub mod stream;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use capture::{capture_frame, encode_frame, CaptureError, EncodedImage};
pub use frame::Frame;
pub use stream::{LiveStream, VideoSource};
