//! Still capture: newest stream frame to a lossless PNG payload.

use crate::frame::Frame;
use crate::stream::LiveStream;
use base64::Engine;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use thiserror::Error;

const PNG_MIME: &str = "image/png";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no frame available yet")]
    NoFrameAvailable,
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A PNG-encoded still frame.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn mime(&self) -> &'static str {
        PNG_MIME
    }

    /// Self-contained `data:` URL carrying the PNG bytes.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{PNG_MIME};base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png)
        )
    }
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("png_bytes", &self.png.len())
            .finish()
    }
}

/// Capture the newest frame of a live stream at its native resolution.
pub fn capture_frame(stream: &LiveStream) -> Result<EncodedImage, CaptureError> {
    let frame = stream.latest().ok_or(CaptureError::NoFrameAvailable)?;
    encode_frame(&frame)
}

/// PNG-encode the RGB plane of a frame.
pub fn encode_frame(frame: &Frame) -> Result<EncodedImage, CaptureError> {
    if !frame.has_dimensions() {
        return Err(CaptureError::NoFrameAvailable);
    }
    let len = (frame.width * frame.height * 3) as usize;

    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(
        &frame.rgb[..len],
        frame.width,
        frame.height,
        ExtendedColorType::Rgb8,
    )?;

    tracing::debug!(
        width = frame.width,
        height = frame.height,
        bytes = png.len(),
        sequence = frame.sequence,
        "frame encoded"
    );

    Ok(EncodedImage {
        png,
        width: frame.width,
        height: frame.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_produces_decodable_png() {
        let frame = Frame::from_rgb(vec![10, 20, 30, 40, 50, 60], 2, 1, 0).unwrap();
        let encoded = encode_frame(&frame).unwrap();
        assert_eq!((encoded.width, encoded.height), (2, 1));

        let decoded = image::load_from_memory_with_format(&encoded.png, image::ImageFormat::Png)
            .unwrap()
            .into_rgb8();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.into_raw(), vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_zero_sized_frame_has_no_capture() {
        let frame = Frame::from_gray(Vec::new(), 0, 0, 0);
        assert!(matches!(encode_frame(&frame), Err(CaptureError::NoFrameAvailable)));
    }

    #[test]
    fn test_data_url_prefix() {
        let frame = Frame::from_gray(vec![255; 4], 2, 2, 0);
        let url = encode_frame(&frame).unwrap().to_data_url();
        assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"), "{url}");
    }
}
