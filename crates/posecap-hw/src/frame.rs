//! Frame type and pixel conversion: YUYV/GREY/Y16 to grayscale and RGB.

/// A captured camera frame.
///
/// Carries two planes of the same image: a grayscale plane fed to the face
/// detector and an RGB8 plane used when the frame is kept as a still.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Build a frame from an RGB8 buffer, deriving the grayscale plane.
    pub fn from_rgb(rgb: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width * height * 3) as usize;
        if rgb.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: rgb.len(),
            });
        }
        let data = rgb_to_grayscale(&rgb[..expected]);
        let is_dark = is_dark_frame(&data, DARK_FRAME_PCT);
        Ok(Self {
            data,
            rgb,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        })
    }

    /// Build a frame from a grayscale buffer; the RGB plane replicates Y.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let rgb = gray_to_rgb(&data);
        let is_dark = is_dark_frame(&data, DARK_FRAME_PCT);
        Self {
            data,
            rgb,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        }
    }

    /// True once the frame has non-zero dimensions and both planes are filled.
    pub fn has_dimensions(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() >= (self.width * self.height) as usize
            && self.rgb.len() >= (self.width * self.height * 3) as usize
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Share of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_PCT: f32 = 0.95;

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert packed YUYV (4:2:2) to RGB8 using the BT.601 integer approximation.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    [
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    ]
}

/// Replicate a grayscale plane into RGB8.
pub fn gray_to_rgb(gray: &[u8]) -> Vec<u8> {
    gray.iter().flat_map(|&y| [y, y, y]).collect()
}

/// Luma of an RGB8 plane (Rec. 601 weights, integer).
pub fn rgb_to_grayscale(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| ((77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32) >> 8) as u8)
        .collect()
}

/// Check if a frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels fall below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_yuyv_to_rgb_neutral_chroma_is_gray() {
        // U = V = 128 carries no colour: every channel equals scaled luma.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_chroma() {
        let yuyv = vec![81, 90, 81, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 200, "red channel = {}", rgb[0]);
        assert!(rgb[1] < 40, "green channel = {}", rgb[1]);
        assert_eq!(rgb.len(), 6);
    }

    #[test]
    fn test_gray_rgb_round_trip_keeps_luma() {
        let gray = vec![0u8, 50, 128, 255];
        let back = rgb_to_grayscale(&gray_to_rgb(&gray));
        for (a, b) in gray.iter().zip(back.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{a} vs {b}");
        }
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&vec![0u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&vec![128u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_frame_from_rgb_rejects_short_buffer() {
        assert!(Frame::from_rgb(vec![0u8; 5], 2, 1, 0).is_err());
    }

    #[test]
    fn test_frame_dimensions() {
        let frame = Frame::from_gray(vec![200u8; 6], 3, 2, 1);
        assert!(frame.has_dimensions());
        assert!(!frame.is_dark);
        assert_eq!(frame.rgb.len(), 18);

        let empty = Frame::from_gray(Vec::new(), 0, 0, 0);
        assert!(!empty.has_dimensions());
        assert!(empty.is_dark);
    }
}
