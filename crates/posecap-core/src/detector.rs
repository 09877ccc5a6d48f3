//! Face detection backends.
//!
//! [`Detector`] is the seam the capture session talks to. [`ScrfdDetector`]
//! is the bundled backend: an SCRFD ONNX export run on CPU via ONNX Runtime,
//! decoded over three strides with five-point landmarks and NMS.

use crate::orientation::{estimate_orientation, OrientationThresholds};
use crate::types::{BoundingBox, Observation, Orientation};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// File name of the detection model inside the model directory.
pub const DETECTION_MODEL_FILE: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in a grayscale frame.
pub trait Detector: Send {
    /// Faces found in the frame, highest confidence first.
    fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// At most one face: the most confident detection.
pub fn detect_single<D: Detector + ?Sized>(
    detector: &mut D,
    gray: &[u8],
    width: u32,
    height: u32,
) -> Result<Option<BoundingBox>, DetectorError> {
    let faces = detector.detect(gray, width, height)?;
    Ok(faces.into_iter().max_by(|a, b| {
        a.confidence
            .partial_cmp(&b.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    }))
}

/// Detect a face and classify its orientation in one step.
///
/// A face without landmarks counts as present with unknown orientation.
pub fn observe<D: Detector + ?Sized>(
    detector: &mut D,
    gray: &[u8],
    width: u32,
    height: u32,
    thresholds: &OrientationThresholds,
) -> Result<Observation, DetectorError> {
    let Some(face) = detect_single(detector, gray, width, height)? else {
        return Ok(Observation::NO_FACE);
    };
    let orientation = face
        .landmarks
        .as_ref()
        .map(|lm| estimate_orientation(lm, thresholds))
        .unwrap_or(Orientation::Unknown);
    Ok(Observation::face(orientation))
}

/// Where a tensor came from in letterboxed input space.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output slots (score, bbox, kps) for one stride.
type StrideSlots = (usize, usize, usize);

/// SCRFD face detector.
pub struct ScrfdDetector {
    session: Session,
    slots: [StrideSlots; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "expected 9 outputs (score/bbox/kps per stride), got {}",
                names.len()
            )));
        }
        let slots = output_slots(&names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            ?slots,
            "loaded SCRFD model"
        );

        Ok(Self { session, slots })
    }

    /// Letterbox a grayscale frame into a 1x3x640x640 normalised tensor.
    fn preprocess(gray: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).min(INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as usize).min(INPUT_SIZE);
        let pad_x = (INPUT_SIZE - new_w) as f32 / 2.0;
        let pad_y = (INPUT_SIZE - new_h) as f32 / 2.0;
        let (off_x, off_y) = (pad_x.floor() as usize, pad_y.floor() as usize);

        // Padding normalises to 0.0.
        let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
        let inv = 1.0 / scale;

        for y in 0..new_h {
            let sy = ((y as f32 + 0.5) * inv - 0.5).max(0.0);
            let y0 = (sy.floor() as usize).min(height - 1);
            let y1 = (y0 + 1).min(height - 1);
            let fy = sy - sy.floor();

            for x in 0..new_w {
                let sx = ((x as f32 + 0.5) * inv - 0.5).max(0.0);
                let x0 = (sx.floor() as usize).min(width - 1);
                let x1 = (x0 + 1).min(width - 1);
                let fx = sx - sx.floor();

                let top = gray[y0 * width + x0] as f32 * (1.0 - fx) + gray[y0 * width + x1] as f32 * fx;
                let bot = gray[y1 * width + x0] as f32 * (1.0 - fx) + gray[y1 * width + x1] as f32 * fx;
                let v = ((top * (1.0 - fy) + bot * fy) - PIXEL_MEAN) / PIXEL_STD;

                for c in 0..3 {
                    tensor[[0, c, y + off_y, x + off_x]] = v;
                }
            }
        }

        (tensor, Letterbox { scale, pad_x, pad_y })
    }
}

impl Detector for ScrfdDetector {
    fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 || gray.len() < w * h {
            return Err(DetectorError::InferenceFailed(format!(
                "frame {width}x{height} with {} bytes",
                gray.len()
            )));
        }

        let (input, letterbox) = Self::preprocess(gray, w, h);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (i, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.slots[i];
            let extract = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        Ok(nms(candidates, NMS_IOU))
    }
}

/// Map output tensors to stride slots.
///
/// Exports that name their outputs `score_8`, `bbox_16`, `kps_32`, ... are
/// matched by name; anything else is assumed to follow the usual
/// scores/bboxes/kps blocks of three.
fn output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut slots = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (i, &stride) in STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => slots[i] = (s, b, k),
            _ => return [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
        }
    }
    slots
}

/// Decode anchor-free detections for one stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE / stride;
    let anchors = (INPUT_SIZE / stride) * grid_w * ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCORE_THRESHOLD {
                return None;
            }
            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * s;
            let cy = (cell / grid_w) as f32 * s;

            let b = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(cx - b[0] * s, cy - b[1] * s);
            let (x2, y2) = letterbox.unmap(cx + b[2] * s, cy + b[3] * s);

            let landmarks: Option<[(f32, f32); 5]> = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|p| letterbox.unmap(cx + k[p * 2] * s, cy + k[p * 2 + 1] * s))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence, landmarks: None }
    }

    struct Scripted(Vec<BoundingBox>);

    impl Detector for Scripted {
        fn detect(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!(iou(&a, &bbox(20.0, 20.0, 10.0, 10.0, 1.0)).abs() < 1e-6);
        // 5x10 overlap over 150 union
        assert!((iou(&a, &bbox(5.0, 0.0, 10.0, 10.0, 1.0)) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlap() {
        let kept = nms(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        let conf: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(conf, vec![0.9, 0.7]);
    }

    #[test]
    fn test_output_slots() {
        let named: Vec<String> = ["bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(output_slots(&named), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);

        let numeric: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(output_slots(&numeric), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_stride_unmaps_letterbox() {
        // One confident anchor at cell (1, 1) of stride 32.
        let grid_w = INPUT_SIZE / 32;
        let anchors = grid_w * grid_w * ANCHORS_PER_CELL;
        let idx = (grid_w + 1) * ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        scores[idx] = 0.9;
        let mut bboxes = vec![0.0; anchors * 4];
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let kps = vec![0.0; anchors * 10];

        let letterbox = Letterbox { scale: 2.0, pad_x: 0.0, pad_y: 80.0 };
        let dets = decode_stride(&scores, &bboxes, &kps, 32, &letterbox);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 0.0).abs() < 1e-4, "x = {}", d.x);
        assert!((d.y - (-40.0)).abs() < 1e-4, "y = {}", d.y);
        assert!((d.width - 32.0).abs() < 1e-4);
        let lm = d.landmarks.unwrap();
        assert!((lm[2].0 - 16.0).abs() < 1e-4 && (lm[2].1 - (-24.0)).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_pads_to_zero() {
        let gray = vec![255u8; 320 * 240];
        let (tensor, lb) = ScrfdDetector::preprocess(&gray, 320, 240);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert!((lb.pad_y - 80.0).abs() < 1e-6);
        // Padding band above the image
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        // Inside the image
        let inside = (255.0 - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 1, 320, 320]] - inside).abs() < 1e-4);
    }

    #[test]
    fn test_detect_single_picks_most_confident() {
        let mut d = Scripted(vec![bbox(0.0, 0.0, 1.0, 1.0, 0.6), bbox(5.0, 5.0, 1.0, 1.0, 0.95)]);
        let face = detect_single(&mut d, &[], 0, 0).unwrap().unwrap();
        assert_eq!(face.confidence, 0.95);

        let mut none = Scripted(Vec::new());
        assert!(detect_single(&mut none, &[], 0, 0).unwrap().is_none());
    }

    #[test]
    fn test_observe_classifies_landmarks() {
        let mut face = bbox(0.0, 0.0, 100.0, 100.0, 0.9);
        face.landmarks = Some([(100.0, 80.0), (140.0, 80.0), (140.0, 100.0), (105.0, 120.0), (135.0, 120.0)]);
        let mut d = Scripted(vec![face.clone()]);
        let obs = observe(&mut d, &[], 0, 0, &OrientationThresholds::default()).unwrap();
        assert_eq!(obs, Observation::face(Orientation::Left));

        face.landmarks = None;
        let mut d = Scripted(vec![face]);
        let obs = observe(&mut d, &[], 0, 0, &OrientationThresholds::default()).unwrap();
        assert_eq!(obs, Observation::face(Orientation::Unknown));

        let mut empty = Scripted(Vec::new());
        let obs = observe(&mut empty, &[], 0, 0, &OrientationThresholds::default()).unwrap();
        assert_eq!(obs, Observation::NO_FACE);
    }
}
