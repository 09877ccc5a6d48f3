//! Head orientation from five-point landmarks.
//!
//! Compares the nose tip against the midpoint of the eyes along x. The
//! thresholds live in the landmarks' pixel space, so they depend on camera
//! resolution and subject distance.

use crate::types::Orientation;
use serde::{Deserialize, Serialize};

const LEFT_EYE: usize = 0;
const RIGHT_EYE: usize = 1;
const NOSE: usize = 2;

/// Pixel thresholds on the nose offset.
///
/// Offsets whose magnitude falls in `[straight_within, turned_beyond]` are
/// left unclassified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationThresholds {
    pub straight_within: f32,
    pub turned_beyond: f32,
}

impl Default for OrientationThresholds {
    fn default() -> Self {
        Self {
            straight_within: 10.0,
            turned_beyond: 15.0,
        }
    }
}

/// Horizontal offset of the nose tip from the eye midpoint, in pixels.
pub fn nose_offset(landmarks: &[(f32, f32); 5]) -> f32 {
    let eye_center_x = (landmarks[LEFT_EYE].0 + landmarks[RIGHT_EYE].0) / 2.0;
    landmarks[NOSE].0 - eye_center_x
}

/// Classify a nose offset.
pub fn classify_offset(offset: f32, thresholds: &OrientationThresholds) -> Orientation {
    if offset.abs() < thresholds.straight_within {
        Orientation::Straight
    } else if offset > thresholds.turned_beyond {
        Orientation::Left
    } else if offset < -thresholds.turned_beyond {
        Orientation::Right
    } else {
        Orientation::Unknown
    }
}

/// Estimate head orientation from detected landmarks.
pub fn estimate_orientation(
    landmarks: &[(f32, f32); 5],
    thresholds: &OrientationThresholds,
) -> Orientation {
    classify_offset(nose_offset(landmarks), thresholds)
}
