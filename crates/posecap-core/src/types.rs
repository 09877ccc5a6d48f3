use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Head orientation classified from one frame's landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Straight,
    Left,
    Right,
    Unknown,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Straight => "straight",
            Self::Left => "left",
            Self::Right => "right",
            Self::Unknown => "unknown",
        })
    }
}

/// Head position a capture step asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pose {
    Straight,
    Left,
    Right,
}

impl Pose {
    /// The orientation that satisfies this pose.
    pub fn orientation(self) -> Orientation {
        match self {
            Self::Straight => Orientation::Straight,
            Self::Left => Orientation::Left,
            Self::Right => Orientation::Right,
        }
    }

    /// Position label shown next to the captured image.
    pub fn label(self) -> &'static str {
        match self {
            Self::Straight => "Front",
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.orientation().fmt(f)
    }
}

impl FromStr for Pose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "straight" | "front" => Ok(Self::Straight),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(format!("unknown pose '{other}' (expected straight, left or right)")),
        }
    }
}

/// What one detection tick saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub face_present: bool,
    pub orientation: Orientation,
}

impl Observation {
    pub const NO_FACE: Self = Self {
        face_present: false,
        orientation: Orientation::Unknown,
    };

    pub fn face(orientation: Orientation) -> Self {
        Self {
            face_present: true,
            orientation,
        }
    }
}
