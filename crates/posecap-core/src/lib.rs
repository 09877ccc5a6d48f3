//! posecap-core — Face detection, orientation estimation and the capture wizard.
//!
//! Uses SCRFD for face detection via ONNX Runtime; head orientation comes
//! from the detector's five-point landmarks.

pub mod detector;
pub mod model;
pub mod orientation;
pub mod review;
pub mod types;
pub mod wizard;

pub use detector::{detect_single, observe, Detector, DetectorError, ScrfdDetector};
pub use model::{default_model_dir, load_detector, shared_detector, ModelCell, ModelError, ModelState, SharedModel};
pub use orientation::{estimate_orientation, OrientationThresholds};
pub use review::{Review, ReviewEntry, ReviewError};
pub use types::{BoundingBox, Observation, Orientation, Pose};
pub use wizard::{
    default_steps, steps_for, CaptureDue, CaptureStep, CapturedImage, Phase, Progress, StepState, Wizard,
    WizardConfig, WizardError,
};
