//! Terminal presentation: instruction header, status line and the results
//! screen.

use crate::session::SessionStatus;
use anyhow::Context;
use chrono::{DateTime, Utc};
use posecap_core::{ModelState, Phase, Pose, Review};
use posecap_hw::EncodedImage;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// "Step i of n: <instruction>", or `None` outside a step.
pub fn instruction_header(status: &SessionStatus) -> Option<String> {
    let step = status.step?;
    let instruction = status.instruction.as_deref().unwrap_or_default();
    Some(format!("Step {} of {}: {instruction}", step + 1, status.total_steps))
}

/// The one-line status under the instruction.
///
/// A camera error wins over everything, then model loading, then face
/// presence, then the detected/required orientation readout.
pub fn status_line(status: &SessionStatus) -> String {
    if let Some(err) = &status.camera_error {
        return format!("Camera error: {err}");
    }
    if status.phase == Phase::AwaitingModel {
        return match status.model {
            ModelState::Failed => format!(
                "Face detection unavailable: {}",
                status.notice.as_deref().unwrap_or("model failed to load")
            ),
            _ => "Loading face detection models...".to_string(),
        };
    }
    if status.phase == Phase::Complete {
        return "All images captured.".to_string();
    }
    if !status.gated {
        let notice = status.notice.as_deref().unwrap_or("Face detection unavailable.");
        return format!("{notice} Press Enter to capture.");
    }
    if !status.observation.face_present {
        return "Waiting for face...".to_string();
    }

    let mut line = format!("Detected: {}", status.observation.orientation);
    if let Some(required) = status.required {
        let _ = write!(line, " | Required: {required}");
    }
    if status.is_captured() {
        line.push_str(" | Captured");
    } else if let Some(secs) = status.countdown_secs.filter(|_| status.is_counting_down()) {
        let _ = write!(line, " | Capturing in {secs} second{}...", if secs == 1 { "" } else { "s" });
    } else if status.capture_enabled {
        line.push_str(" | Press Enter to capture");
    }
    if let Some(notice) = &status.notice {
        let _ = write!(line, " ({notice})");
    }
    line
}

/// One image entry of the results manifest.
#[derive(Debug, Serialize)]
pub struct ManifestImage {
    pub label: &'static str,
    pub pose: Pose,
    pub width: u32,
    pub height: u32,
    pub file: String,
}

/// Written next to the images as `manifest.json`.
#[derive(Debug, Serialize)]
pub struct Manifest {
    pub session_id: String,
    pub captured_at: DateTime<Utc>,
    pub images: Vec<ManifestImage>,
}

/// Text of the results screen, one line per position.
pub fn results_screen(review: &Review<EncodedImage>, data_urls: bool) -> String {
    let mut out = String::from("Captured images:\n");
    for entry in review.entries() {
        let _ = writeln!(
            out,
            "  {:<6} {}x{} ({} bytes)",
            entry.label,
            entry.image.width,
            entry.image.height,
            entry.image.png.len()
        );
        if data_urls {
            let _ = writeln!(out, "         {}", entry.image.to_data_url());
        }
    }
    out
}

/// Write each image as `<step>-<label>.png` plus `manifest.json` into `dir`.
pub fn write_results(
    review: &Review<EncodedImage>,
    dir: &Path,
    session_id: &str,
    captured_at: DateTime<Utc>,
) -> anyhow::Result<Manifest> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut images = Vec::with_capacity(review.entries().len());
    for (position, entry) in review.entries().iter().enumerate() {
        // Poses may repeat; the step position keeps file names unique.
        let file = format!("{}-{}.png", position + 1, entry.label.to_ascii_lowercase());
        let path: PathBuf = dir.join(&file);
        std::fs::write(&path, &entry.image.png).with_context(|| format!("writing {}", path.display()))?;
        images.push(ManifestImage {
            label: entry.label,
            pose: entry.pose,
            width: entry.image.width,
            height: entry.image.height,
            file,
        });
    }

    let manifest = Manifest {
        session_id: session_id.to_string(),
        captured_at,
        images,
    };
    let path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(dir = %dir.display(), count = manifest.images.len(), "results written");
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use posecap_core::{default_steps, steps_for, CapturedImage, Observation, Orientation, StepState};
    use posecap_hw::{encode_frame, Frame};

    fn counting_down(secs: u64) -> SessionStatus {
        SessionStatus {
            phase: Phase::Step { index: 1, state: StepState::CountingDown },
            step: Some(1),
            instruction: Some("Now, turn your head to the right.".into()),
            required: Some(Orientation::Right),
            observation: Observation::face(Orientation::Right),
            model: ModelState::Ready,
            countdown_secs: Some(secs),
            ..SessionStatus::idle(3)
        }
    }

    #[test]
    fn test_header() {
        assert_eq!(instruction_header(&SessionStatus::idle(3)), None);
        assert_eq!(
            instruction_header(&counting_down(2)).as_deref(),
            Some("Step 2 of 3: Now, turn your head to the right.")
        );
    }

    #[test]
    fn test_status_precedence() {
        let mut status = counting_down(2);
        assert_eq!(status_line(&status), "Detected: right | Required: right | Capturing in 2 seconds...");

        status.observation = Observation::NO_FACE;
        assert_eq!(status_line(&status), "Waiting for face...");

        status.phase = Phase::AwaitingModel;
        status.model = ModelState::Loading;
        assert_eq!(status_line(&status), "Loading face detection models...");

        status.camera_error = Some("device busy".into());
        assert_eq!(status_line(&status), "Camera error: device busy");
    }

    #[test]
    fn test_status_manual_and_captured() {
        let mut status = counting_down(1);
        assert!(status_line(&status).ends_with("Capturing in 1 second..."));

        status.phase = Phase::Step { index: 1, state: StepState::Captured };
        assert!(status_line(&status).ends_with("| Captured"));

        status.phase = Phase::Step { index: 1, state: StepState::Ready };
        status.auto_capture = false;
        status.capture_enabled = true;
        status.countdown_secs = None;
        assert!(status_line(&status).ends_with("Press Enter to capture"));
    }

    fn review() -> Review<EncodedImage> {
        let frame = Frame::from_rgb(vec![200; 4 * 3 * 3], 4, 3, 0).unwrap();
        let image = encode_frame(&frame).unwrap();
        let captures = default_steps()
            .iter()
            .map(|s| CapturedImage { step_index: s.index, pose: s.pose, image: image.clone() })
            .collect();
        Review::from_captures(captures, &default_steps()).unwrap()
    }

    #[test]
    fn test_results_screen_lists_positions() {
        let text = results_screen(&review(), true);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[1].trim_start().starts_with("Front"));
        assert!(lines[2].trim_start().starts_with("data:image/png;base64,"));
        assert!(lines[3].trim_start().starts_with("Right"));
        assert!(lines[5].trim_start().starts_with("Left"));
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("session");
        let manifest = write_results(&review(), &out, "abc", Utc::now()).unwrap();

        let files: Vec<&str> = manifest.images.iter().map(|i| i.file.as_str()).collect();
        assert_eq!(files, vec!["1-front.png", "2-right.png", "3-left.png"]);
        for file in files {
            let bytes = std::fs::read(out.join(file)).unwrap();
            assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        }

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(json["session_id"], "abc");
        assert_eq!(json["images"][1]["pose"], "right");
        assert_eq!(json["images"][0]["width"], 4);
    }

    #[test]
    fn test_repeated_pose_keeps_every_image() {
        let steps = steps_for(&[Pose::Straight, Pose::Straight]);
        let captures = steps
            .iter()
            .map(|s| {
                let shade = 40 + 100 * s.index as u8;
                let frame = Frame::from_rgb(vec![shade; 4 * 3 * 3], 4, 3, 0).unwrap();
                CapturedImage { step_index: s.index, pose: s.pose, image: encode_frame(&frame).unwrap() }
            })
            .collect();
        let review = Review::from_captures(captures, &steps).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let manifest = write_results(&review, dir.path(), "twice", Utc::now()).unwrap();

        assert_eq!(manifest.images[0].file, "1-front.png");
        assert_eq!(manifest.images[1].file, "2-front.png");
        let first = std::fs::read(dir.path().join("1-front.png")).unwrap();
        let second = std::fs::read(dir.path().join("2-front.png")).unwrap();
        assert_ne!(first, second);
        assert_eq!(first, review.entries()[0].image.png);
    }
}
