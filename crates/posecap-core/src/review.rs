//! Results boundary: validates a capture set before it is shown.

use crate::types::Pose;
use crate::wizard::{CaptureStep, CapturedImage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    #[error("missing image(s): expected {expected}, got {actual}")]
    IncompleteCaptureSet { expected: usize, actual: usize },
    #[error("image {position} was captured for step {step_index} ({pose}), expected {expected}")]
    OutOfOrder {
        position: usize,
        step_index: usize,
        pose: Pose,
        expected: Pose,
    },
}

/// One labelled image on the results screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewEntry<I> {
    pub label: &'static str,
    pub pose: Pose,
    pub image: I,
}

/// A complete, ordered capture set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review<I> {
    entries: Vec<ReviewEntry<I>>,
}

impl<I> Review<I> {
    /// Accept exactly one image per step, in step order.
    pub fn from_captures(
        captures: Vec<CapturedImage<I>>,
        steps: &[CaptureStep],
    ) -> Result<Self, ReviewError> {
        if captures.len() != steps.len() {
            return Err(ReviewError::IncompleteCaptureSet {
                expected: steps.len(),
                actual: captures.len(),
            });
        }

        let mut entries = Vec::with_capacity(captures.len());
        for (position, (capture, step)) in captures.into_iter().zip(steps).enumerate() {
            if capture.step_index != position || capture.pose != step.pose {
                return Err(ReviewError::OutOfOrder {
                    position,
                    step_index: capture.step_index,
                    pose: capture.pose,
                    expected: step.pose,
                });
            }
            entries.push(ReviewEntry {
                label: step.pose.label(),
                pose: step.pose,
                image: capture.image,
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ReviewEntry<I>] {
        &self.entries
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.label).collect()
    }

    pub fn into_entries(self) -> Vec<ReviewEntry<I>> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::default_steps;

    fn capture(step_index: usize, pose: Pose) -> CapturedImage<&'static str> {
        CapturedImage { step_index, pose, image: "png" }
    }

    fn full_set() -> Vec<CapturedImage<&'static str>> {
        vec![
            capture(0, Pose::Straight),
            capture(1, Pose::Right),
            capture(2, Pose::Left),
        ]
    }

    #[test]
    fn test_complete_set_is_labelled_in_order() {
        let review = Review::from_captures(full_set(), &default_steps()).unwrap();
        assert_eq!(review.labels(), vec!["Front", "Right", "Left"]);
    }

    #[test]
    fn test_short_sets_are_rejected() {
        for n in 0..3 {
            let mut set = full_set();
            set.truncate(n);
            let err = Review::from_captures(set, &default_steps()).unwrap_err();
            assert_eq!(err, ReviewError::IncompleteCaptureSet { expected: 3, actual: n });
        }
    }

    #[test]
    fn test_extra_images_are_rejected() {
        let mut set = full_set();
        set.push(capture(3, Pose::Left));
        assert!(matches!(
            Review::from_captures(set, &default_steps()),
            Err(ReviewError::IncompleteCaptureSet { expected: 3, actual: 4 })
        ));
    }

    #[test]
    fn test_swapped_images_are_rejected() {
        let mut set = full_set();
        set.swap(1, 2);
        assert!(matches!(
            Review::from_captures(set, &default_steps()),
            Err(ReviewError::OutOfOrder { position: 1, .. })
        ));
    }
}
