//! Capture wizard: walks the user through a fixed sequence of head poses.
//!
//! The wizard is a plain state machine with an injected clock. The session
//! driver feeds it one [`Observation`] per detection tick and polls it for a
//! due capture; it never sleeps or spawns anything itself.
//!
//! ```text
//! AwaitingModel ─ready─▶ Step(0): Idle ─▶ Aligning ⇄ CountingDown ─hold─▶ Captured ─record─▶ Step(1) … ─▶ Complete
//! ```
//!
//! Two capture policies share the machine. With `auto_capture`, a matching
//! orientation arms a single timer slot and a capture is due once the
//! orientation has matched for the whole hold. Without it, capture is enabled
//! while a face is present (and, if required, correctly turned) and fires on
//! [`Wizard::request_capture`].

use crate::types::{Observation, Pose};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default contiguous hold before an automatic capture.
pub const DEFAULT_HOLD: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WizardError {
    #[error("capture is not enabled right now")]
    CaptureNotAllowed,
    #[error("no capture is pending")]
    NoCapturePending,
    #[error("wizard has no capture steps")]
    NoSteps,
}

/// One pose in the capture sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureStep {
    pub index: usize,
    pub pose: Pose,
    pub instruction: String,
}

impl CaptureStep {
    pub fn new(index: usize, pose: Pose) -> Self {
        Self {
            index,
            pose,
            instruction: instruction_for(pose, index).to_string(),
        }
    }
}

fn instruction_for(pose: Pose, index: usize) -> &'static str {
    match (pose, index) {
        (Pose::Straight, _) => "Please look straight at the camera.",
        (Pose::Right, 0) => "Turn your head to the right.",
        (Pose::Left, 0) => "Turn your head to the left.",
        (Pose::Right, 1) => "Now, turn your head to the right.",
        (Pose::Left, 1) => "Now, turn your head to the left.",
        (Pose::Right, _) => "Finally, turn your head to the right.",
        (Pose::Left, _) => "Finally, turn your head to the left.",
    }
}

/// Build steps for a pose sequence, indexed in order.
pub fn steps_for(poses: &[Pose]) -> Vec<CaptureStep> {
    poses
        .iter()
        .enumerate()
        .map(|(i, &pose)| CaptureStep::new(i, pose))
        .collect()
}

/// Front, right, left.
pub fn default_steps() -> Vec<CaptureStep> {
    steps_for(&[Pose::Straight, Pose::Right, Pose::Left])
}

/// An encoded still that satisfied one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage<I> {
    pub step_index: usize,
    pub pose: Pose,
    pub image: I,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WizardConfig {
    pub auto_capture: bool,
    pub hold: Duration,
    /// Manual policy only: also require the pose's orientation.
    pub require_orientation: bool,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            auto_capture: true,
            hold: DEFAULT_HOLD,
            require_orientation: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Idle,
    Aligning,
    /// Manual policy: a face is in place and the capture control is enabled.
    Ready,
    CountingDown,
    /// Capture fired, waiting for the frame to be recorded.
    Captured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    AwaitingModel,
    Step { index: usize, state: StepState },
    Complete,
}

/// A capture the driver must perform now, for the given step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDue {
    pub step_index: usize,
}

/// Result of recording a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Advanced { next_step: usize },
    Complete,
}

/// Run state of one pass through the capture sequence.
pub struct Wizard<I> {
    steps: Vec<CaptureStep>,
    config: WizardConfig,
    phase: Phase,
    captured: Vec<CapturedImage<I>>,
    /// The single timer slot: deadline of the pending automatic capture.
    deadline: Option<Instant>,
    last_observation: Observation,
    gated: bool,
    handed_off: bool,
}

impl<I> Wizard<I> {
    pub fn new(steps: Vec<CaptureStep>, config: WizardConfig) -> Result<Self, WizardError> {
        if steps.is_empty() {
            return Err(WizardError::NoSteps);
        }
        Ok(Self {
            steps,
            config,
            phase: Phase::AwaitingModel,
            captured: Vec::new(),
            deadline: None,
            last_observation: Observation::NO_FACE,
            gated: true,
            handed_off: false,
        })
    }

    /// The detection model finished loading.
    pub fn on_model_ready(&mut self) {
        if self.phase == Phase::AwaitingModel {
            self.enter_step(0);
        }
    }

    /// Start without detection: manual capture, always enabled.
    pub fn start_ungated(&mut self) {
        if self.phase == Phase::AwaitingModel {
            self.gated = false;
            self.config.auto_capture = false;
            self.enter_step(0);
            self.set_state(StepState::Ready);
        }
    }

    /// Feed one detection tick.
    pub fn observe(&mut self, observation: Observation, now: Instant) {
        self.last_observation = observation;
        let Phase::Step { index, state } = self.phase else {
            return;
        };
        if state == StepState::Captured || !self.gated {
            return;
        }
        let required = self.steps[index].pose.orientation();
        let matches = observation.face_present && observation.orientation == required;

        if self.config.auto_capture {
            match (matches, state) {
                (true, StepState::CountingDown) => {}
                (true, _) => {
                    self.arm(now + self.config.hold);
                    self.set_state(StepState::CountingDown);
                    tracing::debug!(step = index, pose = %required, "pose matched, counting down");
                }
                (false, StepState::CountingDown) => {
                    self.disarm();
                    self.set_state(StepState::Aligning);
                    tracing::debug!(step = index, seen = %observation.orientation, "pose lost, countdown cancelled");
                }
                (false, _) => self.set_state(StepState::Aligning),
            }
        } else {
            let enabled = observation.face_present && (!self.config.require_orientation || matches);
            self.set_state(if enabled { StepState::Ready } else { StepState::Aligning });
        }
    }

    /// Fire the armed timer if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<CaptureDue> {
        let Phase::Step { index, state: StepState::CountingDown } = self.phase else {
            return None;
        };
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.disarm();
        self.set_state(StepState::Captured);
        tracing::info!(step = index, "hold complete, capturing");
        Some(CaptureDue { step_index: index })
    }

    /// Manual capture request.
    pub fn request_capture(&mut self) -> Result<CaptureDue, WizardError> {
        if !self.capture_enabled() {
            return Err(WizardError::CaptureNotAllowed);
        }
        let index = self.step_index().ok_or(WizardError::CaptureNotAllowed)?;
        self.set_state(StepState::Captured);
        tracing::info!(step = index, "manual capture requested");
        Ok(CaptureDue { step_index: index })
    }

    /// Whether a manual capture would be accepted right now.
    pub fn capture_enabled(&self) -> bool {
        !self.config.auto_capture
            && matches!(self.phase, Phase::Step { state: StepState::Ready, .. })
    }

    /// Store the frame for the pending capture and move on.
    pub fn record(&mut self, image: I) -> Result<Progress, WizardError> {
        let Phase::Step { index, state: StepState::Captured } = self.phase else {
            return Err(WizardError::NoCapturePending);
        };
        self.captured.push(CapturedImage {
            step_index: index,
            pose: self.steps[index].pose,
            image,
        });

        let next = index + 1;
        let progress = if next < self.steps.len() {
            self.enter_step(next);
            if !self.gated {
                self.set_state(StepState::Ready);
            }
            Progress::Advanced { next_step: next }
        } else {
            self.phase = Phase::Complete;
            Progress::Complete
        };
        tracing::info!(step = index, captured = self.captured.len(), total = self.steps.len(), "capture recorded");
        self.check_invariant();
        Ok(progress)
    }

    /// The pending capture could not grab a frame; go back to aligning.
    pub fn capture_failed(&mut self) {
        if let Phase::Step { state: StepState::Captured, .. } = self.phase {
            self.set_state(if self.gated { StepState::Aligning } else { StepState::Ready });
        }
    }

    /// Hand over the full capture set. Yields `Some` once, after completion.
    pub fn take_captures(&mut self) -> Option<Vec<CapturedImage<I>>> {
        if self.phase != Phase::Complete || self.handed_off {
            return None;
        }
        self.handed_off = true;
        Some(std::mem::take(&mut self.captured))
    }

    /// Drop any pending timer. A countdown falls back to aligning, so the
    /// next matching observation arms a fresh hold.
    pub fn cancel(&mut self) {
        self.disarm();
        if let Phase::Step { state: StepState::CountingDown, .. } = self.phase {
            self.set_state(StepState::Aligning);
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn steps(&self) -> &[CaptureStep] {
        &self.steps
    }

    pub fn config(&self) -> &WizardConfig {
        &self.config
    }

    pub fn is_gated(&self) -> bool {
        self.gated
    }

    pub fn current_step(&self) -> Option<&CaptureStep> {
        self.step_index().map(|i| &self.steps[i])
    }

    pub fn captured(&self) -> &[CapturedImage<I>] {
        &self.captured
    }

    pub fn last_observation(&self) -> Observation {
        self.last_observation
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    fn step_index(&self) -> Option<usize> {
        match self.phase {
            Phase::Step { index, .. } => Some(index),
            _ => None,
        }
    }

    fn enter_step(&mut self, index: usize) {
        self.disarm();
        self.phase = Phase::Step { index, state: StepState::Idle };
        tracing::debug!(step = index, pose = %self.steps[index].pose, "entered step");
    }

    fn set_state(&mut self, state: StepState) {
        if let Phase::Step { index, .. } = self.phase {
            self.phase = Phase::Step { index, state };
        }
    }

    fn arm(&mut self, deadline: Instant) {
        self.disarm();
        self.deadline = Some(deadline);
    }

    fn disarm(&mut self) {
        self.deadline = None;
    }

    fn check_invariant(&self) {
        match self.phase {
            Phase::Step { index, .. } => debug_assert_eq!(self.captured.len(), index),
            Phase::Complete => debug_assert_eq!(self.captured.len(), self.steps.len()),
            Phase::AwaitingModel => debug_assert!(self.captured.is_empty()),
        }
    }
}
