//! Capture session: drives the wizard from live frames for as long as the
//! capture view is open.
//!
//! The session owns the [`LiveStream`]. Every way out of [`run`] (completion,
//! cancellation, camera loss, detector failure) drops it, which stops the
//! pump and closes the device.

use crate::config::Config;
use posecap_core::{
    observe, CaptureDue, CaptureStep, CapturedImage, Detector, ModelError, ModelState, Observation,
    Orientation, OrientationThresholds, Phase, SharedModel, StepState, Wizard, WizardConfig,
};
use posecap_hw::{capture_frame, CameraError, EncodedImage, Frame, LiveStream};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// A line of user input, as the presentation layer understood it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserInput {
    /// Enter: capture now, or accept a prompt.
    Capture,
    Quit,
}

/// How a capture session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    Completed(Vec<CapturedImage<EncodedImage>>),
    Cancelled,
    CameraUnavailable(String),
    DetectionUnavailable(String),
}

impl SessionOutcome {
    /// Whether starting another session can succeed without restarting the
    /// process. A failed model load is remembered for the process lifetime.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CameraUnavailable(_))
    }
}

/// Session parameters derived from the application config.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub steps: Vec<CaptureStep>,
    pub wizard: WizardConfig,
    pub thresholds: OrientationThresholds,
    pub ungated_fallback: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            steps: config.capture_steps(),
            wizard: config.wizard_config(),
            thresholds: config.thresholds(),
            ungated_fallback: config.allows_ungated_fallback(),
        }
    }
}

/// Snapshot of the session, published on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub phase: Phase,
    pub step: Option<usize>,
    pub total_steps: usize,
    pub instruction: Option<String>,
    pub required: Option<Orientation>,
    pub observation: Observation,
    pub model: ModelState,
    pub gated: bool,
    pub auto_capture: bool,
    pub capture_enabled: bool,
    /// Whole seconds left on the pending automatic capture.
    pub countdown_secs: Option<u64>,
    pub captured: usize,
    pub camera_error: Option<String>,
    pub notice: Option<String>,
}

impl SessionStatus {
    /// Status before the session has started.
    pub fn idle(total_steps: usize) -> Self {
        Self {
            phase: Phase::AwaitingModel,
            step: None,
            total_steps,
            instruction: None,
            required: None,
            observation: Observation::NO_FACE,
            model: ModelState::Uninitialized,
            gated: true,
            auto_capture: true,
            capture_enabled: false,
            countdown_secs: None,
            captured: 0,
            camera_error: None,
            notice: None,
        }
    }

    /// The step is waiting on its hold timer.
    pub fn is_counting_down(&self) -> bool {
        matches!(self.phase, Phase::Step { state: StepState::CountingDown, .. })
    }

    pub fn is_captured(&self) -> bool {
        matches!(self.phase, Phase::Step { state: StepState::Captured, .. })
    }
}

struct Driver<'a> {
    wizard: Wizard<EncodedImage>,
    model: ModelState,
    camera_error: Option<String>,
    notice: Option<String>,
    status: &'a watch::Sender<SessionStatus>,
}

impl Driver<'_> {
    fn snapshot(&self, now: Instant) -> SessionStatus {
        let step = self.wizard.current_step();
        SessionStatus {
            phase: self.wizard.phase(),
            step: step.map(|s| s.index),
            total_steps: self.wizard.steps().len(),
            instruction: step.map(|s| s.instruction.clone()),
            required: step.map(|s| s.pose.orientation()),
            observation: self.wizard.last_observation(),
            model: self.model,
            gated: self.wizard.is_gated(),
            auto_capture: self.wizard.config().auto_capture,
            capture_enabled: self.wizard.capture_enabled(),
            countdown_secs: self.wizard.deadline().map(|d| {
                let left = d.saturating_duration_since(now);
                left.as_millis().div_ceil(1000) as u64
            }),
            captured: self.wizard.captured().len(),
            camera_error: self.camera_error.clone(),
            notice: self.notice.clone(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot(Instant::now());
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn capture(&mut self, stream: &LiveStream, due: CaptureDue) {
        match capture_frame(stream) {
            Ok(image) => {
                self.notice = None;
                if let Err(e) = self.wizard.record(image) {
                    tracing::warn!(step = due.step_index, error = %e, "capture was not recorded");
                }
            }
            Err(e) => {
                tracing::warn!(step = due.step_index, error = %e, "capture failed");
                self.notice = Some(format!("Capture failed: {e}"));
                self.wizard.capture_failed();
            }
        }
    }

    fn fail_camera(&mut self, message: String) -> SessionOutcome {
        self.wizard.cancel();
        self.camera_error = Some(message.clone());
        self.publish();
        SessionOutcome::CameraUnavailable(message)
    }
}

/// Run one pass of the capture wizard.
///
/// `open_camera` runs on a blocking worker. `model` resolves to the loaded
/// detector; a failed load either ends the session or, when the settings
/// allow it, falls back to ungated manual capture.
pub async fn run<D, C, M>(
    settings: &SessionSettings,
    open_camera: C,
    model: M,
    input: &mut mpsc::Receiver<UserInput>,
    status: &watch::Sender<SessionStatus>,
    cancel: CancellationToken,
) -> anyhow::Result<SessionOutcome>
where
    D: Detector + 'static,
    C: FnOnce() -> Result<LiveStream, CameraError> + Send + 'static,
    M: Future<Output = Result<SharedModel<D>, ModelError>>,
{
    let mut driver = Driver {
        wizard: Wizard::new(settings.steps.clone(), settings.wizard)?,
        model: ModelState::Loading,
        camera_error: None,
        notice: None,
        status,
    };
    driver.publish();

    let opened = tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionOutcome::Cancelled),
        opened = tokio::task::spawn_blocking(open_camera) => opened,
    };
    let stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::error!(error = %e, unavailable = e.is_unavailable(), "camera could not be opened");
            return Ok(driver.fail_camera(e.to_string()));
        }
        Err(join) => return Ok(driver.fail_camera(format!("camera task failed: {join}"))),
    };

    let loaded = tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionOutcome::Cancelled),
        Some(UserInput::Quit) = input.recv() => return Ok(SessionOutcome::Cancelled),
        loaded = model => loaded,
    };
    let detector = match loaded {
        Ok(detector) => {
            driver.model = ModelState::Ready;
            driver.wizard.on_model_ready();
            Some(detector)
        }
        Err(e) if settings.ungated_fallback => {
            tracing::warn!(error = %e, "continuing without face detection");
            driver.model = ModelState::Failed;
            driver.notice = Some("Face detection unavailable; capture manually.".into());
            driver.wizard.start_ungated();
            None
        }
        Err(e) => {
            driver.model = ModelState::Failed;
            driver.notice = Some(e.to_string());
            driver.publish();
            return Ok(SessionOutcome::DetectionUnavailable(e.to_string()));
        }
    };
    driver.publish();

    let mut frames = stream.subscribe();
    loop {
        let deadline = driver.wizard.deadline();
        let wake_at = tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now));

        tokio::select! {
            _ = cancel.cancelled() => {
                driver.wizard.cancel();
                tracing::info!("capture session cancelled");
                return Ok(SessionOutcome::Cancelled);
            }
            changed = frames.changed() => {
                if changed.is_err() {
                    return Ok(driver.fail_camera("camera stopped producing frames".into()));
                }
                let frame = frames.borrow_and_update().clone();
                if let (Some(frame), Some(detector)) = (frame, detector.as_ref()) {
                    let observation = detect(detector, frame, settings.thresholds).await;
                    driver.wizard.observe(observation, Instant::now());
                }
            }
            Some(request) = input.recv() => match request {
                UserInput::Quit => {
                    driver.wizard.cancel();
                    return Ok(SessionOutcome::Cancelled);
                }
                UserInput::Capture => match driver.wizard.request_capture() {
                    Ok(due) => driver.capture(&stream, due),
                    Err(e) => {
                        tracing::debug!(error = %e, "capture request ignored");
                        if driver.wizard.config().auto_capture {
                            driver.notice = Some("Capture is automatic; hold the pose.".into());
                        }
                    }
                },
            },
            _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {}
        }

        if let Some(due) = driver.wizard.poll(Instant::now()) {
            driver.capture(&stream, due);
        }
        driver.publish();

        if let Some(captures) = driver.wizard.take_captures() {
            tracing::info!(count = captures.len(), "capture set complete");
            return Ok(SessionOutcome::Completed(captures));
        }
    }
}

/// Detect on a blocking worker. Detector errors count as no face.
async fn detect<D: Detector + 'static>(
    detector: &SharedModel<D>,
    frame: Arc<Frame>,
    thresholds: OrientationThresholds,
) -> Observation {
    if frame.is_dark {
        return Observation::NO_FACE;
    }
    let detector = Arc::clone(detector);
    let result = tokio::task::spawn_blocking(move || {
        let mut detector = match detector.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        observe(&mut *detector, &frame.data, frame.width, frame.height, &thresholds)
    })
    .await;

    match result {
        Ok(Ok(observation)) => observation,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "detection failed");
            Observation::NO_FACE
        }
        Err(e) => {
            tracing::warn!(error = %e, "detection task failed");
            Observation::NO_FACE
        }
    }
}
