//! End-to-end wizard runs driven by synthetic observation timelines.

use posecap_core::{
    default_steps, CaptureDue, Observation, Orientation, Phase, Progress, Review, StepState, Wizard,
    WizardConfig,
};
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(100);

fn auto_wizard() -> Wizard<String> {
    let mut wizard = Wizard::new(default_steps(), WizardConfig::default()).unwrap();
    wizard.on_model_ready();
    wizard
}

/// Feed `orientation` every tick for `duration`, recording any capture that
/// comes due. Returns the time after the last tick.
fn hold(
    wizard: &mut Wizard<String>,
    orientation: Orientation,
    start: Instant,
    duration: Duration,
    fired: &mut Vec<CaptureDue>,
) -> Instant {
    let mut now = start;
    let end = start + duration;
    while now <= end {
        wizard.observe(Observation::face(orientation), now);
        if let Some(due) = wizard.poll(now) {
            fired.push(due);
            wizard.record(format!("frame-{}", due.step_index)).unwrap();
        }
        now += TICK;
    }
    now
}

#[test]
fn broken_hold_gives_no_partial_credit() {
    let mut wizard = auto_wizard();
    let mut fired = Vec::new();
    let t0 = Instant::now();

    // 1.9 s of straight, then a glance away.
    let t = hold(&mut wizard, Orientation::Straight, t0, Duration::from_millis(1900), &mut fired);
    assert!(fired.is_empty());
    wizard.observe(Observation::face(Orientation::Left), t);
    assert_eq!(wizard.deadline(), None);

    // A fresh, uninterrupted 2.0 s fires exactly once.
    let resumed = t + TICK;
    hold(&mut wizard, Orientation::Straight, resumed, Duration::from_millis(2000), &mut fired);
    assert_eq!(fired, vec![CaptureDue { step_index: 0 }]);
    assert_eq!(wizard.captured().len(), 1);
    assert_eq!(wizard.current_step().unwrap().index, 1);
}

#[test]
fn first_pose_captured_then_stuck_on_right() {
    let mut wizard = auto_wizard();
    let mut fired = Vec::new();
    let t0 = Instant::now();

    let t = hold(&mut wizard, Orientation::Straight, t0, Duration::from_millis(2100), &mut fired);
    assert_eq!(fired.len(), 1);
    assert_eq!(wizard.current_step().unwrap().pose.label(), "Right");

    // The user keeps looking straight: the right-pose step never completes.
    hold(&mut wizard, Orientation::Straight, t, Duration::from_secs(30), &mut fired);
    assert_eq!(fired.len(), 1);
    assert!(!wizard.is_complete());
    assert!(wizard.take_captures().is_none());
    assert_eq!(wizard.phase(), Phase::Step { index: 1, state: StepState::Aligning });
}

#[test]
fn full_run_yields_dense_ordered_set() {
    let mut wizard = auto_wizard();
    let mut fired = Vec::new();
    let mut t = Instant::now();

    for orientation in [Orientation::Straight, Orientation::Right, Orientation::Left] {
        t = hold(&mut wizard, orientation, t, Duration::from_millis(2200), &mut fired);
        // Turn back to neutral-ish between poses.
        wizard.observe(Observation::NO_FACE, t);
    }

    assert!(wizard.is_complete());
    let captures = wizard.take_captures().unwrap();
    let indices: Vec<usize> = captures.iter().map(|c| c.step_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);

    let review = Review::from_captures(captures, &default_steps()).unwrap();
    assert_eq!(review.labels(), vec!["Front", "Right", "Left"]);
    assert_eq!(review.entries()[1].image, "frame-1");
}

#[test]
fn manual_policy_follows_the_same_advance_rules() {
    let config = WizardConfig {
        auto_capture: false,
        ..WizardConfig::default()
    };
    let mut wizard: Wizard<String> = Wizard::new(default_steps(), config).unwrap();
    wizard.on_model_ready();

    let now = Instant::now();
    let mut progress = Vec::new();
    for i in 0..3 {
        wizard.observe(Observation::NO_FACE, now);
        assert!(wizard.request_capture().is_err());
        wizard.observe(Observation::face(Orientation::Unknown), now);
        wizard.request_capture().unwrap();
        progress.push(wizard.record(format!("manual-{i}")).unwrap());
    }

    assert_eq!(
        progress,
        vec![
            Progress::Advanced { next_step: 1 },
            Progress::Advanced { next_step: 2 },
            Progress::Complete
        ]
    );
    assert_eq!(wizard.take_captures().unwrap().len(), 3);
}
