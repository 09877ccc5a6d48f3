use anyhow::Context;
use posecap_core::{steps_for, CaptureStep, OrientationThresholds, Pose, WizardConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Application configuration.
///
/// Layered as defaults, then the TOML file named by `POSECAP_CONFIG`, then
/// `POSECAP_*` environment variables, then command-line flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX detection model.
    pub model_dir: PathBuf,
    /// Frames discarded after opening the camera while exposure settles.
    pub warmup_frames: usize,
    /// Capture automatically after a contiguous hold of the right pose.
    pub auto_capture: bool,
    /// Hold duration for automatic capture, in milliseconds.
    pub hold_ms: u64,
    /// Manual capture also requires the step's orientation.
    pub require_orientation: bool,
    /// Nose offsets below this many pixels count as straight.
    pub straight_threshold: f32,
    /// Nose offsets beyond this many pixels count as turned.
    pub turn_threshold: f32,
    /// Pose sequence, in capture order.
    pub steps: Vec<Pose>,
    /// Announce readiness to a host shell over D-Bus.
    pub host_bridge: bool,
    /// Where the results screen writes captured images.
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let thresholds = OrientationThresholds::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: posecap_core::default_model_dir(),
            warmup_frames: 4,
            auto_capture: true,
            hold_ms: 2000,
            require_orientation: false,
            straight_threshold: thresholds.straight_within,
            turn_threshold: thresholds.turned_beyond,
            steps: vec![Pose::Straight, Pose::Right, Pose::Left],
            host_bridge: false,
            output_dir: PathBuf::from("captures"),
        }
    }
}

impl Config {
    /// Load from the optional config file and the environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("POSECAP_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `POSECAP_*` variables; unparsable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("POSECAP_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = get("POSECAP_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("POSECAP_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        env_parse(&get, "POSECAP_WARMUP_FRAMES", &mut self.warmup_frames);
        env_flag(&get, "POSECAP_AUTO_CAPTURE", &mut self.auto_capture);
        env_parse(&get, "POSECAP_HOLD_MS", &mut self.hold_ms);
        env_flag(&get, "POSECAP_REQUIRE_ORIENTATION", &mut self.require_orientation);
        env_parse(&get, "POSECAP_STRAIGHT_THRESHOLD", &mut self.straight_threshold);
        env_parse(&get, "POSECAP_TURN_THRESHOLD", &mut self.turn_threshold);
        env_flag(&get, "POSECAP_HOST_BRIDGE", &mut self.host_bridge);

        if let Some(v) = get("POSECAP_STEPS") {
            match parse_steps(&v) {
                Ok(steps) => self.steps = steps,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring POSECAP_STEPS"),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.steps.is_empty(), "at least one capture step is required");
        anyhow::ensure!(
            self.straight_threshold >= 0.0 && self.turn_threshold >= self.straight_threshold,
            "thresholds must satisfy 0 <= straight_threshold <= turn_threshold"
        );
        Ok(())
    }

    pub fn wizard_config(&self) -> WizardConfig {
        WizardConfig {
            auto_capture: self.auto_capture,
            hold: Duration::from_millis(self.hold_ms),
            require_orientation: self.require_orientation,
        }
    }

    pub fn thresholds(&self) -> OrientationThresholds {
        OrientationThresholds {
            straight_within: self.straight_threshold,
            turned_beyond: self.turn_threshold,
        }
    }

    pub fn capture_steps(&self) -> Vec<CaptureStep> {
        steps_for(&self.steps)
    }

    /// Without a detector, only the manual, orientation-free policy can run.
    pub fn allows_ungated_fallback(&self) -> bool {
        !self.auto_capture && !self.require_orientation
    }
}

/// Parse a comma-separated pose list, e.g. `straight,right,left`.
pub fn parse_steps(value: &str) -> Result<Vec<Pose>, String> {
    let steps = value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(Pose::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    if steps.is_empty() {
        return Err("empty step list".into());
    }
    Ok(steps)
}

fn env_parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(v) = get(key) {
        match v.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(key, value = %v, "ignoring unparsable value"),
        }
    }
}

fn env_flag(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) {
    if let Some(v) = get(key) {
        *slot = !matches!(v.trim(), "0" | "false" | "no" | "off");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.auto_capture);
        assert_eq!(config.wizard_config().hold, Duration::from_secs(2));
        assert_eq!(config.steps, vec![Pose::Straight, Pose::Right, Pose::Left]);
        assert_eq!(config.thresholds(), OrientationThresholds::default());
        assert!(!config.allows_ungated_fallback());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("POSECAP_CAMERA_DEVICE", "/dev/video3"),
            ("POSECAP_AUTO_CAPTURE", "0"),
            ("POSECAP_HOLD_MS", "1500"),
            ("POSECAP_STEPS", "straight, left"),
            ("POSECAP_TURN_THRESHOLD", "not-a-number"),
        ]));
        assert_eq!(config.camera_device, "/dev/video3");
        assert!(!config.auto_capture);
        assert_eq!(config.hold_ms, 1500);
        assert_eq!(config.steps, vec![Pose::Straight, Pose::Left]);
        assert_eq!(config.turn_threshold, 15.0);
        assert!(config.allows_ungated_fallback());
    }

    #[test]
    fn test_bad_steps_are_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("POSECAP_STEPS", "straight,up")]));
        assert_eq!(config.steps.len(), 3);
    }

    #[test]
    fn test_toml_file() {
        let config = Config::from_toml(
            r#"
            camera_device = "/dev/video1"
            auto_capture = false
            require_orientation = true
            steps = ["straight", "left", "right"]
            straight_threshold = 8.0
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video1");
        assert_eq!(config.steps, vec![Pose::Straight, Pose::Left, Pose::Right]);
        assert_eq!(config.thresholds().straight_within, 8.0);
        assert_eq!(config.hold_ms, 2000);
        assert!(!config.allows_ungated_fallback());
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(Config::from_toml("camera = \"/dev/video1\"").is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.steps.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.straight_threshold = 20.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posecap.toml");
        std::fs::write(&path, "hold_ms = 750\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.wizard_config().hold, Duration::from_millis(750));
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
