//! Configuration for vexai-eye

use crate::backend::BackendKind;
use crate::error::ConfigError;
use crate::publish::HandoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Camera acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Target frame rate (frames per second)
    pub frame_rate: u32,
    /// Stream resolution (width, height)
    pub resolution: (u32, u32),
    /// Upper bound on waiting for one frame pair
    pub frame_timeout_ms: u64,
    /// Directory of recorded frames for the replay camera
    pub replay_dir: Option<PathBuf>,
    /// Restart the recording when it runs out
    pub replay_loop: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            resolution: (640, 480),
            frame_timeout_ms: 1000,
            replay_dir: None,
            replay_loop: false,
        }
    }
}

/// Network input/output layout and decoding parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Network input (width, height)
    pub input_resolution: (u32, u32),
    /// Expected output tensor shapes, NHWC
    pub output_shapes: Vec<Vec<usize>>,
    /// Anchor indices used by each output grid
    pub masks: Vec<Vec<usize>>,
    pub anchors: Vec<(f32, f32)>,
    /// Minimum score per class
    pub class_thresholds: Vec<f32>,
    pub nms_threshold: f32,
    pub class_names: Vec<String>,
    pub inference_timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_resolution: (320, 320),
            output_shapes: vec![vec![1, 10, 10, 21], vec![1, 20, 20, 21]],
            masks: vec![vec![3, 4, 5], vec![0, 1, 2]],
            anchors: vec![
                (10.0, 14.0),
                (23.0, 27.0),
                (37.0, 58.0),
                (81.0, 82.0),
                (135.0, 169.0),
                (344.0, 319.0),
            ],
            class_thresholds: vec![0.5, 0.5],
            nms_threshold: 0.5,
            class_names: vec!["Blue Ball".to_string(), "Red Ball".to_string()],
            inference_timeout_ms: 500,
        }
    }
}

impl DetectorConfig {
    pub fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class {}", class_id))
    }
}

/// Inner window and search range for depth sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    pub window_low_percent: i32,
    pub window_high_percent: i32,
    /// Nearest depth searched when matching color to depth pixels (meters)
    pub depth_min: f32,
    /// Farthest depth searched (meters)
    pub depth_max: f32,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            window_low_percent: 45,
            window_high_percent: 55,
            depth_min: 0.05,
            depth_max: 3.0,
        }
    }
}

/// Accelerator selection and model files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Probe order; the first available backend wins
    pub policy: Vec<BackendKind>,
    pub model_dir: PathBuf,
    pub gpu_model: String,
    pub quantized_model: String,
    pub device_id: i32,
    /// Input quantization of the int8 model
    pub input_scale: f32,
    pub input_zero_point: i32,
    /// Output quantization of the int8 model, applied to int8 outputs only
    pub output_scale: f32,
    pub output_zero_point: i32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let model_dir = dirs::home_dir()
            .map(|mut p| {
                p.push(".vexai");
                p.push("models");
                p
            })
            .unwrap_or_else(|| PathBuf::from("./models"));

        Self {
            policy: vec![BackendKind::Gpu, BackendKind::Quantized],
            model_dir,
            gpu_model: "pushback_lite.onnx".to_string(),
            quantized_model: "pushback_lite_int8.onnx".to_string(),
            device_id: 0,
            input_scale: 1.0 / 255.0,
            input_zero_point: -128,
            output_scale: 0.0,
            output_zero_point: 0,
        }
    }
}

/// Camera placement on the robot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Meters ahead of the robot origin
    pub offset_forward: f32,
    /// Meters to the left of the robot origin
    pub offset_left: f32,
    /// Meters above the robot origin
    pub offset_up: f32,
    /// Downward tilt, degrees
    pub pitch_deg: f32,
    /// Turn to the left, degrees
    pub yaw_deg: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    /// A pose older than this is reported as disconnected
    pub stale_after_ms: u64,
    /// Constant pose used when no positioning sensor is attached
    pub fixed: Option<(f32, f32, f32)>,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self { stale_after_ms: 1000, fixed: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub controller: HandoffPolicy,
    pub dashboard: HandoffPolicy,
    /// JSON lines output for the controller; stdout when unset
    pub records_path: Option<PathBuf>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            controller: HandoffPolicy::Bounded { capacity: 4 },
            dashboard: HandoffPolicy::LatestOnly,
            records_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    /// Render the colormapped depth image alongside the color frame
    pub render_depth: bool,
    /// Directory the snapshot sink overwrites each frame
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: true, render_depth: true, snapshot_dir: None }
    }
}

/// Top-level configuration, resolved once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VexConfig {
    pub log_level: String,
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub depth: DepthConfig,
    pub backend: BackendConfig,
    pub mount: MountConfig,
    pub pose: PoseConfig,
    pub publish: PublishConfig,
    pub dashboard: DashboardConfig,
}

impl Default for VexConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            camera: CameraConfig::default(),
            detector: DetectorConfig::default(),
            depth: DepthConfig::default(),
            backend: BackendConfig::default(),
            mount: MountConfig::default(),
            pose: PoseConfig::default(),
            publish: PublishConfig::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl VexConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_str(&content)
    }

    /// Parse configuration from TOML text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: VexConfig = toml::from_str(content)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `VEXAI_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("VEXAI_BACKEND") {
            let policy: Vec<BackendKind> = backend
                .split(',')
                .filter_map(|name| name.trim().parse().ok())
                .collect();
            if !policy.is_empty() {
                self.backend.policy = policy;
            }
        }

        if let Some(model_dir) = lookup("VEXAI_MODEL_DIR") {
            self.backend.model_dir = PathBuf::from(model_dir);
        }

        if let Some(timeout) = lookup("VEXAI_FRAME_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.camera.frame_timeout_ms = ms;
            }
        }

        if let Some(log_level) = lookup("VEXAI_LOG_LEVEL") {
            self.log_level = log_level;
        }
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.camera.frame_timeout_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.detector.inference_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.frame_rate == 0 || self.camera.frame_rate > 120 {
            return Err("Frame rate must be between 1 and 120".to_string());
        }

        let (width, height) = self.camera.resolution;
        if width == 0 || height == 0 {
            return Err("Resolution must be non-zero".to_string());
        }

        if self.camera.frame_timeout_ms == 0 {
            return Err("Frame timeout must be non-zero".to_string());
        }

        let (in_w, in_h) = self.detector.input_resolution;
        if in_w == 0 || in_h == 0 {
            return Err("Detector input resolution must be non-zero".to_string());
        }

        if self.detector.output_shapes.is_empty() {
            return Err("At least one detector output shape is required".to_string());
        }

        if self.detector.masks.len() != self.detector.output_shapes.len() {
            return Err(format!(
                "Expected one anchor mask per output shape ({} shapes, {} masks)",
                self.detector.output_shapes.len(),
                self.detector.masks.len()
            ));
        }

        if let Some(bad) = self
            .detector
            .masks
            .iter()
            .flatten()
            .find(|&&idx| idx >= self.detector.anchors.len())
        {
            return Err(format!("Anchor mask index {} out of range", bad));
        }

        if self.detector.class_thresholds.is_empty() {
            return Err("At least one class threshold is required".to_string());
        }

        if !(0.0..=1.0).contains(&self.detector.nms_threshold) {
            return Err("NMS threshold must be within [0, 1]".to_string());
        }

        if self.detector.inference_timeout_ms == 0 {
            return Err("Inference timeout must be non-zero".to_string());
        }

        let depth = &self.depth;
        if depth.window_low_percent < 0
            || depth.window_high_percent > 100
            || depth.window_low_percent >= depth.window_high_percent
        {
            return Err("Depth window must satisfy 0 <= low < high <= 100".to_string());
        }

        if !(depth.depth_min > 0.0 && depth.depth_max > depth.depth_min) {
            return Err("Depth search range must satisfy 0 < min < max".to_string());
        }

        if self.backend.policy.is_empty() {
            return Err("Backend policy must name at least one backend".to_string());
        }

        for policy in [&self.publish.controller, &self.publish.dashboard] {
            if let HandoffPolicy::Bounded { capacity: 0 } = policy {
                return Err("Bounded publish queues need a non-zero capacity".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = VexConfig::default();
        assert_eq!(config.camera.frame_rate, 30);
        assert_eq!(config.camera.resolution, (640, 480));
        assert_eq!(config.detector.input_resolution, (320, 320));
        assert_eq!(config.detector.output_shapes.len(), 2);
        assert_eq!(config.depth.window_low_percent, 45);
        assert_eq!(config.depth.window_high_percent, 55);
        assert_eq!(config.backend.policy, vec![BackendKind::Gpu, BackendKind::Quantized]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config = VexConfig::from_str(
            r#"
            log_level = "debug"

            [camera]
            frame_rate = 15

            [mount]
            offset_forward = 0.1
            pitch_deg = 12.0

            [publish.controller]
            mode = "bounded"
            capacity = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.camera.frame_rate, 15);
        assert_eq!(config.camera.resolution, (640, 480));
        assert!((config.mount.offset_forward - 0.1).abs() < 1e-6);
        assert_eq!(config.publish.controller, HandoffPolicy::Bounded { capacity: 8 });
        assert_eq!(config.publish.dashboard, HandoffPolicy::LatestOnly);
    }

    #[test]
    fn test_config_from_str_rejects_invalid() {
        let err = VexConfig::from_str("[camera]\nframe_rate = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_config_from_str_parse_error() {
        let err = VexConfig::from_str("[camera\nframe_rate = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VEXAI_BACKEND", "quantized"),
            ("VEXAI_MODEL_DIR", "/opt/models"),
            ("VEXAI_FRAME_TIMEOUT_MS", "250"),
            ("VEXAI_LOG_LEVEL", "trace"),
        ]
        .into_iter()
        .collect();

        let mut config = VexConfig::default();
        config.apply_env_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.backend.policy, vec![BackendKind::Quantized]);
        assert_eq!(config.backend.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.frame_timeout(), Duration::from_millis(250));
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_env_ignores_garbage() {
        let mut config = VexConfig::default();
        config.apply_env_from(|key| match key {
            "VEXAI_BACKEND" => Some("tpu, fpga".to_string()),
            "VEXAI_FRAME_TIMEOUT_MS" => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(config.backend.policy, vec![BackendKind::Gpu, BackendKind::Quantized]);
        assert_eq!(config.camera.frame_timeout_ms, 1000);
    }

    #[test]
    fn test_validation_depth_window() {
        let mut config = VexConfig::default();
        config.depth.window_low_percent = 60;
        assert!(config.validate().is_err());

        config.depth.window_low_percent = 0;
        config.depth.window_high_percent = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_mask_out_of_range() {
        let mut config = VexConfig::default();
        config.detector.masks[0] = vec![3, 4, 6];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_capacity_queue() {
        let mut config = VexConfig::default();
        config.publish.controller = HandoffPolicy::Bounded { capacity: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_class_name_fallback() {
        let config = DetectorConfig::default();
        assert_eq!(config.class_name(1), "Red Ball");
        assert_eq!(config.class_name(7), "class 7");
    }
}
