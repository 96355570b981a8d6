use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::camera::CameraPosition;
use crate::error::AppError;

/// Top-level engine configuration.
///
/// Values come from the defaults below, an optional file, and `POSECOACH__*`
/// environment variables, in that order of precedence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub feedback: FeedbackConfig,
    pub capture: CaptureConfig,
    pub inference: InferenceConfig,
    pub authorization: AuthorizationConfig,
    pub logging: LoggingConfig,
}

/// Debounce thresholds for the feedback state machine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub correct_threshold: f32,
    pub miss_streak_threshold: u32,
    pub tutorial_cooldown_ms: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            correct_threshold: 0.70,
            miss_streak_threshold: 8,
            tutorial_cooldown_ms: 60_000,
        }
    }
}

impl FeedbackConfig {
    pub fn tutorial_cooldown(&self) -> Duration {
        Duration::from_millis(self.tutorial_cooldown_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub default_camera: CameraPosition,
    pub frame_queue_depth: usize,
    pub frames_per_second: u32,
    pub sample_interval_ms: u64,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_camera: CameraPosition::Front,
            frame_queue_depth: 2,
            frames_per_second: 30,
            sample_interval_ms: 250,
            frame_width: 120,
            frame_height: 160,
        }
    }
}

impl CaptureConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frames_per_second.max(1) as f64)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Path to a template model file. The demo bootstraps one when unset.
    pub model_path: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl InferenceConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    pub timeout_ms: u64,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl AuthorizationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Configuration {
    /// Loads the configuration, layering the optional file and environment over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let configuration: Configuration = builder
            .add_source(Environment::with_prefix("POSECOACH").separator("__"))
            .build()?
            .try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let threshold = self.feedback.correct_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::InvalidConfig(format!(
                "feedback.correct_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.feedback.miss_streak_threshold == 0 {
            return Err(AppError::InvalidConfig(
                "feedback.miss_streak_threshold must be at least 1".to_string(),
            ));
        }
        if self.capture.frame_queue_depth == 0 {
            return Err(AppError::InvalidConfig(
                "capture.frame_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.capture.frames_per_second == 0 {
            return Err(AppError::InvalidConfig(
                "capture.frames_per_second must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
