//! Assessment configuration

use serde::{Deserialize, Serialize};

use crate::calibration::DEFAULT_CALIBRATION_SAMPLES;
use crate::error::ProprioError;
use crate::storage::GUEST_ID;

/// Default number of trials in a session
pub const DEFAULT_TOTAL_TASKS: usize = 3;

/// Default completion threshold (canvas pixels)
pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 100.0;

/// Default threshold for celebratory feedback
pub const DEFAULT_CELEBRATION_THRESHOLD: f64 = 8.0;

/// Default delay before the next trial is armed (milliseconds)
pub const DEFAULT_DISPLAY_DELAY_MS: f64 = 3000.0;

/// Default cap applied to scores when reporting a session mean
pub const DEFAULT_MEAN_CAP: f64 = 10.0;

/// Default assessment name used in storage keys
pub const DEFAULT_ASSESSMENT_NAME: &str = "YourProject";

/// Which proprioceptive score the metric engine computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Fingertip-to-fingertip distance in canvas pixels
    #[default]
    FingertipDistancePx,
    /// The same distance converted to centimeters with the calibrated hand size
    FingertipDistanceCm,
}

/// Tunables for one assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    pub user_id: String,
    pub assessment_name: String,
    pub total_number_of_tasks: usize,
    pub completion_threshold: f64,
    pub celebration_threshold: f64,
    pub display_delay_ms: f64,
    pub frame_width: f64,
    pub frame_height: f64,
    pub metric: MetricKind,
    /// Target-hand landmark the pointing index fingertip reaches for
    pub target_landmark: usize,
    pub mean_cap: f64,
    pub calibration_samples: usize,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            user_id: GUEST_ID.to_string(),
            assessment_name: DEFAULT_ASSESSMENT_NAME.to_string(),
            total_number_of_tasks: DEFAULT_TOTAL_TASKS,
            completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            celebration_threshold: DEFAULT_CELEBRATION_THRESHOLD,
            display_delay_ms: DEFAULT_DISPLAY_DELAY_MS,
            frame_width: 1280.0,
            frame_height: 720.0,
            metric: MetricKind::FingertipDistancePx,
            target_landmark: crate::types::joints::INDEX_TIP,
            mean_cap: DEFAULT_MEAN_CAP,
            calibration_samples: DEFAULT_CALIBRATION_SAMPLES,
        }
    }
}

impl AssessmentConfig {
    /// Reject configurations the engines cannot run with
    pub fn validate(&self) -> Result<(), ProprioError> {
        let invalid = |msg: &str| Err(ProprioError::InvalidConfig(msg.to_string()));

        if self.user_id.trim().is_empty() {
            return invalid("user_id must not be empty");
        }
        if self.assessment_name.trim().is_empty() {
            return invalid("assessment_name must not be empty");
        }
        if self.total_number_of_tasks == 0 {
            return invalid("total_number_of_tasks must be at least 1");
        }
        if !(self.completion_threshold > 0.0) {
            return invalid("completion_threshold must be positive");
        }
        if self.celebration_threshold < 0.0 {
            return invalid("celebration_threshold must not be negative");
        }
        if self.display_delay_ms < 0.0 {
            return invalid("display_delay_ms must not be negative");
        }
        if !(self.frame_width > 0.0 && self.frame_height > 0.0) {
            return invalid("frame dimensions must be positive");
        }
        if self.target_landmark >= crate::types::LANDMARK_COUNT {
            return invalid("target_landmark must be a valid hand landmark index (0-20)");
        }
        if !(self.mean_cap > 0.0) {
            return invalid("mean_cap must be positive");
        }
        if self.calibration_samples == 0 {
            return invalid("calibration_samples must be at least 1");
        }
        Ok(())
    }

    /// Load and validate a configuration from JSON; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self, ProprioError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
