//! Hand-size calibration
//!
//! This module collects per-frame hand-size samples for both hands and turns
//! them into a centimeter scale once enough target-hand samples are buffered.
//! The engine is serializable so an interrupted calibration can be resumed.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{FrameClassifier, SkipReason};
use crate::geometry::hand_size_from_world_landmarks;
use crate::types::{HandDetectionFrame, HandRole, HandSizeCalibration, UserPreference};

/// Default number of target-hand samples needed to finish calibration
pub const DEFAULT_CALIBRATION_SAMPLES: usize = 400;

/// Calibration lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationState {
    Idle,
    Collecting,
    Computed,
}

/// Outcome of feeding one frame to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationUpdate {
    /// The engine is not collecting (idle or already computed)
    Ignored,
    /// The frame was ambiguous and contributed nothing
    Skipped(SkipReason),
    /// One sample was added to each buffer
    Sampled { progress: usize },
    /// The target buffer filled up and the means were computed
    Completed(HandSizeCalibration),
}

/// Rolling sample buffers for one calibration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationEngine {
    /// Preference used to assign roles and choose the segment set
    preference: UserPreference,
    /// Target-hand sizes (cm)
    target_samples: Vec<f64>,
    /// Pointing-hand sizes (cm)
    pointing_samples: Vec<f64>,
    /// Target-buffer length that completes calibration
    sample_target: usize,
    state: CalibrationState,
    result: Option<HandSizeCalibration>,
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self::new(UserPreference::default(), DEFAULT_CALIBRATION_SAMPLES)
    }
}

impl CalibrationEngine {
    pub fn new(preference: UserPreference, sample_target: usize) -> Self {
        Self {
            preference,
            target_samples: Vec::with_capacity(sample_target),
            pointing_samples: Vec::with_capacity(sample_target),
            sample_target: sample_target.max(1),
            state: CalibrationState::Idle,
            result: None,
        }
    }

    /// Begin (or restart) collecting samples
    pub fn start(&mut self) {
        self.target_samples.clear();
        self.pointing_samples.clear();
        self.result = None;
        self.state = CalibrationState::Collecting;
        info!(
            impaired_hand = %self.preference.impaired_hand,
            severity = %self.preference.spasticity_severity,
            samples = self.sample_target,
            "calibration started"
        );
    }

    /// Feed one detection frame
    pub fn process_frame(&mut self, frame: &HandDetectionFrame) -> CalibrationUpdate {
        if self.state != CalibrationState::Collecting {
            return CalibrationUpdate::Ignored;
        }

        let classified = match FrameClassifier::classify(frame, self.preference.impaired_hand) {
            Ok(classified) => classified,
            Err(reason) => {
                debug!(%reason, ts = frame.timestamp_ms, "calibration frame skipped");
                return CalibrationUpdate::Skipped(reason);
            }
        };

        let severity = self.preference.spasticity_severity;
        for role_hand in classified.in_detector_order() {
            let size = hand_size_from_world_landmarks(&role_hand.hand.world_landmarks, severity);
            match role_hand.role {
                HandRole::Target => self.target_samples.push(size),
                HandRole::Pointing => self.pointing_samples.push(size),
            }
        }

        if self.target_samples.len() >= self.sample_target {
            let calibration = self.compute();
            return CalibrationUpdate::Completed(calibration);
        }

        CalibrationUpdate::Sampled {
            progress: self.target_samples.len(),
        }
    }

    /// Average both buffers, then discard them.
    ///
    /// The pointing mean uses however many samples its buffer holds.
    fn compute(&mut self) -> HandSizeCalibration {
        let calibration = HandSizeCalibration {
            target_hand_size: Self::average(&self.target_samples).unwrap_or(0.0),
            pointing_hand_size: Self::average(&self.pointing_samples).unwrap_or(0.0),
        };

        info!(
            target_cm = calibration.target_hand_size,
            pointing_cm = calibration.pointing_hand_size,
            target_samples = self.target_samples.len(),
            pointing_samples = self.pointing_samples.len(),
            "calibration computed"
        );

        self.target_samples.clear();
        self.pointing_samples.clear();
        self.state = CalibrationState::Computed;
        self.result = Some(calibration);
        calibration
    }

    fn average(samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Collected target samples, pinned at the sample target once computed
    pub fn progress(&self) -> usize {
        match self.state {
            CalibrationState::Computed => self.sample_target,
            _ => self.target_samples.len(),
        }
    }

    pub fn sample_target(&self) -> usize {
        self.sample_target
    }

    pub fn pointing_sample_count(&self) -> usize {
        self.pointing_samples.len()
    }

    pub fn result(&self) -> Option<HandSizeCalibration> {
        self.result
    }

    pub fn preference(&self) -> UserPreference {
        self.preference
    }

    /// Load engine state from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize engine state to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
