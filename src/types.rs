//! Core types for the Proprio Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: detector frames, hand landmarks, user preferences, calibration
//! values and the role assignment produced by the frame classifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProprioError;

/// Number of landmarks in one hand pose
pub const LANDMARK_COUNT: usize = 21;

/// Landmark indices of the 21-point hand topology
pub mod joints {
    pub const WRIST: usize = 0;
    pub const THUMB_CMC: usize = 1;
    pub const THUMB_MCP: usize = 2;
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_MCP: usize = 5;
    pub const INDEX_PIP: usize = 6;
    pub const INDEX_DIP: usize = 7;
    pub const INDEX_TIP: usize = 8;
    pub const MIDDLE_MCP: usize = 9;
    pub const MIDDLE_PIP: usize = 10;
    pub const MIDDLE_DIP: usize = 11;
    pub const MIDDLE_TIP: usize = 12;
    pub const RING_MCP: usize = 13;
    pub const RING_PIP: usize = 14;
    pub const RING_DIP: usize = 15;
    pub const RING_TIP: usize = 16;
    pub const PINKY_MCP: usize = 17;
    pub const PINKY_PIP: usize = 18;
    pub const PINKY_DIP: usize = 19;
    pub const PINKY_TIP: usize = 20;
}

/// Rendering color for the hand matching the user's preference
pub const TARGET_HAND_COLOR: &str = "rgb(64, 224, 208)";

/// Rendering color for the other hand
pub const POINTING_HAND_COLOR: &str = "rgb(95, 224, 90)";

/// A tracked point. Screen landmarks are normalized to [0, 1] in x and y,
/// world landmarks are in meters relative to the hand's center.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Project onto a mirrored canvas of the given size
    pub fn to_canvas(&self, width: f64, height: f64) -> Point2D {
        Point2D {
            x: width * (1.0 - self.x),
            y: height * self.y,
        }
    }
}

/// A point on the canvas (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Handedness label, either as reported by the detector or as seen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Handedness {
    #[default]
    Left,
    Right,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }

    /// The opposite label.
    ///
    /// The camera feed is mirrored, so the detector's "Right" is the user's left hand.
    pub fn mirrored(&self) -> Self {
        match self {
            Handedness::Left => Handedness::Right,
            Handedness::Right => Handedness::Left,
        }
    }
}

impl fmt::Display for Handedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Handedness {
    type Err = ProprioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Handedness::Left),
            "right" => Ok(Handedness::Right),
            other => Err(ProprioError::InvalidConfig(format!(
                "unknown handedness '{other}' (expected Left or Right)"
            ))),
        }
    }
}

/// One hand reported by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedHand {
    /// Screen-normalized landmarks
    pub landmarks: Vec<Landmark>,
    /// Metric-scale landmarks (meters)
    #[serde(default, alias = "worldLandmarks")]
    pub world_landmarks: Vec<Landmark>,
    /// Detector handedness label (not mirror-corrected)
    pub handedness: Handedness,
    /// Detector confidence for the handedness label
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl DetectedHand {
    /// Handedness as seen by the user
    pub fn user_handedness(&self) -> Handedness {
        self.handedness.mirrored()
    }
}

/// The result of one detection cycle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HandDetectionFrame {
    /// Detection timestamp (milliseconds, monotonic); drives the trial latch
    #[serde(alias = "timestampMs")]
    pub timestamp_ms: f64,
    /// Zero or more detected hands
    #[serde(default)]
    pub hands: Vec<DetectedHand>,
}

impl HandDetectionFrame {
    pub fn new(timestamp_ms: f64, hands: Vec<DetectedHand>) -> Self {
        Self { timestamp_ms, hands }
    }

    pub fn hand_count(&self) -> usize {
        self.hands.len()
    }

    /// Parse a frame from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Spasticity severity, selecting which joints define hand size and targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpasticitySeverity {
    #[default]
    Fingertips,
    Midknuckles,
    Knuckles,
}

impl SpasticitySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpasticitySeverity::Fingertips => "fingertips",
            SpasticitySeverity::Midknuckles => "midknuckles",
            SpasticitySeverity::Knuckles => "knuckles",
        }
    }

    /// Candidate target landmarks, ordered thumb to pinkie
    pub fn target_landmarks(&self) -> [usize; 5] {
        match self {
            SpasticitySeverity::Knuckles => [2, 5, 9, 13, 17],
            SpasticitySeverity::Midknuckles => [3, 6, 10, 14, 18],
            SpasticitySeverity::Fingertips => [4, 8, 12, 16, 20],
        }
    }
}

impl fmt::Display for SpasticitySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpasticitySeverity {
    type Err = ProprioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fingertips" => Ok(SpasticitySeverity::Fingertips),
            "midknuckles" => Ok(SpasticitySeverity::Midknuckles),
            "knuckles" => Ok(SpasticitySeverity::Knuckles),
            other => Err(ProprioError::InvalidConfig(format!(
                "unknown spasticity severity '{other}'"
            ))),
        }
    }
}

/// User settings that stay fixed for the duration of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserPreference {
    pub impaired_hand: Handedness,
    pub spasticity_severity: SpasticitySeverity,
}

/// Per-user hand sizes in centimeters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandSizeCalibration {
    pub target_hand_size: f64,
    pub pointing_hand_size: f64,
}

impl HandSizeCalibration {
    /// A calibration is usable once the target hand size is positive
    pub fn is_valid(&self) -> bool {
        self.target_hand_size.is_finite() && self.target_hand_size > 0.0
    }
}

/// Persisted user profile (preferences, demographics, hand sizes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub impaired_hand: Handedness,
    #[serde(default)]
    pub spasticity_severity: SpasticitySeverity,
    #[serde(default = "default_age")]
    pub age: u32,
    #[serde(default = "default_sex")]
    pub sex: String,
    #[serde(default)]
    pub pointing_hand_size: f64,
    #[serde(default)]
    pub target_hand_size: f64,
}

fn default_age() -> u32 {
    30
}

fn default_sex() -> String {
    "Prefer not to say".to_string()
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            impaired_hand: Handedness::Left,
            spasticity_severity: SpasticitySeverity::Fingertips,
            age: default_age(),
            sex: default_sex(),
            pointing_hand_size: 0.0,
            target_hand_size: 0.0,
        }
    }
}

impl UserProfile {
    pub fn preference(&self) -> UserPreference {
        UserPreference {
            impaired_hand: self.impaired_hand,
            spasticity_severity: self.spasticity_severity,
        }
    }

    /// Stored calibration, if one has been recorded
    pub fn calibration(&self) -> Option<HandSizeCalibration> {
        let calibration = HandSizeCalibration {
            target_hand_size: self.target_hand_size,
            pointing_hand_size: self.pointing_hand_size,
        };
        calibration.is_valid().then_some(calibration)
    }
}

/// Semantic role of a hand in a bimanual task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandRole {
    /// The hand matching the user's impaired-hand preference
    Target,
    /// The other hand, reaching toward the target
    Pointing,
}

impl HandRole {
    pub fn color(&self) -> &'static str {
        match self {
            HandRole::Target => TARGET_HAND_COLOR,
            HandRole::Pointing => POINTING_HAND_COLOR,
        }
    }
}

/// Traffic-light accuracy grade for a trial score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyColor {
    Green,
    Yellow,
    Red,
}

impl AccuracyColor {
    pub fn from_score(score: f64) -> Self {
        if score < 2.0 {
            AccuracyColor::Green
        } else if score < 5.0 {
            AccuracyColor::Yellow
        } else {
            AccuracyColor::Red
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mirrored_handedness() {
        assert_eq!(Handedness::Right.mirrored(), Handedness::Left);
        assert_eq!(Handedness::Left.mirrored(), Handedness::Right);
    }

    #[test]
    fn test_parse_frame_with_camel_case_fields() {
        let json = r#"{
            "timestampMs": 16.5,
            "hands": [{
                "landmarks": [{"x": 0.5, "y": 0.25, "z": 0.0}],
                "worldLandmarks": [{"x": 0.01, "y": 0.02, "z": 0.03}],
                "handedness": "Right",
                "confidence": 0.97
            }]
        }"#;

        let frame = HandDetectionFrame::from_json(json).unwrap();
        assert_eq!(frame.hand_count(), 1);
        assert_eq!(frame.timestamp_ms, 16.5);
        assert_eq!(frame.hands[0].handedness, Handedness::Right);
        assert_eq!(frame.hands[0].user_handedness(), Handedness::Left);
        assert_eq!(frame.hands[0].world_landmarks.len(), 1);
    }

    #[test]
    fn test_canvas_projection_is_mirrored() {
        let p = Landmark::new(0.25, 0.5, 0.0).to_canvas(1000.0, 500.0);
        assert_eq!(p, Point2D::new(750.0, 250.0));
    }

    #[test]
    fn test_profile_calibration_requires_positive_target() {
        let profile = UserProfile::default();
        assert!(profile.calibration().is_none());

        let profile = UserProfile {
            target_hand_size: 81.5,
            pointing_hand_size: 80.2,
            ..Default::default()
        };
        let calibration = profile.calibration().unwrap();
        assert_eq!(calibration.target_hand_size, 81.5);
    }

    #[test]
    fn test_profile_json_uses_camel_case() {
        let json = r#"{"impairedHand":"Right","spasticitySeverity":"knuckles","targetHandSize":70.0}"#;
        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.impaired_hand, Handedness::Right);
        assert_eq!(profile.spasticity_severity, SpasticitySeverity::Knuckles);
        assert_eq!(profile.age, 30);
        assert_eq!(profile.pointing_hand_size, 0.0);
    }

    #[test]
    fn test_accuracy_color_bands() {
        assert_eq!(AccuracyColor::from_score(1.9), AccuracyColor::Green);
        assert_eq!(AccuracyColor::from_score(2.0), AccuracyColor::Yellow);
        assert_eq!(AccuracyColor::from_score(4.99), AccuracyColor::Yellow);
        assert_eq!(AccuracyColor::from_score(5.0), AccuracyColor::Red);
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!(
            "MidKnuckles".parse::<SpasticitySeverity>().unwrap(),
            SpasticitySeverity::Midknuckles
        );
        assert!("wrist".parse::<SpasticitySeverity>().is_err());
    }
}
