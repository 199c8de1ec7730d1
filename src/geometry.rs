//! Geometry utilities
//!
//! Pure functions over landmarks and scores: planar and 3D distances, hand-size
//! scales, speeds, and the plain and capped means used for session reporting.

use std::collections::VecDeque;

use crate::types::{Landmark, Point2D, SpasticitySeverity};

/// Meters to centimeters
const CM_PER_M: f64 = 100.0;

/// Full-hand segments: every digit from the wrist out to its tip, plus wrist-pinkie base.
pub const FINGERTIP_SEGMENTS: [(usize, usize); 21] = [
    (0, 1), (1, 2), (2, 3), (3, 4),
    (0, 5), (5, 6), (6, 7), (7, 8),
    (5, 9), (9, 10), (10, 11), (11, 12),
    (9, 13), (13, 14), (14, 15), (15, 16),
    (13, 17), (17, 18), (18, 19), (19, 20),
    (0, 17),
];

/// Proximal phalanges plus the palm rays to the wrist
pub const MIDKNUCKLE_SEGMENTS: [(usize, usize); 7] = [
    (6, 5), (10, 9), (14, 13), (18, 17),
    (2, 0), (5, 0), (17, 0),
];

/// Palm outline only
pub const KNUCKLE_SEGMENTS: [(usize, usize); 4] = [(5, 0), (17, 0), (17, 5), (2, 0)];

/// Number of trailing speeds averaged by [`movement_stopped`]
pub const MOVEMENT_WINDOW: usize = 30;

/// Minimum speed history before [`movement_stopped`] can report a stop
pub const MOVEMENT_MIN_SAMPLES: usize = 100;

/// Mean speed below which the hand counts as still
pub const MOVEMENT_STOPPED_SPEED: f64 = 2.0;

/// Segment pairs summed into the hand-size scale for a severity level
pub fn joint_pairs(severity: SpasticitySeverity) -> &'static [(usize, usize)] {
    match severity {
        SpasticitySeverity::Fingertips => &FINGERTIP_SEGMENTS,
        SpasticitySeverity::Midknuckles => &MIDKNUCKLE_SEGMENTS,
        SpasticitySeverity::Knuckles => &KNUCKLE_SEGMENTS,
    }
}

/// Planar Euclidean distance
pub fn distance(p1: Point2D, p2: Point2D) -> f64 {
    let dx = p1.x - p2.x;
    let dy = p1.y - p2.y;
    (dx * dx + dy * dy).sqrt()
}

/// Euclidean distance between two landmarks in all three axes
pub fn distance_3d(a: &Landmark, b: &Landmark) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Hand size in centimeters from world landmarks (meters).
///
/// Segments with a missing endpoint are skipped.
pub fn hand_size_from_world_landmarks(landmarks: &[Landmark], severity: SpasticitySeverity) -> f64 {
    let sum: f64 = joint_pairs(severity)
        .iter()
        .filter_map(|&(s, e)| Some(distance_3d(landmarks.get(s)?, landmarks.get(e)?)))
        .sum();

    sum * CM_PER_M
}

/// Hand size in canvas pixels from screen-normalized landmarks (full-hand segments)
pub fn hand_size_px(landmarks: &[Landmark], width: f64, height: f64) -> f64 {
    FINGERTIP_SEGMENTS
        .iter()
        .filter_map(|&(s, e)| {
            let start = landmarks.get(s)?.to_canvas(width, height);
            let end = landmarks.get(e)?.to_canvas(width, height);
            Some(distance(start, end))
        })
        .sum()
}

/// Speed from the last two distance samples over `dt_seconds`
pub fn speed(distances: &[f64], dt_seconds: f64) -> f64 {
    if distances.len() < 2 || dt_seconds <= 0.0 {
        return 0.0;
    }
    let last = distances.len() - 1;
    (distances[last] - distances[last - 1]).abs() / dt_seconds
}

/// True once enough speed history exists and the recent mean speed is near zero
pub fn movement_stopped(speeds: &[f64]) -> bool {
    if speeds.len() <= MOVEMENT_MIN_SAMPLES {
        return false;
    }
    let recent = &speeds[speeds.len() - MOVEMENT_WINDOW..];
    let mean = recent.iter().sum::<f64>() / recent.len() as f64;
    mean < MOVEMENT_STOPPED_SPEED
}

/// Running speed history for one trial.
///
/// Keeps the sample count and only the last [`MOVEMENT_WINDOW`] speeds, which is
/// all [`movement_stopped`] looks at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementTracker {
    last_distance: Option<f64>,
    last_frame_ms: Option<f64>,
    samples: usize,
    recent: VecDeque<f64>,
}

impl MovementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a distance observed at `timestamp_ms` and return the derived speed
    pub fn push(&mut self, timestamp_ms: f64, distance: f64) -> f64 {
        let current = match (self.last_distance, self.last_frame_ms) {
            (Some(last), Some(last_ms)) => speed(&[last, distance], (timestamp_ms - last_ms) / 1000.0),
            _ => 0.0,
        };

        if self.recent.len() == MOVEMENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(current);
        self.samples += 1;
        self.last_distance = Some(distance);
        self.last_frame_ms = Some(timestamp_ms);
        current
    }

    pub fn speed(&self) -> f64 {
        self.recent.back().copied().unwrap_or(0.0)
    }

    /// Speeds recorded since the last clear
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn is_stopped(&self) -> bool {
        if self.samples <= MOVEMENT_MIN_SAMPLES {
            return false;
        }
        let mean = self.recent.iter().sum::<f64>() / self.recent.len() as f64;
        mean < MOVEMENT_STOPPED_SPEED
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Arithmetic mean; 0 for empty input
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean after capping every value at `cap`, rounded to 2 decimals; 0 for empty input
pub fn mean_capped(values: &[f64], cap: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values.iter().map(|v| v.min(cap)).sum();
    round2(sum / values.len() as f64)
}

/// Position (percent) of an error on the 0-10 impairment scale, 100 = no error
pub fn impairment_scale_position(error: f64) -> f64 {
    let clamped = error.clamp(0.0, 10.0);
    (1.0 - clamped / 10.0) * 100.0
}
