//! Proprioceptive metric engine
//!
//! Scores every classified frame, latches trial completion the first time the
//! score drops below the completion threshold, and feeds completed trials into
//! the session state machine.
//!
//! Trial lifecycle: `awaiting -> completed (latched)`. The latch is released
//! `display_delay_ms` after a completion (measured on the frame clock) or by an
//! explicit [`MetricEngine::begin_next_trial`], and never after the final trial.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{ClassifiedFrame, FrameClassifier, SkipReason};
use crate::config::{AssessmentConfig, MetricKind};
use crate::error::ProprioError;
use crate::geometry::{distance, hand_size_px, MovementTracker};
use crate::session::{SessionStateMachine, SessionSummary};
use crate::types::{
    joints, AccuracyColor, HandDetectionFrame, HandSizeCalibration, Point2D, UserPreference,
};

/// Trial latch state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    Awaiting,
    Completed,
}

/// The repetition currently being scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// 1-based repetition number
    pub repetition: usize,
    /// Latest score for this repetition
    pub score: Option<f64>,
    pub state: TrialState,
    /// Frame timestamp at which the trial latched
    pub completed_at_ms: Option<f64>,
}

impl Trial {
    fn new(repetition: usize) -> Self {
        Self {
            repetition,
            score: None,
            state: TrialState::Awaiting,
            completed_at_ms: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == TrialState::Completed
    }
}

/// Emitted once per completed trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialCompletion {
    pub session_id: String,
    pub repetition: usize,
    pub score: f64,
    pub accuracy: AccuracyColor,
    /// Score beat the stricter celebration threshold
    pub celebrate: bool,
    /// This completion finished the session
    pub session_finished: bool,
    /// Scores recorded so far in the session, including this one
    pub scores: Vec<f64>,
}

/// Per-frame result of the metric engine
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    /// Ambiguous frame, nothing changed
    Skipped(SkipReason),
    /// The session is finished; frames are no longer scored
    SessionFinished,
    /// Required landmarks were missing or the pixel scale was degenerate
    Unscorable,
    /// Scored while awaiting completion
    Scored { score: f64 },
    /// Scored while the trial is latched; no side effects
    Latched { score: f64 },
    /// The trial completed on this frame
    TrialCompleted(TrialCompletion),
}

/// Read-only state observed by the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub session_id: String,
    pub current_score: Option<f64>,
    pub repetition: usize,
    pub total_number_of_tasks: usize,
    pub session_finished: bool,
    pub trial_latched: bool,
    pub scores: Vec<f64>,
    pub speed: f64,
    pub movement_stopped: bool,
}

/// Scores frames for one user and owns the active trial and session
#[derive(Debug, Clone)]
pub struct MetricEngine {
    config: AssessmentConfig,
    preference: UserPreference,
    calibration: HandSizeCalibration,
    session: SessionStateMachine,
    trial: Trial,
    /// Per-trial speed history
    movement: MovementTracker,
}

impl MetricEngine {
    /// Create an engine for a calibrated user.
    ///
    /// Fails with [`ProprioError::CalibrationNotFound`] when the calibration has
    /// no usable target hand size.
    pub fn new(
        config: AssessmentConfig,
        preference: UserPreference,
        calibration: HandSizeCalibration,
        session: SessionStateMachine,
    ) -> Result<Self, ProprioError> {
        config.validate()?;
        if !calibration.is_valid() {
            return Err(ProprioError::CalibrationNotFound {
                user_id: config.user_id.clone(),
            });
        }

        let trial = Trial::new(session.repetition());
        Ok(Self {
            config,
            preference,
            calibration,
            session,
            trial,
            movement: MovementTracker::new(),
        })
    }

    /// Score one detection frame
    pub fn process_frame(&mut self, frame: &HandDetectionFrame) -> MetricUpdate {
        let classified = match FrameClassifier::classify(frame, self.preference.impaired_hand) {
            Ok(classified) => classified,
            Err(reason) => {
                debug!(%reason, ts = frame.timestamp_ms, "frame skipped");
                return MetricUpdate::Skipped(reason);
            }
        };
        self.process_classified(frame.timestamp_ms, &classified)
    }

    /// Score a frame that has already been classified
    pub fn process_classified(&mut self, timestamp_ms: f64, classified: &ClassifiedFrame<'_>) -> MetricUpdate {
        if self.session.is_finished() {
            return MetricUpdate::SessionFinished;
        }

        self.release_latch_if_due(timestamp_ms);

        let Some(score) = self.score(classified) else {
            return MetricUpdate::Unscorable;
        };
        self.track_movement(timestamp_ms, score);
        self.trial.score = Some(score);

        if self.trial.is_completed() {
            return MetricUpdate::Latched { score };
        }

        if score < self.config.completion_threshold {
            return MetricUpdate::TrialCompleted(self.complete_trial(timestamp_ms, score));
        }

        MetricUpdate::Scored { score }
    }

    fn score(&self, classified: &ClassifiedFrame<'_>) -> Option<f64> {
        let (width, height) = (self.config.frame_width, self.config.frame_height);

        let pointing = classified
            .pointing
            .hand
            .landmarks
            .get(joints::INDEX_TIP)?
            .to_canvas(width, height);
        let target = classified
            .target
            .hand
            .landmarks
            .get(self.config.target_landmark)?
            .to_canvas(width, height);

        let px = distance(pointing, target);

        match self.config.metric {
            MetricKind::FingertipDistancePx => Some(px),
            MetricKind::FingertipDistanceCm => {
                let hand_px = hand_size_px(&classified.target.hand.landmarks, width, height);
                if hand_px <= f64::EPSILON {
                    return None;
                }
                Some(px * self.calibration.target_hand_size / hand_px)
            }
        }
    }

    /// Canvas position of the comparison points (pointing, target), for overlays
    pub fn comparison_points(&self, classified: &ClassifiedFrame<'_>) -> Option<(Point2D, Point2D)> {
        let (width, height) = (self.config.frame_width, self.config.frame_height);
        let pointing = classified.pointing.hand.landmarks.get(joints::INDEX_TIP)?;
        let target = classified.target.hand.landmarks.get(self.config.target_landmark)?;
        Some((pointing.to_canvas(width, height), target.to_canvas(width, height)))
    }

    fn track_movement(&mut self, timestamp_ms: f64, score: f64) {
        self.movement.push(timestamp_ms, score);
    }

    fn complete_trial(&mut self, timestamp_ms: f64, score: f64) -> TrialCompletion {
        let repetition = self.trial.repetition;
        self.trial.state = TrialState::Completed;
        self.trial.completed_at_ms = Some(timestamp_ms);

        let session_finished = self.session.record_completion(score).unwrap_or(true);
        let celebrate = score < self.config.celebration_threshold;

        info!(
            session_id = self.session.session_id(),
            repetition,
            score,
            celebrate,
            session_finished,
            "trial completed"
        );

        TrialCompletion {
            session_id: self.session.session_id().to_string(),
            repetition,
            score,
            accuracy: AccuracyColor::from_score(score),
            celebrate,
            session_finished,
            scores: self.session.scores().to_vec(),
        }
    }

    fn release_latch_if_due(&mut self, timestamp_ms: f64) {
        if let Some(completed_at) = self.trial.completed_at_ms {
            if timestamp_ms - completed_at >= self.config.display_delay_ms {
                self.begin_next_trial();
            }
        }
    }

    /// Arm the next repetition. No effect while awaiting or after the session finished.
    pub fn begin_next_trial(&mut self) -> bool {
        if !self.trial.is_completed() || self.session.is_finished() {
            return false;
        }
        self.trial = Trial::new(self.session.repetition());
        self.movement.clear();
        debug!(repetition = self.trial.repetition, "trial armed");
        true
    }

    /// Discard the current session and start a new one; calibration is kept
    pub fn reset_session(&mut self) {
        self.session.reset();
        self.restart_trial();
    }

    /// Same as [`MetricEngine::reset_session`] with a caller-chosen identifier
    pub fn reset_session_with_id(&mut self, session_id: impl Into<String>) {
        self.session.reset_with_id(session_id);
        self.restart_trial();
    }

    fn restart_trial(&mut self) {
        self.trial = Trial::new(self.session.repetition());
        self.movement.clear();
    }

    pub fn trial(&self) -> &Trial {
        &self.trial
    }

    pub fn session(&self) -> &SessionStateMachine {
        &self.session
    }

    pub fn calibration(&self) -> HandSizeCalibration {
        self.calibration
    }

    pub fn config(&self) -> &AssessmentConfig {
        &self.config
    }

    /// Summary of the session (capped mean, colored trials)
    pub fn summary(&self) -> SessionSummary {
        self.session.summary(self.config.mean_cap)
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            session_id: self.session.session_id().to_string(),
            current_score: self.trial.score,
            repetition: self.session.repetition(),
            total_number_of_tasks: self.session.total_number_of_tasks(),
            session_finished: self.session.is_finished(),
            trial_latched: self.trial.is_completed(),
            scores: self.session.scores().to_vec(),
            speed: self.movement.speed(),
            movement_stopped: self.movement.is_stopped(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{DetectedHand, Handedness, Landmark, SpasticitySeverity};
    use pretty_assertions::assert_eq;

    /// Both index tips at the same height; `gap` is their normalized x separation.
    /// Detector "Right" is the user's left, i.e. the target for a left-impaired user.
    pub(crate) fn reach_frame(ts: f64, gap: f64) -> HandDetectionFrame {
        let mut target = vec![Landmark::new(0.4, 0.5, 0.0); 21];
        let mut pointing = vec![Landmark::new(0.4, 0.5, 0.0); 21];
        target[joints::INDEX_TIP] = Landmark::new(0.4, 0.5, 0.0);
        pointing[joints::INDEX_TIP] = Landmark::new(0.4 + gap, 0.5, 0.0);

        HandDetectionFrame::new(
            ts,
            vec![
                DetectedHand {
                    landmarks: target,
                    world_landmarks: vec![],
                    handedness: Handedness::Right,
                    confidence: 0.9,
                },
                DetectedHand {
                    landmarks: pointing,
                    world_landmarks: vec![],
                    handedness: Handedness::Left,
                    confidence: 0.9,
                },
            ],
        )
    }

    pub(crate) fn calibration() -> HandSizeCalibration {
        HandSizeCalibration {
            target_hand_size: 80.0,
            pointing_hand_size: 82.0,
        }
    }

    pub(crate) fn test_config() -> AssessmentConfig {
        AssessmentConfig {
            frame_width: 1000.0,
            frame_height: 500.0,
            ..Default::default()
        }
    }

    fn engine() -> MetricEngine {
        MetricEngine::new(
            test_config(),
            UserPreference {
                impaired_hand: Handedness::Left,
                spasticity_severity: SpasticitySeverity::Fingertips,
            },
            calibration(),
            SessionStateMachine::with_id("session_test", 3),
        )
        .unwrap()
    }

    #[test]
    fn test_missing_calibration_is_rejected() {
        let err = MetricEngine::new(
            test_config(),
            UserPreference::default(),
            HandSizeCalibration {
                target_hand_size: 0.0,
                pointing_hand_size: 0.0,
            },
            SessionStateMachine::with_id("s", 3),
        )
        .unwrap_err();
        assert!(err.requires_calibration());
    }

    #[test]
    fn test_score_is_mirrored_pixel_distance() {
        let mut engine = engine();
        // 0.3 * 1000 px apart
        match engine.process_frame(&reach_frame(0.0, 0.3)) {
            MetricUpdate::Scored { score } => assert!((score - 300.0).abs() < 1e-6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_latch_fires_exactly_once() {
        let mut engine = engine();
        let mut completions = 0;

        for i in 0..20 {
            let update = engine.process_frame(&reach_frame(i as f64 * 33.0, 0.05));
            if matches!(update, MetricUpdate::TrialCompleted(_)) {
                completions += 1;
            }
        }

        assert_eq!(completions, 1);
        assert_eq!(engine.session().scores().len(), 1);
        assert_eq!(engine.session().repetition(), 2);
        assert!(engine.trial().is_completed());
    }

    #[test]
    fn test_latch_released_after_display_delay() {
        let mut engine = engine();

        assert!(matches!(
            engine.process_frame(&reach_frame(0.0, 0.05)),
            MetricUpdate::TrialCompleted(_)
        ));
        assert!(matches!(
            engine.process_frame(&reach_frame(2999.0, 0.05)),
            MetricUpdate::Latched { .. }
        ));

        match engine.process_frame(&reach_frame(3000.0, 0.05)) {
            MetricUpdate::TrialCompleted(c) => {
                assert_eq!(c.repetition, 2);
                assert_eq!(c.scores.len(), 2);
                assert!(!c.session_finished);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_session_finishes_and_stops_scoring() {
        let mut engine = engine();
        let mut last = None;

        for rep in 0..3 {
            let ts = rep as f64 * 5000.0;
            if let MetricUpdate::TrialCompleted(c) = engine.process_frame(&reach_frame(ts, 0.005)) {
                last = Some(c);
            }
        }

        let last = last.unwrap();
        assert!(last.session_finished);
        assert!(last.celebrate);
        assert_eq!(last.repetition, 3);
        assert!(engine.session().is_finished());

        assert_eq!(
            engine.process_frame(&reach_frame(99_000.0, 0.005)),
            MetricUpdate::SessionFinished
        );
        assert!(!engine.begin_next_trial());
        assert_eq!(engine.session().scores().len(), 3);
    }

    #[test]
    fn test_reset_session_keeps_calibration() {
        let mut engine = engine();
        for rep in 0..3 {
            engine.process_frame(&reach_frame(rep as f64 * 5000.0, 0.01));
        }
        assert!(engine.session().is_finished());

        engine.reset_session_with_id("session_next");
        assert_eq!(engine.session().session_id(), "session_next");
        assert_eq!(engine.session().repetition(), 1);
        assert!(engine.session().scores().is_empty());
        assert_eq!(engine.calibration(), calibration());
        assert!(!engine.trial().is_completed());
    }

    #[test]
    fn test_ambiguous_frame_changes_nothing() {
        let mut engine = engine();
        let mut frame = reach_frame(0.0, 0.01);
        frame.hands[0].handedness = Handedness::Left;

        let before = engine.snapshot();
        assert_eq!(
            engine.process_frame(&frame),
            MetricUpdate::Skipped(SkipReason::SameHandedness)
        );
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn test_explicit_next_trial() {
        let mut engine = engine();
        engine.process_frame(&reach_frame(0.0, 0.01));
        assert!(engine.trial().is_completed());
        assert!(engine.begin_next_trial());
        assert_eq!(engine.trial().repetition, 2);
        assert!(!engine.begin_next_trial());
    }

    #[test]
    fn test_centimeter_metric_uses_calibration() {
        let mut config = test_config();
        config.metric = MetricKind::FingertipDistanceCm;
        config.completion_threshold = 5.0;

        let mut engine = MetricEngine::new(
            config,
            UserPreference::default(),
            calibration(),
            SessionStateMachine::with_id("s", 3),
        )
        .unwrap();

        // Target hand: landmark i at x = 0.001 * i -> pixel hand size 50 px at width 1000
        let mut frame = reach_frame(0.0, 0.0);
        frame.hands[0].landmarks = (0..21)
            .map(|i| Landmark::new(0.001 * i as f64, 0.5, 0.0))
            .collect();
        // Pointing tip 25 px from the target index tip (x = 0.008)
        frame.hands[1].landmarks[joints::INDEX_TIP] = Landmark::new(0.033, 0.5, 0.0);

        match engine.process_frame(&frame) {
            // 25 px * 80 cm / 50 px
            MetricUpdate::Scored { score } => assert!((score - 40.0).abs() < 1e-6, "got {score}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_tracks_speed() {
        let mut engine = engine();
        engine.process_frame(&reach_frame(0.0, 0.5));
        engine.process_frame(&reach_frame(500.0, 0.4));

        let snapshot = engine.snapshot();
        // 100 px over 0.5 s
        assert!((snapshot.speed - 200.0).abs() < 1e-6);
        assert!(!snapshot.movement_stopped);
        assert_eq!(snapshot.current_score.map(|s| s.round()), Some(400.0));
    }

    #[test]
    fn test_long_open_trial_keeps_bounded_history() {
        let mut engine = engine();
        for i in 0..5000 {
            let update = engine.process_frame(&reach_frame(i as f64 * 33.0, 0.5));
            assert!(matches!(update, MetricUpdate::Scored { .. }));
        }

        assert_eq!(engine.movement.samples(), 5000);
        assert!(engine.snapshot().movement_stopped);
        assert_eq!(engine.snapshot().speed, 0.0);

        engine.process_frame(&reach_frame(200_000.0, 0.05));
        assert!(engine.begin_next_trial());
        assert_eq!(engine.movement.samples(), 0);
        assert!(!engine.snapshot().movement_stopped);
    }
}
