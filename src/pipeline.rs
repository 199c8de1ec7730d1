//! Pipeline orchestration
//!
//! Ties the engines to the storage collaborator and drives them from a
//! detector. Each frame runs classify -> score -> persist to completion before
//! the next one is requested; storage failures are reported as events and never
//! stop the loop.

use chrono::Utc;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationEngine, CalibrationState, CalibrationUpdate};
use crate::classifier::SkipReason;
use crate::config::AssessmentConfig;
use crate::detector::HandDetector;
use crate::error::ProprioError;
use crate::metric::{MetricEngine, MetricSnapshot, MetricUpdate, TrialCompletion};
use crate::session::{SessionStateMachine, SessionSummary};
use crate::storage::{KeyValueStore, ProprioStore};
use crate::types::{HandDetectionFrame, HandSizeCalibration, UserPreference};

/// Observable outcome of one assessment frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AssessmentEvent {
    FrameSkipped { timestamp_ms: f64, reason: SkipReason },
    Unscorable { timestamp_ms: f64 },
    Scored { timestamp_ms: f64, score: f64, latched: bool },
    TrialCompleted(TrialCompletion),
    SessionFinished(SessionSummary),
    /// Frame arrived after the session finished and was not scored
    Idle { timestamp_ms: f64 },
    PersistenceWarning { message: String },
}

/// Observable outcome of one calibration frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CalibrationEvent {
    FrameSkipped { timestamp_ms: f64, reason: SkipReason },
    Progress { collected: usize, required: usize },
    Completed(HandSizeCalibration),
    PersistenceWarning { message: String },
}

/// Stateful assessment runner for one user
pub struct AssessmentProcessor<S> {
    engine: MetricEngine,
    store: ProprioStore<S>,
}

impl<S: KeyValueStore> AssessmentProcessor<S> {
    /// Build a processor from the user's stored profile and calibration.
    ///
    /// Fails with [`ProprioError::CalibrationNotFound`] when the user has not
    /// been calibrated yet.
    pub fn from_store(config: AssessmentConfig, store: ProprioStore<S>) -> Result<Self, ProprioError> {
        let session = SessionStateMachine::new(config.total_number_of_tasks);
        Self::with_session(config, store, session)
    }

    /// Same as [`AssessmentProcessor::from_store`] with a caller-provided session
    pub fn with_session(
        config: AssessmentConfig,
        store: ProprioStore<S>,
        session: SessionStateMachine,
    ) -> Result<Self, ProprioError> {
        config.validate()?;
        let profile = store.load_profile(&config.user_id)?;
        let calibration = profile
            .calibration()
            .ok_or_else(|| ProprioError::CalibrationNotFound {
                user_id: config.user_id.clone(),
            })?;

        info!(
            user_id = %config.user_id,
            assessment = %config.assessment_name,
            session_id = session.session_id(),
            target_cm = calibration.target_hand_size,
            "assessment ready"
        );

        let engine = MetricEngine::new(config, profile.preference(), calibration, session)?;
        Ok(Self { engine, store })
    }

    /// Classify, score and, on completion, persist the session buffer
    pub fn process_frame(&mut self, frame: &HandDetectionFrame) -> Vec<AssessmentEvent> {
        let timestamp_ms = frame.timestamp_ms;

        match self.engine.process_frame(frame) {
            MetricUpdate::Skipped(reason) => vec![AssessmentEvent::FrameSkipped { timestamp_ms, reason }],
            MetricUpdate::SessionFinished => vec![AssessmentEvent::Idle { timestamp_ms }],
            MetricUpdate::Unscorable => vec![AssessmentEvent::Unscorable { timestamp_ms }],
            MetricUpdate::Scored { score } => vec![AssessmentEvent::Scored {
                timestamp_ms,
                score,
                latched: false,
            }],
            MetricUpdate::Latched { score } => vec![AssessmentEvent::Scored {
                timestamp_ms,
                score,
                latched: true,
            }],
            MetricUpdate::TrialCompleted(completion) => {
                let mut events = Vec::with_capacity(3);
                let finished = completion.session_finished;

                if let Err(e) = self.persist_session(&completion) {
                    warn!(session_id = %completion.session_id, error = %e, "failed to persist session results");
                    events.push(AssessmentEvent::PersistenceWarning { message: e.to_string() });
                }

                events.insert(0, AssessmentEvent::TrialCompleted(completion));
                if finished {
                    events.push(AssessmentEvent::SessionFinished(self.engine.summary()));
                }
                events
            }
        }
    }

    fn persist_session(&mut self, completion: &TrialCompletion) -> Result<(), ProprioError> {
        let config = self.engine.config();
        let (user_id, assessment) = (config.user_id.clone(), config.assessment_name.clone());
        self.store.write_session_result(
            &user_id,
            &assessment,
            &completion.session_id,
            &completion.scores,
            Utc::now(),
        )
    }

    /// Arm the next trial without waiting for the display delay
    pub fn begin_next_trial(&mut self) -> bool {
        self.engine.begin_next_trial()
    }

    pub fn reset_session(&mut self) {
        self.engine.reset_session();
    }

    pub fn reset_session_with_id(&mut self, session_id: impl Into<String>) {
        self.engine.reset_session_with_id(session_id);
    }

    pub fn is_finished(&self) -> bool {
        self.engine.session().is_finished()
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        self.engine.snapshot()
    }

    pub fn summary(&self) -> SessionSummary {
        self.engine.summary()
    }

    pub fn engine(&self) -> &MetricEngine {
        &self.engine
    }

    pub fn store(&self) -> &ProprioStore<S> {
        &self.store
    }

    pub fn into_store(self) -> ProprioStore<S> {
        self.store
    }
}

/// Calibration runner that persists the result into the user's profile
pub struct CalibrationProcessor<S> {
    user_id: String,
    engine: CalibrationEngine,
    store: ProprioStore<S>,
}

impl<S: KeyValueStore> CalibrationProcessor<S> {
    pub fn new(
        user_id: impl Into<String>,
        preference: UserPreference,
        sample_target: usize,
        store: ProprioStore<S>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            engine: CalibrationEngine::new(preference, sample_target),
            store,
        }
    }

    /// Use the preference stored in the user's profile
    pub fn from_store(config: &AssessmentConfig, store: ProprioStore<S>) -> Result<Self, ProprioError> {
        config.validate()?;
        let preference = store.load_profile(&config.user_id)?.preference();
        Ok(Self::new(
            config.user_id.clone(),
            preference,
            config.calibration_samples,
            store,
        ))
    }

    pub fn start(&mut self) {
        self.engine.start();
    }

    pub fn process_frame(&mut self, frame: &HandDetectionFrame) -> Vec<CalibrationEvent> {
        match self.engine.process_frame(frame) {
            CalibrationUpdate::Ignored => Vec::new(),
            CalibrationUpdate::Skipped(reason) => vec![CalibrationEvent::FrameSkipped {
                timestamp_ms: frame.timestamp_ms,
                reason,
            }],
            CalibrationUpdate::Sampled { progress } => vec![CalibrationEvent::Progress {
                collected: progress,
                required: self.engine.sample_target(),
            }],
            CalibrationUpdate::Completed(calibration) => {
                let mut events = vec![CalibrationEvent::Completed(calibration)];
                if let Err(e) = self.store.write_calibration(&self.user_id, &calibration) {
                    warn!(user_id = %self.user_id, error = %e, "failed to persist calibration");
                    events.push(CalibrationEvent::PersistenceWarning { message: e.to_string() });
                }
                events
            }
        }
    }

    pub fn is_computed(&self) -> bool {
        self.engine.state() == CalibrationState::Computed
    }

    pub fn engine(&self) -> &CalibrationEngine {
        &self.engine
    }

    pub fn store(&self) -> &ProprioStore<S> {
        &self.store
    }

    pub fn into_store(self) -> ProprioStore<S> {
        self.store
    }
}

/// Shared teardown flag for a running frame loop
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Why a frame loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopExit {
    Cancelled,
    EndOfStream,
    /// The frame handler asked to stop
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    pub frames: usize,
    pub exit: LoopExit,
}

/// Pull-one, process-one driver over a [`HandDetector`]
#[derive(Debug, Clone, Default)]
pub struct FrameLoop {
    token: CancellationToken,
}

impl FrameLoop {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run until cancelled, the detector runs dry, or `on_frame` breaks.
    ///
    /// The cancellation flag is checked before each frame is requested, so a
    /// frame is always handled completely. Detector errors end the loop.
    pub fn run<D, F>(&self, detector: &mut D, mut on_frame: F) -> Result<LoopReport, ProprioError>
    where
        D: HandDetector + ?Sized,
        F: FnMut(&HandDetectionFrame) -> ControlFlow<()>,
    {
        let mut frames = 0;

        loop {
            if self.token.is_cancelled() {
                debug!(frames, "frame loop cancelled");
                return Ok(LoopReport {
                    frames,
                    exit: LoopExit::Cancelled,
                });
            }

            let Some(frame) = detector.detect()? else {
                debug!(frames, "detector stream ended");
                return Ok(LoopReport {
                    frames,
                    exit: LoopExit::EndOfStream,
                });
            };

            frames += 1;
            if on_frame(&frame).is_break() {
                return Ok(LoopReport {
                    frames,
                    exit: LoopExit::Stopped,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::bimanual_frame;
    use crate::detector::ReplayDetector;
    use crate::metric::tests::{reach_frame, test_config};
    use crate::storage::{MemoryStore, GUEST_ID};
    use pretty_assertions::assert_eq;

    /// Store whose writes always fail
    #[derive(Default)]
    struct ReadOnlyStore {
        inner: MemoryStore,
    }

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, ProprioError> {
            self.inner.get(key)
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<(), ProprioError> {
            Err(ProprioError::Storage("disk full".to_string()))
        }

        fn keys(&self) -> Result<Vec<String>, ProprioError> {
            self.inner.keys()
        }
    }

    struct BrokenDetector;

    impl HandDetector for BrokenDetector {
        fn detect(&mut self) -> Result<Option<HandDetectionFrame>, ProprioError> {
            Err(ProprioError::Detector("camera unplugged".to_string()))
        }
    }

    fn calibrated_store() -> ProprioStore<MemoryStore> {
        let mut store = ProprioStore::new(MemoryStore::new());
        store
            .write_calibration(
                GUEST_ID,
                &HandSizeCalibration {
                    target_hand_size: 80.0,
                    pointing_hand_size: 82.0,
                },
            )
            .unwrap();
        store
    }

    fn processor() -> AssessmentProcessor<MemoryStore> {
        AssessmentProcessor::with_session(
            test_config(),
            calibrated_store(),
            SessionStateMachine::with_id("session_test", 3),
        )
        .unwrap()
    }

    #[test]
    fn test_missing_calibration_requires_calibration() {
        let store = ProprioStore::new(MemoryStore::new());
        let err = AssessmentProcessor::from_store(test_config(), store).err().unwrap();
        assert!(err.requires_calibration());
    }

    #[test]
    fn test_completion_persists_running_buffer() {
        let mut processor = processor();

        let events = processor.process_frame(&reach_frame(0.0, 0.05));
        assert!(matches!(events.as_slice(), [AssessmentEvent::TrialCompleted(_)]));

        let record = processor
            .store()
            .read_session_result(GUEST_ID, "YourProject", "session_test")
            .unwrap()
            .unwrap();
        assert_eq!(record.data.len(), 1);
        assert!((record.data[0] - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_full_session_through_frame_loop() {
        let mut processor = processor();
        let mut detector = ReplayDetector::new(vec![
            reach_frame(0.0, 0.5),
            reach_frame(100.0, 0.05),
            reach_frame(3100.0, 0.02),
            reach_frame(6100.0, 0.004),
            reach_frame(9100.0, 0.01),
        ]);

        let mut events = Vec::new();
        let report = FrameLoop::default()
            .run(&mut detector, |frame| {
                events.extend(processor.process_frame(frame));
                if processor.is_finished() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();

        assert_eq!(report, LoopReport { frames: 4, exit: LoopExit::Stopped });
        assert_eq!(detector.remaining(), 1);

        let summary = match events.last() {
            Some(AssessmentEvent::SessionFinished(summary)) => summary.clone(),
            other => panic!("expected session summary, got {other:?}"),
        };
        assert_eq!(summary.scores.len(), 3);
        assert_eq!(summary.session_id, "session_test");

        let record = processor
            .store()
            .read_session_result(GUEST_ID, "YourProject", "session_test")
            .unwrap()
            .unwrap();
        assert_eq!(record.data, summary.scores);

        let completions = events
            .iter()
            .filter(|e| matches!(e, AssessmentEvent::TrialCompleted(_)))
            .count();
        assert_eq!(completions, 3);
    }

    #[test]
    fn test_frames_after_finish_are_idle() {
        let mut processor = processor();
        processor.process_frame(&reach_frame(0.0, 0.05));
        processor.process_frame(&reach_frame(3000.0, 0.05));
        processor.process_frame(&reach_frame(6000.0, 0.05));
        assert!(processor.is_finished());

        let events = processor.process_frame(&reach_frame(9000.0, 0.01));
        assert_eq!(events, vec![AssessmentEvent::Idle { timestamp_ms: 9000.0 }]);
        assert_eq!(processor.snapshot().scores.len(), 3);
    }

    #[test]
    fn test_session_reset_keeps_stored_calibration_and_history() {
        let mut processor = processor();
        let stored_before = processor.store().read_calibration(GUEST_ID).unwrap();

        for ts in [0.0, 3000.0, 6000.0] {
            processor.process_frame(&reach_frame(ts, 0.05));
        }
        assert!(processor.is_finished());

        processor.reset_session_with_id("session_next");
        assert!(!processor.is_finished());

        let snapshot = processor.snapshot();
        assert_eq!(snapshot.session_id, "session_next");
        assert_eq!(snapshot.repetition, 1);
        assert!(snapshot.scores.is_empty());

        let store = processor.store();
        assert_eq!(store.read_calibration(GUEST_ID).unwrap(), stored_before);
        assert!(stored_before.is_some());
        let previous = store
            .read_session_result(GUEST_ID, "YourProject", "session_test")
            .unwrap()
            .unwrap();
        assert_eq!(previous.data.len(), 3);
        assert_eq!(
            store
                .read_session_result(GUEST_ID, "YourProject", "session_next")
                .unwrap(),
            None
        );

        // The new session scores and persists under its own key
        let events = processor.process_frame(&reach_frame(9000.0, 0.05));
        assert!(matches!(events.as_slice(), [AssessmentEvent::TrialCompleted(_)]));
        let next = processor
            .store()
            .read_session_result(GUEST_ID, "YourProject", "session_next")
            .unwrap()
            .unwrap();
        assert_eq!(next.data.len(), 1);
    }

    #[test]
    fn test_persistence_failure_does_not_stop_assessment() {
        let mut kv = ReadOnlyStore::default();
        kv.inner
            .set(
                "user_guest_profile",
                r#"{"targetHandSize": 80.0, "pointingHandSize": 82.0}"#,
            )
            .unwrap();
        let mut processor = AssessmentProcessor::with_session(
            test_config(),
            ProprioStore::new(kv),
            SessionStateMachine::with_id("s", 3),
        )
        .unwrap();

        let events = processor.process_frame(&reach_frame(0.0, 0.05));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AssessmentEvent::TrialCompleted(_)));
        assert!(matches!(events[1], AssessmentEvent::PersistenceWarning { .. }));

        // In-memory state advanced regardless
        assert_eq!(processor.snapshot().scores.len(), 1);
        assert!(processor.begin_next_trial());
        let events = processor.process_frame(&reach_frame(10.0, 0.5));
        assert!(matches!(events[0], AssessmentEvent::Scored { latched: false, .. }));
    }

    #[test]
    fn test_skipped_frames_are_reported() {
        let mut processor = processor();
        let mut frame = reach_frame(0.0, 0.05);
        frame.hands.truncate(1);

        let events = processor.process_frame(&frame);
        assert_eq!(
            events,
            vec![AssessmentEvent::FrameSkipped {
                timestamp_ms: 0.0,
                reason: SkipReason::SingleHand
            }]
        );
        assert_eq!(processor.snapshot().current_score, None);
    }

    #[test]
    fn test_calibration_then_assessment() {
        let config = AssessmentConfig {
            calibration_samples: 3,
            ..test_config()
        };
        let mut calibrator =
            CalibrationProcessor::from_store(&config, ProprioStore::new(MemoryStore::new())).unwrap();
        calibrator.start();

        let mut detector = ReplayDetector::new((0..5).map(|i| bimanual_frame(i as f64, 1.6, 1.6)));
        let mut events = Vec::new();
        let report = FrameLoop::default()
            .run(&mut detector, |frame| {
                events.extend(calibrator.process_frame(frame));
                if calibrator.is_computed() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();

        assert_eq!(report.frames, 3);
        assert_eq!(
            events[0],
            CalibrationEvent::Progress {
                collected: 1,
                required: 3
            }
        );
        assert!(matches!(events.last(), Some(CalibrationEvent::Completed(_))));

        let store = calibrator.into_store();
        let stored = store.read_calibration(GUEST_ID).unwrap().unwrap();
        assert!((stored.target_hand_size - 80.0).abs() < 1e-9);
        assert!(AssessmentProcessor::from_store(config, store).is_ok());
    }

    #[test]
    fn test_cancelled_loop_requests_no_frames() {
        let token = CancellationToken::new();
        token.cancel();
        let mut detector = ReplayDetector::new(vec![reach_frame(0.0, 0.5)]);

        let report = FrameLoop::new(token).run(&mut detector, |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(report, LoopReport { frames: 0, exit: LoopExit::Cancelled });
        assert_eq!(detector.remaining(), 1);
    }

    #[test]
    fn test_cancel_from_handler_finishes_current_frame() {
        let frame_loop = FrameLoop::default();
        let token = frame_loop.token().clone();
        let mut detector = ReplayDetector::new((0..10).map(|i| reach_frame(i as f64, 0.5)));
        let mut handled = 0;

        let report = frame_loop
            .run(&mut detector, |_| {
                handled += 1;
                if handled == 2 {
                    token.cancel();
                }
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(handled, 2);
        assert_eq!(report, LoopReport { frames: 2, exit: LoopExit::Cancelled });
    }

    #[test]
    fn test_end_of_stream_and_detector_errors() {
        let mut empty = ReplayDetector::default();
        let report = FrameLoop::default().run(&mut empty, |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(report.exit, LoopExit::EndOfStream);

        let err = FrameLoop::default()
            .run(&mut BrokenDetector, |_| ControlFlow::Continue(()))
            .unwrap_err();
        assert!(matches!(err, ProprioError::Detector(_)));
    }
}
