//! Proprio Flux - Per-frame hand-tracking engine for upper-limb proprioception assessment
//!
//! Flux consumes detected hand landmarks frame by frame and turns them into
//! proprioceptive scores: frame classification (target vs. pointing hand) →
//! geometry (pixels, centimeters) → metric engine (score, trial latch) →
//! session state machine → storage collaborator.
//!
//! ## Modules
//!
//! - **Calibration**: Hand-size sampling that yields a centimeter scale per user
//! - **Assessment**: Trial scoring and session progression over a frame loop
//! - **Statistics**: Historical per-session means with time-window filters

pub mod calibration;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod metric;
pub mod pipeline;
pub mod session;
pub mod statistics;
pub mod storage;
pub mod types;

pub use calibration::{CalibrationEngine, CalibrationState, CalibrationUpdate};
pub use classifier::{ClassifiedFrame, FrameClassifier, SkipReason};
pub use config::{AssessmentConfig, MetricKind};
pub use detector::{HandDetector, NdjsonDetector, ReplayDetector};
pub use error::ProprioError;
pub use metric::{MetricEngine, MetricSnapshot, MetricUpdate, TrialCompletion};
pub use pipeline::{
    AssessmentEvent, AssessmentProcessor, CalibrationEvent, CalibrationProcessor, CancellationToken, FrameLoop,
};
pub use session::{SessionStateMachine, SessionSummary};
pub use statistics::{SessionHistory, StatsFilter};
pub use storage::{FileStore, KeyValueStore, MemoryStore, ProprioStore};
pub use types::{HandDetectionFrame, HandSizeCalibration, Handedness, SpasticitySeverity, UserPreference, UserProfile};

/// Proprio Flux version
pub const PROPRIO_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "proprio-flux";
