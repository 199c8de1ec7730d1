//! Session state machine
//!
//! A session is an ordered run of trial scores bounded by the configured number
//! of tasks. Sessions are identified by a second-resolution local timestamp.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::geometry::{impairment_scale_position, mean_capped};
use crate::types::AccuracyColor;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Finished,
}

/// Build a session identifier such as `session_2024-3-7_9-5-12`
pub fn generate_session_id<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    format!(
        "session_{}-{}-{}_{}-{}-{}",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// One trial line in a finished-session summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub repetition: usize,
    pub score: f64,
    pub accuracy: AccuracyColor,
}

/// What the UI shows once a session has finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub scores: Vec<f64>,
    pub trials: Vec<TrialSummary>,
    /// Mean with each score capped, rounded to 2 decimals
    pub capped_mean: f64,
    /// Where the capped mean sits on the 0-10 impairment scale (percent)
    pub impairment_position: f64,
}

/// Repetition counter and score buffer for the active session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateMachine {
    session_id: String,
    total_number_of_tasks: usize,
    /// 1-based; exceeds `total_number_of_tasks` once finished
    repetition: usize,
    scores: Vec<f64>,
    status: SessionStatus,
}

impl SessionStateMachine {
    /// Start a session identified by the current local time
    pub fn new(total_number_of_tasks: usize) -> Self {
        Self::with_id(generate_session_id(&Local::now()), total_number_of_tasks)
    }

    pub fn with_id(session_id: impl Into<String>, total_number_of_tasks: usize) -> Self {
        Self {
            session_id: session_id.into(),
            total_number_of_tasks: total_number_of_tasks.max(1),
            repetition: 1,
            scores: Vec::with_capacity(total_number_of_tasks),
            status: SessionStatus::Running,
        }
    }

    /// Record a completed trial.
    ///
    /// Returns `None` once the session has finished, otherwise whether this was
    /// the final trial.
    pub fn record_completion(&mut self, score: f64) -> Option<bool> {
        if self.status == SessionStatus::Finished {
            return None;
        }

        self.scores.push(score);
        self.repetition += 1;

        let finished = self.repetition > self.total_number_of_tasks;
        if finished {
            self.status = SessionStatus::Finished;
            info!(
                session_id = %self.session_id,
                trials = self.scores.len(),
                "session finished"
            );
        }
        Some(finished)
    }

    /// Start a fresh session with a newly generated identifier
    pub fn reset(&mut self) {
        self.reset_with_id(generate_session_id(&Local::now()));
    }

    pub fn reset_with_id(&mut self, session_id: impl Into<String>) {
        self.session_id = session_id.into();
        self.repetition = 1;
        self.scores.clear();
        self.status = SessionStatus::Running;
        info!(session_id = %self.session_id, "new session started");
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    pub fn repetition(&self) -> usize {
        self.repetition
    }

    pub fn total_number_of_tasks(&self) -> usize {
        self.total_number_of_tasks
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    /// Score list, capped mean and per-trial colors
    pub fn summary(&self, cap: f64) -> SessionSummary {
        let capped_mean = mean_capped(&self.scores, cap);
        let trials = self
            .scores
            .iter()
            .enumerate()
            .map(|(i, &score)| TrialSummary {
                repetition: i + 1,
                score,
                accuracy: AccuracyColor::from_score(score),
            })
            .collect();

        SessionSummary {
            session_id: self.session_id.clone(),
            scores: self.scores.clone(),
            trials,
            capped_mean,
            impairment_position: impairment_scale_position(capped_mean),
        }
    }
}
