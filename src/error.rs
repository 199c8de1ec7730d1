//! Error types for Proprio Flux

use thiserror::Error;

/// Errors that can occur while running an assessment or calibration flow
#[derive(Debug, Error)]
pub enum ProprioError {
    #[error("No hand-size calibration found for user '{user_id}'")]
    CalibrationNotFound { user_id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid detection frame: {0}")]
    InvalidFrame(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProprioError {
    /// Whether the host should send the user to the calibration flow
    pub fn requires_calibration(&self) -> bool {
        matches!(self, ProprioError::CalibrationNotFound { .. })
    }
}
