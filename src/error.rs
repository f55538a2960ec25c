use thiserror::Error;

/// Errors raised by the estimation kernel.
///
/// Per-call outcomes such as an exhausted IMU buffer or a misaligned
/// integration window are not errors; they are reported through
/// [`crate::PreintegrationResult::status`].
#[derive(Error, Debug)]
pub enum VioError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Degenerate geometry: {reason}")]
    DegenerateGeometry { reason: String },

    #[error("Point {index} is behind the camera at the linearization point")]
    PointBehindCamera { index: usize },

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl VioError {
    pub(crate) fn degenerate(reason: impl Into<String>) -> Self {
        VioError::DegenerateGeometry {
            reason: reason.into(),
        }
    }
}

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, VioError>;
