use crate::database::DatabaseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Grouping failed: {reason}")]
    GroupingFailed { reason: String },

    #[error("Feature extraction failed for {asset_id}: {message}")]
    Extraction { asset_id: String, message: String },

    #[error("Cache error: {0}")]
    Cache(#[from] DatabaseError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        AnalysisError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn grouping_failed(reason: impl Into<String>) -> Self {
        AnalysisError::GroupingFailed {
            reason: reason.into(),
        }
    }

    /// Whether the orchestrator may skip the affected asset and keep going.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AnalysisError::Cancelled)
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
