use thiserror::Error;

use crate::source::SourceError;

/// Failures surfaced by the estimator drivers.
///
/// Everything here is recoverable at the batch level: a failed
/// (dependent, variable-set) pair is logged and skipped, and the
/// remaining pairs still run to completion.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The requested column was absent from a row group handed to the
    /// transform. Distinct from a cell that fails numeric coercion,
    /// which simply becomes missing.
    #[error("column `{0}` not present in row group")]
    MissingColumn(String),

    /// No row in any row group survived the year filter and the
    /// complete-case drop, so there are no moments to standardize with.
    #[error("no observations survived filtering for dependent `{0}`")]
    InsufficientData(String),

    #[error("normal equations could not be pseudo-inverted: {0}")]
    Linalg(&'static str),

    /// Cooperative cancellation observed between row groups.
    #[error("estimator run cancelled")]
    Cancelled,
}
