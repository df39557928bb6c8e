//! Experiment error types.

use cadence_queue::QueueError;
use thiserror::Error;

/// Result type for experiment operations.
pub type ExperimentResult<T> = std::result::Result<T, ExperimentError>;

/// Experiment errors.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// No variant group carries this key.
    #[error("Unknown experiment group: {0}")]
    UnknownGroup(String),

    /// A controller threshold is out of range.
    #[error("Invalid experiment threshold: {0}")]
    InvalidThreshold(String),

    /// Campaign store failure.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
