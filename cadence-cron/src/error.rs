//! Error types for periodic tasks.

use thiserror::Error;

/// Result type for cron operations.
pub type CronResult<T> = Result<T, CronError>;

/// Cron errors.
#[derive(Debug, Error)]
pub enum CronError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task already exists: {0}")]
    TaskAlreadyExists(String),

    /// Zero or otherwise unusable period
    #[error("Invalid interval for task {0}")]
    InvalidInterval(String),

    /// Returned by a task body; logged by the scheduler
    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Scheduler not running")]
    SchedulerNotRunning,

    #[error("Scheduler already running")]
    SchedulerAlreadyRunning,
}

impl CronError {
    /// Wrap any displayable error as a task failure.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed(err.to_string())
    }
}
