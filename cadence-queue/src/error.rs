//! Error types for campaign queue operations.

use cadence_slots::SlotError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
///
/// A lost compare-and-swap is not an error: store methods that transition a
/// status return `false` and callers skip the record.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Rejected sending settings; the previous settings remain in effect
    #[error("Configuration error: {0}")]
    Configuration(#[from] SlotError),

    /// A job already exists for this recipient and schedule
    #[error("Duplicate job for recipient '{recipient_id}' in schedule {schedule_id}")]
    DuplicateJob { schedule_id: Uuid, recipient_id: String },

    /// Campaign not found
    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    /// Template not found
    #[error("Template not found: {0}")]
    TemplateNotFound(Uuid),

    /// Schedule not found
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Schedule definition that can never run
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Audience lookup failed
    #[error("Audience error: {0}")]
    Audience(String),

    /// Backing store unavailable or rejected the write
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
