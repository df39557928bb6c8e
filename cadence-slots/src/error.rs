//! Error types for slot allocation.

use thiserror::Error;

/// Result type for slot operations.
pub type SlotResult<T> = Result<T, SlotError>;

/// Configuration errors raised while building sending windows.
///
/// Every variant means the settings were rejected as a whole; callers keep
/// their previous settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    /// Time of day not in `HH:MM` form
    #[error("Invalid time of day '{0}', expected HH:MM")]
    InvalidTime(String),

    /// Window whose end is not after its start
    #[error("Window {start}-{end} is empty: end must be after start")]
    EmptyWindow { start: String, end: String },

    /// No sending windows configured
    #[error("At least one sending window is required")]
    NoWindows,

    /// Quiet hours cover every window minute
    #[error("Quiet hours leave no admissible sending minute")]
    NoAdmissibleMinutes,

    /// Throttle outside the accepted range
    #[error("Throttle per minute must be between 1 and 10000, got {0}")]
    InvalidThrottle(u32),

    /// Concurrency outside the accepted range
    #[error("Max concurrent must be between 1 and 10000, got {0}")]
    InvalidConcurrency(u32),

    /// Per-domain cap outside the accepted range
    #[error("Per-domain limit for '{domain}' must be between 1 and 10000, got {limit}")]
    InvalidDomainLimit { domain: String, limit: u32 },

    /// Unknown IANA time zone
    #[error("Unknown time zone: {0}")]
    UnknownTimeZone(String),

    /// Smart window whose end is not after its start
    #[error("Smart window end {end} must be after start {start}")]
    InvalidSmartWindow { start: String, end: String },
}
