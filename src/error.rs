//! Engine error types.

use cadence_config::ConfigError;
use cadence_cron::CronError;
use cadence_experiment::ExperimentError;
use cadence_mail::MailError;
use cadence_queue::QueueError;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by [`CampaignEngine`](crate::CampaignEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    Experiment(#[from] ExperimentError),

    #[error(transparent)]
    Cron(#[from] CronError),

    /// A required collaborator was not supplied to the builder.
    #[error("Engine is missing a {0}")]
    Missing(&'static str),
}
