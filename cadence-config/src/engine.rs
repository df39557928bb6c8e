// Engine configuration sections

use crate::{ConfigValidator, Result, Validate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime knobs for the delivery engine.
///
/// Campaign-level sending windows live with each campaign; this struct only holds the
/// process-wide behaviour of the periodic workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub dispatcher: DispatcherConfig,
    pub experiment: ExperimentConfig,
    pub mail: MailConfig,
    pub cron: CronConfig,
}

/// Due-job dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Seconds between dispatcher polls
    pub poll_interval_secs: u64,
    /// Maximum due jobs taken per poll
    pub batch_limit: usize,
    /// Timeout for a single transport call
    pub transport_timeout_secs: u64,
    /// Transport failures after which a job is permanently failed
    pub max_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            batch_limit: 50,
            transport_timeout_secs: 30,
            max_attempts: 3,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }
}

/// Experiment controller thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Seconds between controller runs
    pub interval_secs: u64,
    /// Minimum sends across a variant group before evaluating
    pub min_sends: u64,
    /// Minimum hours since the group's first send
    pub min_elapsed_hours: i64,
    /// Confidence a variant must exceed to be significant
    pub confidence_threshold: f64,
    /// Lead over the runner-up, as a rate difference
    pub min_margin: f64,
    /// Split percentage given to a declared winner
    pub winner_split_percent: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            min_sends: 50,
            min_elapsed_hours: 48,
            confidence_threshold: 0.95,
            min_margin: 0.05,
            winner_split_percent: 70.0,
        }
    }
}

impl ExperimentConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Message composition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub from_address: String,
    pub from_name: Option<String>,
    /// Base URL that invite links are built from
    pub link_base: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from_address: "invites@example.com".to_string(),
            from_name: None,
            link_base: "https://example.com/rsvp".to_string(),
        }
    }
}

/// Periodic runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    pub enabled: bool,
    /// Milliseconds between scheduler ticks
    pub tick_interval_ms: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 1000,
        }
    }
}

impl CronConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> Result<()> {
        let d = &self.dispatcher;
        ConfigValidator::positive(d.poll_interval_secs, "dispatcher.poll_interval_secs")?;
        ConfigValidator::in_range(d.batch_limit, 1, 10_000, "dispatcher.batch_limit")?;
        ConfigValidator::positive(d.transport_timeout_secs, "dispatcher.transport_timeout_secs")?;
        ConfigValidator::in_range(d.max_attempts, 1, 100, "dispatcher.max_attempts")?;

        let e = &self.experiment;
        ConfigValidator::positive(e.interval_secs, "experiment.interval_secs")?;
        ConfigValidator::positive(e.min_sends, "experiment.min_sends")?;
        ConfigValidator::in_range(e.min_elapsed_hours, 0, 24 * 365, "experiment.min_elapsed_hours")?;
        ConfigValidator::in_range(
            e.confidence_threshold,
            0.5,
            0.9999,
            "experiment.confidence_threshold",
        )?;
        ConfigValidator::in_range(e.min_margin, 0.0, 1.0, "experiment.min_margin")?;
        ConfigValidator::in_range(
            e.winner_split_percent,
            1.0,
            100.0,
            "experiment.winner_split_percent",
        )?;

        ConfigValidator::is_email(&self.mail.from_address, "mail.from_address")?;
        ConfigValidator::is_url(&self.mail.link_base, "mail.link_base")?;

        ConfigValidator::positive(self.cron.tick_interval_ms, "cron.tick_interval_ms")?;
        Ok(())
    }
}
