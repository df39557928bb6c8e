//! Periodic evaluation and rebalancing of variant groups.

use cadence_config::ExperimentConfig;
use cadence_log::{debug, info, warn};
use cadence_queue::{CampaignStore, ExperimentAssignment, ScheduleStatus};
use cadence_slots::Clock;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{ExperimentError, ExperimentResult};
use crate::metrics::{VariantGroup, collect_groups};
use crate::stats::{DecisionRule, pick_winner};

/// How a declared split is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Each run draws every variant schedule active or suppressed by its split.
    #[default]
    WeightedDraw,
    /// Every variant stays active; recipients are routed by a stable hash bucket.
    RecipientBucket,
}

/// Controller thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub min_sends: u64,
    pub min_elapsed: Duration,
    pub confidence_threshold: f64,
    pub min_margin: f64,
    pub winner_split_percent: f64,
    pub policy: SplitPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_sends: 50,
            min_elapsed: Duration::hours(48),
            confidence_threshold: 0.95,
            min_margin: 0.05,
            winner_split_percent: 70.0,
            policy: SplitPolicy::WeightedDraw,
        }
    }
}

impl ControllerConfig {
    pub fn with_policy(mut self, policy: SplitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn validate(&self) -> ExperimentResult<()> {
        if !(0.0..1.0).contains(&self.confidence_threshold) {
            return Err(ExperimentError::InvalidThreshold(format!(
                "confidence threshold {} must be in [0, 1)",
                self.confidence_threshold
            )));
        }
        if !(0.0..=100.0).contains(&self.winner_split_percent) {
            return Err(ExperimentError::InvalidThreshold(format!(
                "winner split {} must be a percentage",
                self.winner_split_percent
            )));
        }
        if self.min_margin < 0.0 {
            return Err(ExperimentError::InvalidThreshold(format!(
                "margin {} must not be negative",
                self.min_margin
            )));
        }
        Ok(())
    }

    fn rule(&self) -> DecisionRule {
        DecisionRule {
            confidence_threshold: self.confidence_threshold,
            min_margin: self.min_margin,
        }
    }
}

impl From<&ExperimentConfig> for ControllerConfig {
    fn from(config: &ExperimentConfig) -> Self {
        Self {
            min_sends: config.min_sends,
            min_elapsed: Duration::hours(config.min_elapsed_hours),
            confidence_threshold: config.confidence_threshold,
            min_margin: config.min_margin,
            winner_split_percent: config.winner_split_percent,
            policy: SplitPolicy::default(),
        }
    }
}

/// Counters of one controller run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerReport {
    /// Variant groups with more than one schedule
    pub tests_monitored: usize,
    /// Schedule status changes made by draws
    pub adjustments_made: usize,
    pub winners_declared: usize,
}

/// Where a group stands after one run.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupOutcome {
    /// Below the send or age gate
    Collecting { sends: u64, elapsed: Duration },
    /// Evaluated without a winner
    Undecided,
    /// A winner was declared and the split written
    Declared { winner: String, toggled: usize },
    /// An earlier split was drawn again
    Redrawn { toggled: usize },
}

/// Evaluates variant groups and realizes declared splits.
pub struct ExperimentController {
    store: Arc<dyn CampaignStore>,
    clock: Arc<dyn Clock>,
    config: ControllerConfig,
    rng: Mutex<StdRng>,
}

impl ExperimentController {
    pub fn new(store: Arc<dyn CampaignStore>, clock: Arc<dyn Clock>, config: ControllerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Use a seeded generator for reproducible draws.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Evaluate every variant group once.
    ///
    /// A failing group is logged and skipped.
    pub async fn run(&self) -> ExperimentResult<ControllerReport> {
        let now = self.clock.now();
        let mut report = ControllerReport::default();

        for group in collect_groups(self.store.as_ref()).await? {
            if !group.is_experiment() {
                continue;
            }
            report.tests_monitored += 1;

            match self.process_group(&group, now).await {
                Ok(GroupOutcome::Declared { winner, toggled }) => {
                    info!(group = %group.key, winner = %winner, "Experiment winner declared");
                    report.winners_declared += 1;
                    report.adjustments_made += toggled;
                }
                Ok(GroupOutcome::Redrawn { toggled }) => report.adjustments_made += toggled,
                Ok(GroupOutcome::Collecting { sends, elapsed }) => {
                    debug!(
                        group = %group.key,
                        sends,
                        elapsed_hours = elapsed.num_hours(),
                        "Experiment still collecting"
                    );
                }
                Ok(GroupOutcome::Undecided) => {
                    debug!(group = %group.key, "No significant winner");
                }
                Err(e) => {
                    warn!(group = %group.key, error = %e, "Experiment evaluation failed");
                }
            }
        }

        Ok(report)
    }

    /// Move one group forward.
    pub async fn process_group(
        &self,
        group: &VariantGroup,
        now: DateTime<Utc>,
    ) -> ExperimentResult<GroupOutcome> {
        if group.is_decided() {
            let toggled = self.apply_split(group, None).await?;
            return Ok(GroupOutcome::Redrawn { toggled });
        }

        let sends = group.total_sends();
        let elapsed = group.elapsed(now);
        if sends < self.config.min_sends
            || group.first_send_at.is_none()
            || elapsed < self.config.min_elapsed
        {
            return Ok(GroupOutcome::Collecting { sends, elapsed });
        }

        let Some(winner) = pick_winner(&group.metrics, self.config.rule()) else {
            return Ok(GroupOutcome::Undecided);
        };

        let assignments = split_assignments(group, winner, self.config.winner_split_percent, now);
        for (schedule, assignment) in group.schedules.iter().zip(&assignments) {
            self.store
                .set_assignment(schedule.id, Some(assignment.clone()))
                .await?;
        }

        let toggled = self.apply_split(group, Some(&assignments)).await?;
        Ok(GroupOutcome::Declared {
            winner: group.metrics[winner].variant.clone(),
            toggled,
        })
    }

    /// Realize the split on schedule statuses; returns how many changed.
    async fn apply_split(
        &self,
        group: &VariantGroup,
        fresh: Option<&[ExperimentAssignment]>,
    ) -> ExperimentResult<usize> {
        if self.config.policy == SplitPolicy::RecipientBucket {
            return Ok(0);
        }

        let mut toggled = 0;
        for (index, schedule) in group.schedules.iter().enumerate() {
            let split = match fresh {
                Some(assignments) => assignments[index].split_percent,
                None => match &schedule.assignment {
                    Some(assignment) => assignment.split_percent,
                    None => continue,
                },
            };
            if !matches!(schedule.status, ScheduleStatus::Scheduled | ScheduleStatus::Draft) {
                continue;
            }

            let active = self.rng.lock().await.random::<f64>() * 100.0 < split;
            let target = if active {
                ScheduleStatus::Scheduled
            } else {
                ScheduleStatus::Draft
            };
            if target != schedule.status
                && self
                    .store
                    .transition_schedule(schedule.id, &[schedule.status], target)
                    .await?
            {
                debug!(schedule_id = %schedule.id, status = ?target, "Variant toggled");
                toggled += 1;
            }
        }
        Ok(toggled)
    }

    /// Return a decided group to collecting.
    ///
    /// Clears its assignments and reactivates variants suppressed to draft.
    /// Returns how many schedules were reset.
    pub async fn reset(&self, group_key: &str) -> ExperimentResult<usize> {
        let groups: Vec<VariantGroup> = collect_groups(self.store.as_ref())
            .await?
            .into_iter()
            .filter(|g| g.key == group_key)
            .collect();
        if groups.is_empty() {
            return Err(ExperimentError::UnknownGroup(group_key.to_string()));
        }

        let mut reset = 0;
        for schedule in groups.iter().flat_map(|g| &g.schedules) {
            if schedule.assignment.is_none() {
                continue;
            }
            self.store.set_assignment(schedule.id, None).await?;
            self.store
                .transition_schedule(schedule.id, &[ScheduleStatus::Draft], ScheduleStatus::Scheduled)
                .await?;
            reset += 1;
        }

        info!(group = group_key, schedules = reset, "Experiment reset");
        Ok(reset)
    }
}

/// Winner gets `winner_split`; the others share the rest equally.
///
/// Bucket ranges are laid out in group order and the last one ends at 100.
pub fn split_assignments(
    group: &VariantGroup,
    winner: usize,
    winner_split: f64,
    now: DateTime<Utc>,
) -> Vec<ExperimentAssignment> {
    let others = group.metrics.len().saturating_sub(1).max(1) as f64;
    let residual = (100.0 - winner_split) / others;
    let last = group.metrics.len().saturating_sub(1);

    let mut floor = 0.0;
    group
        .metrics
        .iter()
        .enumerate()
        .map(|(index, metrics)| {
            // The last span absorbs rounding so the shares end exactly at 100.
            let split = if index == last {
                100.0 - floor
            } else if index == winner {
                winner_split
            } else {
                residual
            };
            let assignment = ExperimentAssignment {
                group_key: group.key.clone(),
                variant: metrics.variant.clone(),
                split_percent: split,
                bucket_floor: floor,
                updated_at: now,
            };
            floor += split;
            assignment
        })
        .collect()
}
