//! Turning schedules into slotted jobs, and re-slotting on settings changes.

use crate::audience::AudienceSource;
use crate::error::{QueueError, QueueResult};
use crate::model::{
    CampaignId, EmailJob, EventKind, JobEvent, JobId, JobStatus, Recipient, Schedule, ScheduleId,
    ScheduleStatus, Timing,
};
use crate::store::CampaignStore;
use cadence_log::{debug, info, warn};
use cadence_slots::{
    CampaignSettings, Clock, MAX_LIMIT, Occupancy, ReconfigureRequest, SendingPlan, SlotCursor,
    SlotResult, SmartWindowResolver,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Decides whether a recipient belongs to a schedule's share of an experiment.
pub trait RecipientFilter: Send + Sync {
    fn admits(&self, schedule: &Schedule, recipient: &Recipient) -> bool;
}

/// Result of a settings change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconfigureOutcome {
    pub reassigned_count: usize,
}

/// Whether a run creates jobs or only sizes the audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Live,
    Preview,
}

/// Counters of one materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Materialized {
    pub created: usize,
    pub duplicates: usize,
    /// Contacts without an email or invite token
    pub skipped: usize,
    /// Recipients routed to another experiment arm
    pub filtered: usize,
}

/// Outcome of running one schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Deferred { until: DateTime<Utc> },
    Materialized(Materialized),
    Preview { audience: usize, sendable: usize },
}

/// Totals of one pass over due schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaterializeReport {
    pub schedules_run: usize,
    pub deferred: usize,
    pub created: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Creates jobs from schedules and keeps their send times in line with the campaign settings.
pub struct Planner {
    store: Arc<dyn CampaignStore>,
    audience: Arc<dyn AudienceSource>,
    clock: Arc<dyn Clock>,
    filter: Option<Arc<dyn RecipientFilter>>,
}

impl Planner {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        audience: Arc<dyn AudienceSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audience,
            clock,
            filter: None,
        }
    }

    /// Route recipients through `filter` at materialization.
    pub fn with_filter(mut self, filter: Arc<dyn RecipientFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Replace a campaign's settings and re-slot its unclaimed jobs from now.
    ///
    /// Invalid settings are rejected before anything is written.
    pub async fn reconfigure(
        &self,
        campaign_id: CampaignId,
        request: ReconfigureRequest,
    ) -> QueueResult<ReconfigureOutcome> {
        self.store.campaign(campaign_id).await?;
        let settings = CampaignSettings::try_from(request).inspect_err(|e| {
            warn!(campaign_id = %campaign_id, error = %e, "Rejected campaign settings");
        })?;
        self.store.put_settings(campaign_id, settings.clone()).await?;

        let now = self.clock.now();
        let jobs = self.store.campaign_jobs(Some(campaign_id)).await?;
        let occupancy: Occupancy = jobs
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Processing | JobStatus::Sent))
            .filter_map(|j| j.send_at)
            .collect();

        let mut snapshot: Vec<_> = jobs.into_iter().filter(|j| j.status.is_reslottable()).collect();
        snapshot.sort_by_key(EmailJob::queue_key);

        let assignments = self.assign(&settings, snapshot, occupancy, now).await?;
        let reassigned_count = self.store.reslot(&assignments).await?;

        self.store
            .append_event(JobEvent::for_campaign(
                campaign_id,
                EventKind::ScheduleUpdated,
                now,
                json!({ "reassignedCount": reassigned_count }),
            ))
            .await?;
        info!(campaign_id = %campaign_id, reassigned = reassigned_count, "Campaign settings updated");

        Ok(ReconfigureOutcome { reassigned_count })
    }

    /// Validate and store a new schedule.
    pub async fn create_schedule(&self, schedule: Schedule) -> QueueResult<Schedule> {
        self.store.template(schedule.template_id).await?;
        if let Some(campaign_id) = schedule.campaign_id {
            self.store.campaign(campaign_id).await?;
        }
        if let Some(throttle) = schedule.throttle_override
            && !(1..=MAX_LIMIT).contains(&throttle)
        {
            return Err(QueueError::InvalidSchedule(format!(
                "throttle override must be between 1 and {MAX_LIMIT}, got {throttle}"
            )));
        }
        if schedule.repeat_interval_mins == Some(0) {
            return Err(QueueError::InvalidSchedule(
                "repeat interval must be at least one minute".to_string(),
            ));
        }
        if let Timing::Smart { window } = schedule.timing
            && window.start() >= window.end()
        {
            return Err(QueueError::Configuration(cadence_slots::SlotError::InvalidSmartWindow {
                start: window.start().to_rfc3339(),
                end: window.end().to_rfc3339(),
            }));
        }

        let clash = self.store.schedules().await?.into_iter().any(|s| {
            s.campaign_id.is_some()
                && s.campaign_id == schedule.campaign_id
                && s.step_order == schedule.step_order
                && s.template_id == schedule.template_id
        });
        if clash {
            return Err(QueueError::InvalidSchedule(format!(
                "step {} already uses template {}",
                schedule.step_order, schedule.template_id
            )));
        }

        self.store.insert_schedule(schedule.clone()).await?;
        debug!(schedule_id = %schedule.id, step = schedule.step_order, "Schedule created");
        Ok(schedule)
    }

    /// Draft or paused -> scheduled; due at the next materialization pass.
    pub async fn activate_schedule(&self, id: ScheduleId) -> QueueResult<bool> {
        let activated = self
            .store
            .transition_schedule(
                id,
                &[ScheduleStatus::Draft, ScheduleStatus::Paused],
                ScheduleStatus::Scheduled,
            )
            .await?;
        if activated {
            let mut schedule = self.store.schedule(id).await?;
            if schedule.next_run_at.is_none() {
                schedule.next_run_at = Some(self.clock.now());
                self.store.update_schedule(schedule).await?;
            }
            info!(schedule_id = %id, "Schedule activated");
        }
        Ok(activated)
    }

    pub async fn pause_schedule(&self, id: ScheduleId) -> QueueResult<bool> {
        self.store
            .transition_schedule(id, &[ScheduleStatus::Scheduled], ScheduleStatus::Paused)
            .await
    }

    pub async fn cancel_schedule(&self, id: ScheduleId) -> QueueResult<bool> {
        self.store
            .transition_schedule(
                id,
                &[ScheduleStatus::Draft, ScheduleStatus::Scheduled, ScheduleStatus::Paused],
                ScheduleStatus::Cancelled,
            )
            .await
    }

    /// Run every schedule whose next run has come.
    ///
    /// A failing schedule is logged and counted; the pass continues.
    pub async fn materialize_due(&self) -> QueueResult<MaterializeReport> {
        let now = self.clock.now();
        let mut report = MaterializeReport::default();

        for schedule in self.store.schedules().await? {
            if !schedule.is_due(now) {
                continue;
            }
            match self.run_schedule(schedule.id, RunMode::Live).await {
                Ok(RunOutcome::Deferred { .. }) => report.deferred += 1,
                Ok(RunOutcome::Materialized(m)) => {
                    report.schedules_run += 1;
                    report.created += m.created;
                    report.duplicates += m.duplicates;
                    report.skipped += m.skipped;
                }
                Ok(RunOutcome::Preview { .. }) => {}
                Err(e) => {
                    warn!(schedule_id = %schedule.id, error = %e, "Schedule materialization failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Create and slot jobs for one schedule's audience.
    pub async fn run_schedule(&self, id: ScheduleId, mode: RunMode) -> QueueResult<RunOutcome> {
        let now = self.clock.now();
        let mut schedule = self.store.schedule(id).await?;

        if mode == RunMode::Live && schedule.status != ScheduleStatus::Scheduled {
            return Err(QueueError::InvalidSchedule(format!(
                "schedule {id} is {:?}, not scheduled",
                schedule.status
            )));
        }

        if let Some(until) = schedule.deferred_until(now) {
            if mode == RunMode::Live && schedule.next_run_at != Some(until) {
                schedule.next_run_at = Some(until);
                self.store.update_schedule(schedule).await?;
            }
            debug!(schedule_id = %id, until = %until, "Schedule deferred");
            return Ok(RunOutcome::Deferred { until });
        }

        let contacts = self
            .audience
            .resolve(&schedule.group_id)
            .await
            .map_err(|e| QueueError::Audience(e.to_string()))?;
        let audience = contacts.len();

        let mut recipients: Vec<Recipient> =
            contacts.into_iter().filter_map(|c| c.into_recipient()).collect();
        let mut outcome = Materialized {
            skipped: audience - recipients.len(),
            ..Materialized::default()
        };

        if let Some(filter) = &self.filter {
            let before = recipients.len();
            recipients.retain(|r| filter.admits(&schedule, r));
            outcome.filtered = before - recipients.len();
        }

        if mode == RunMode::Preview {
            return Ok(RunOutcome::Preview {
                audience,
                sendable: recipients.len(),
            });
        }

        let mut created = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            match self.store.insert_job(EmailJob::new(&schedule, recipient, now)).await {
                Ok(job) => created.push(job),
                Err(QueueError::DuplicateJob { .. }) => outcome.duplicates += 1,
                Err(e) => return Err(e),
            }
        }
        outcome.created = created.len();

        let settings = self.settings_for(schedule.campaign_id).await?;
        let occupancy = self.store.occupancy(schedule.campaign_id, now).await?;
        let assignments = self.assign(&settings, created, occupancy, now).await?;
        self.store.reslot(&assignments).await?;

        self.finish_run(id, now).await?;
        info!(
            schedule_id = %id,
            created = outcome.created,
            duplicates = outcome.duplicates,
            skipped = outcome.skipped,
            "Schedule materialized"
        );

        Ok(RunOutcome::Materialized(outcome))
    }

    /// Give every pending job (new or awaiting retry) a fresh slot.
    ///
    /// Campaigns are handled independently; a failing campaign is logged and skipped.
    pub async fn slot_pending(&self) -> QueueResult<usize> {
        let now = self.clock.now();
        let mut by_campaign: HashMap<Option<CampaignId>, Vec<EmailJob>> = HashMap::new();
        for job in self.store.jobs_with_status(JobStatus::Pending).await? {
            by_campaign.entry(job.campaign_id).or_default().push(job);
        }

        let mut slotted = 0;
        for (campaign_id, mut jobs) in by_campaign {
            jobs.sort_by_key(EmailJob::queue_key);
            match self.slot_campaign_jobs(campaign_id, jobs, now).await {
                Ok(count) => slotted += count,
                Err(e) => {
                    warn!(campaign_id = ?campaign_id, error = %e, "Slotting pending jobs failed");
                }
            }
        }

        if slotted > 0 {
            debug!(slotted, "Pending jobs slotted");
        }
        Ok(slotted)
    }

    async fn slot_campaign_jobs(
        &self,
        campaign_id: Option<CampaignId>,
        jobs: Vec<EmailJob>,
        now: DateTime<Utc>,
    ) -> QueueResult<usize> {
        let settings = self.settings_for(campaign_id).await?;
        let occupancy = self.store.occupancy(campaign_id, now).await?;
        let assignments = self.assign(&settings, jobs, occupancy, now).await?;
        self.store.reslot(&assignments).await
    }

    async fn settings_for(&self, campaign_id: Option<CampaignId>) -> QueueResult<CampaignSettings> {
        match campaign_id {
            Some(id) => self.store.settings(id).await,
            None => Ok(CampaignSettings::default()),
        }
    }

    async fn finish_run(&self, id: ScheduleId, now: DateTime<Utc>) -> QueueResult<()> {
        let mut schedule = self.store.schedule(id).await?;
        schedule.last_run_at = Some(now);
        let repeat = schedule.repeat_interval();
        schedule.next_run_at = repeat.map(|every| now + every);
        self.store.update_schedule(schedule).await?;

        if repeat.is_none() {
            self.store
                .transition_schedule(id, &[ScheduleStatus::Scheduled], ScheduleStatus::Completed)
                .await?;
        }
        Ok(())
    }

    /// Slot `jobs` in queue order, sharing one occupancy map across schedules.
    ///
    /// Each schedule keeps its own slot source (throttle override, time zone, smart
    /// window), but jobs are pulled strictly in the order given. A fixed-time job
    /// never lands before a fixed-time job queued ahead of it.
    async fn assign(
        &self,
        settings: &CampaignSettings,
        jobs: Vec<EmailJob>,
        mut occupancy: Occupancy,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<(JobId, DateTime<Utc>)>> {
        let mut sources: HashMap<ScheduleId, SlotSource> = HashMap::new();
        let mut assignments = Vec::with_capacity(jobs.len());
        let mut floor: Option<DateTime<Utc>> = None;

        for job in jobs {
            if !sources.contains_key(&job.schedule_id) {
                let schedule = self.store.schedule(job.schedule_id).await?;
                let source = SlotSource::new(settings, &schedule, occupancy.clone(), now)?;
                sources.insert(job.schedule_id, source);
            }
            let Some(source) = sources.get_mut(&job.schedule_id) else {
                continue;
            };
            let Some(at) = source.next_slot(floor) else {
                warn!(job_id = %job.id, "No slot left for job");
                continue;
            };
            if source.is_fixed() {
                floor = Some(floor.map_or(at, |f| f.max(at)));
            }

            occupancy.add(at);
            for (schedule_id, other) in sources.iter_mut() {
                if *schedule_id != job.schedule_id {
                    other.reserve(at);
                }
            }
            assignments.push((job.id, at));
        }
        Ok(assignments)
    }
}

/// Where one schedule's send times come from.
enum SlotSource {
    Fixed(SlotCursor),
    Smart(SmartWindowResolver),
}

impl SlotSource {
    /// Honors the schedule's throttle override, time zone and timing.
    fn new(
        settings: &CampaignSettings,
        schedule: &Schedule,
        occupancy: Occupancy,
        now: DateTime<Utc>,
    ) -> SlotResult<Self> {
        let tz = schedule.time_zone.unwrap_or(settings.time_zone);
        let plan = SendingPlan::new(&settings.windows, &settings.quiet_hours, tz)?;
        let throttle = schedule
            .throttle_override
            .unwrap_or(settings.throttle_per_minute);

        Ok(match schedule.timing {
            Timing::Smart { window } => {
                SlotSource::Smart(window.resolver(&plan, throttle, occupancy, now))
            }
            Timing::Immediate | Timing::At { .. } => {
                SlotSource::Fixed(plan.cursor_with_occupancy(now, throttle, occupancy))
            }
        })
    }

    fn is_fixed(&self) -> bool {
        matches!(self, SlotSource::Fixed(_))
    }

    /// Next send time; fixed cursors start no earlier than `floor`.
    fn next_slot(&mut self, floor: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self {
            SlotSource::Fixed(cursor) => {
                if let Some(floor) = floor {
                    cursor.skip_to(floor);
                }
                cursor.next()
            }
            SlotSource::Smart(resolver) => resolver.next_resolution().map(|r| r.send_at()),
        }
    }

    fn reserve(&mut self, at: DateTime<Utc>) {
        match self {
            SlotSource::Fixed(cursor) => cursor.reserve(at),
            SlotSource::Smart(resolver) => resolver.reserve(at),
        }
    }
}
