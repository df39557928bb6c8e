//! Campaign, schedule, template and job records.

use cadence_slots::SmartWindow;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Campaign identifier.
pub type CampaignId = Uuid;

/// Schedule (step) identifier.
pub type ScheduleId = Uuid;

/// Template identifier.
pub type TemplateId = Uuid;

/// Job identifier.
pub type JobId = Uuid;

/// Campaign lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    /// Whether jobs of a campaign in this status may be dispatched.
    pub fn allows_dispatch(&self) -> bool {
        !matches!(self, CampaignStatus::Paused | CampaignStatus::Cancelled)
    }
}

/// A named campaign owning an ordered list of schedules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: CampaignStatus::Draft,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: CampaignStatus) -> Self {
        self.status = status;
        self
    }
}

/// Email content used by a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

impl Template {
    pub fn new(name: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            subject: subject.into(),
            html: html.into(),
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Experiment arm named by the template: `A`, `B`, `C` or `Original`.
    ///
    /// ```
    /// use cadence_queue::Template;
    ///
    /// assert_eq!(Template::new("Spring invite - Variant B", "s", "h").variant_label(), "B");
    /// assert_eq!(Template::new("Spring invite", "s", "h").variant_label(), "Original");
    /// ```
    pub fn variant_label(&self) -> String {
        let lower = self.name.to_ascii_lowercase();
        let Some(pos) = lower.rfind("variant") else {
            return "Original".to_string();
        };
        let rest = self.name[pos + "variant".len()..].trim_start();
        match rest.chars().next() {
            Some(c @ ('A' | 'B' | 'C' | 'a' | 'b' | 'c'))
                if rest.chars().nth(1).is_none_or(|n| !n.is_alphanumeric()) =>
            {
                c.to_ascii_uppercase().to_string()
            }
            _ => "Original".to_string(),
        }
    }
}

/// Schedule lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    /// Not yet activated, or suppressed by an experiment
    #[default]
    Draft,
    Scheduled,
    Paused,
    Completed,
    Cancelled,
}

impl ScheduleStatus {
    /// Whether jobs of a schedule in this status may be dispatched.
    pub fn allows_dispatch(&self) -> bool {
        matches!(self, ScheduleStatus::Scheduled | ScheduleStatus::Completed)
    }
}

/// When a schedule's jobs should go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Timing {
    /// Next admissible slot after materialization
    #[default]
    Immediate,
    /// Not before a fixed instant
    At { send_at: DateTime<Utc> },
    /// Adaptively inside an absolute range
    Smart { window: SmartWindow },
}

/// Typed experiment bookkeeping on a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentAssignment {
    pub group_key: String,
    pub variant: String,
    pub split_percent: f64,
    /// Lower edge of this variant's share of the 0-100 recipient bucket range
    #[serde(default)]
    pub bucket_floor: f64,
    pub updated_at: DateTime<Utc>,
}

impl ExperimentAssignment {
    /// Whether a 0-99 recipient bucket falls in this variant's share.
    pub fn covers_bucket(&self, bucket: u8) -> bool {
        let bucket = f64::from(bucket);
        bucket >= self.bucket_floor && bucket < self.bucket_floor + self.split_percent
    }
}

/// One step of a campaign, sent to an audience group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: ScheduleId,
    pub campaign_id: Option<CampaignId>,
    pub template_id: TemplateId,
    pub group_id: String,
    pub step_order: u32,
    pub timing: Timing,
    pub throttle_override: Option<u32>,
    pub repeat_interval_mins: Option<u32>,
    pub time_zone: Option<Tz>,
    pub status: ScheduleStatus,
    pub assignment: Option<ExperimentAssignment>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn new(template_id: TemplateId, group_id: impl Into<String>, step_order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id: None,
            template_id,
            group_id: group_id.into(),
            step_order,
            timing: Timing::Immediate,
            throttle_override: None,
            repeat_interval_mins: None,
            time_zone: None,
            status: ScheduleStatus::Draft,
            assignment: None,
            next_run_at: None,
            last_run_at: None,
        }
    }

    pub fn in_campaign(mut self, campaign_id: CampaignId) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    pub fn send_at(mut self, send_at: DateTime<Utc>) -> Self {
        self.timing = Timing::At { send_at };
        self
    }

    pub fn smart_window(mut self, window: SmartWindow) -> Self {
        self.timing = Timing::Smart { window };
        self
    }

    pub fn with_throttle(mut self, per_minute: u32) -> Self {
        self.throttle_override = Some(per_minute);
        self
    }

    pub fn repeat_every(mut self, minutes: u32) -> Self {
        self.repeat_interval_mins = Some(minutes);
        self
    }

    pub fn with_time_zone(mut self, tz: Tz) -> Self {
        self.time_zone = Some(tz);
        self
    }

    pub fn with_status(mut self, status: ScheduleStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether materialization should run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Scheduled && self.next_run_at.is_none_or(|at| at <= now)
    }

    /// The instant materialization must wait for, if it lies after `now`.
    pub fn deferred_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = match self.timing {
            Timing::Immediate => return None,
            Timing::At { send_at } => send_at,
            Timing::Smart { window } => window.start(),
        };
        (start > now).then_some(start)
    }

    pub fn repeat_interval(&self) -> Option<Duration> {
        self.repeat_interval_mins
            .filter(|mins| *mins > 0)
            .map(|mins| Duration::minutes(mins as i64))
    }
}

/// Audience entry before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub recipient_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub invite_token: Option<String>,
}

impl Contact {
    pub fn new(recipient_id: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            name: None,
            email: None,
            invite_token: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.invite_token = Some(token.into());
        self
    }

    /// A sendable recipient, if the contact has both an email and a token.
    pub fn into_recipient(self) -> Option<Recipient> {
        let email = self.email.filter(|e| !e.trim().is_empty())?;
        let invite_token = self.invite_token.filter(|t| !t.trim().is_empty())?;
        Some(Recipient {
            recipient_id: self.recipient_id,
            name: self.name,
            email,
            invite_token,
        })
    }
}

/// Who a job is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub recipient_id: String,
    pub name: Option<String>,
    pub email: String,
    pub invite_token: String,
}

/// Job state machine: pending -> scheduled -> processing -> sent | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a slot
    Pending,
    /// Slotted, waiting for its send time
    Scheduled,
    /// Claimed by a dispatcher
    Processing,
    Sent,
    /// Retries exhausted
    Failed,
}

impl JobStatus {
    /// Statuses whose send time may still be rewritten.
    pub fn is_reslottable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Scheduled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed)
    }
}

/// Engagement signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementKind {
    Open,
    Visit,
    Rsvp,
}

/// A per-recipient, per-step email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailJob {
    pub id: JobId,
    /// Creation order, assigned by the store
    pub seq: u64,
    pub schedule_id: ScheduleId,
    pub campaign_id: Option<CampaignId>,
    pub template_id: TemplateId,
    pub recipient: Recipient,
    pub status: JobStatus,
    pub send_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub message_id: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub visited_at: Option<DateTime<Utc>>,
    pub rsvp_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EmailJob {
    /// A pending job for `recipient` in `schedule`.
    pub fn new(schedule: &Schedule, recipient: Recipient, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            schedule_id: schedule.id,
            campaign_id: schedule.campaign_id,
            template_id: schedule.template_id,
            recipient,
            status: JobStatus::Pending,
            send_at: None,
            sent_at: None,
            error: None,
            retry_count: 0,
            message_id: None,
            opened_at: None,
            visited_at: None,
            rsvp_at: None,
            created_at,
        }
    }

    pub fn engagement(&self, kind: EngagementKind) -> Option<DateTime<Utc>> {
        match kind {
            EngagementKind::Open => self.opened_at,
            EngagementKind::Visit => self.visited_at,
            EngagementKind::Rsvp => self.rsvp_at,
        }
    }

    /// Re-slot ordering: send time ascending (unslotted last), then creation order.
    pub fn queue_key(&self) -> (bool, Option<DateTime<Utc>>, u64) {
        (self.send_at.is_none(), self.send_at, self.seq)
    }
}

/// Audit log entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SendAttempt,
    Sent,
    Failed,
    ScheduleUpdated,
    Engagement,
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: Option<JobId>,
    pub campaign_id: Option<CampaignId>,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    pub detail: serde_json::Value,
}

impl JobEvent {
    pub fn for_job(job: &EmailJob, kind: EventKind, at: DateTime<Utc>, detail: serde_json::Value) -> Self {
        Self {
            job_id: Some(job.id),
            campaign_id: job.campaign_id,
            kind,
            at,
            detail,
        }
    }

    pub fn for_campaign(
        campaign_id: CampaignId,
        kind: EventKind,
        at: DateTime<Utc>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            job_id: None,
            campaign_id: Some(campaign_id),
            kind,
            at,
            detail,
        }
    }
}
