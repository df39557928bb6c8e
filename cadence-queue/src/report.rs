//! Campaign reporting and schedule preview.

use crate::error::QueueResult;
use crate::model::{CampaignId, CampaignStatus, EmailJob, JobId, JobStatus, ScheduleId};
use crate::store::CampaignStore;
use cadence_slots::CampaignSettings;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How far ahead the schedule preview looks.
pub const PREVIEW_HORIZON_DAYS: i64 = 7;

/// Job counts per status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub scheduled: usize,
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Scheduled => self.scheduled += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Sent => self.sent += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.scheduled + self.processing + self.sent + self.failed
    }
}

impl<'a> FromIterator<&'a EmailJob> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = &'a EmailJob>>(iter: I) -> Self {
        let mut counts = StatusCounts::default();
        for job in iter {
            counts.add(job.status);
        }
        counts
    }
}

/// A permanently failed job and its last error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub job_id: JobId,
    pub email: String,
    pub retry_count: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignReport {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
    pub totals: StatusCounts,
    pub schedules: BTreeMap<ScheduleId, StatusCounts>,
    pub failures: Vec<JobFailure>,
}

impl CampaignReport {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Settings together with the send load of the coming week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePreview {
    pub settings: CampaignSettings,
    pub upcoming: usize,
    pub next_send_at: Option<DateTime<Utc>>,
}

pub async fn campaign_report(
    store: &dyn CampaignStore,
    campaign_id: CampaignId,
) -> QueueResult<CampaignReport> {
    let campaign = store.campaign(campaign_id).await?;
    let jobs = store.campaign_jobs(Some(campaign_id)).await?;

    let mut schedules: BTreeMap<ScheduleId, StatusCounts> = BTreeMap::new();
    for job in &jobs {
        schedules.entry(job.schedule_id).or_default().add(job.status);
    }

    let failures = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .map(|j| JobFailure {
            job_id: j.id,
            email: j.recipient.email.clone(),
            retry_count: j.retry_count,
            error: j.error.clone().unwrap_or_default(),
        })
        .collect();

    Ok(CampaignReport {
        campaign_id,
        status: campaign.status,
        totals: jobs.iter().collect(),
        schedules,
        failures,
    })
}

pub async fn schedule_preview(
    store: &dyn CampaignStore,
    campaign_id: CampaignId,
    now: DateTime<Utc>,
) -> QueueResult<SchedulePreview> {
    let settings = store.settings(campaign_id).await?;
    let horizon = now + Duration::days(PREVIEW_HORIZON_DAYS);

    let upcoming: Vec<_> = store
        .campaign_jobs(Some(campaign_id))
        .await?
        .into_iter()
        .filter(|j| j.status == JobStatus::Scheduled)
        .filter_map(|j| j.send_at)
        .filter(|at| *at >= now && *at < horizon)
        .collect();

    Ok(SchedulePreview {
        settings,
        upcoming: upcoming.len(),
        next_send_at: upcoming.into_iter().min(),
    })
}
