//! Variant groups and their engagement metrics.

use cadence_queue::{
    CampaignId, CampaignStore, EmailJob, QueueResult, Schedule, ScheduleId, ScheduleStatus,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// `<campaignName>|<stepOrder>`
pub fn group_key(campaign_name: &str, step_order: u32) -> String {
    format!("{campaign_name}|{step_order}")
}

/// Engagement of one variant schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantMetrics {
    pub schedule_id: ScheduleId,
    pub variant: String,
    pub sends: u64,
    pub opens: u64,
    pub visits: u64,
    pub rsvps: u64,
}

impl VariantMetrics {
    pub fn new(schedule_id: ScheduleId, variant: impl Into<String>) -> Self {
        Self {
            schedule_id,
            variant: variant.into(),
            sends: 0,
            opens: 0,
            visits: 0,
            rsvps: 0,
        }
    }

    /// Count one job; only sent jobs contribute.
    pub fn add(&mut self, job: &EmailJob) {
        if job.sent_at.is_none() {
            return;
        }
        self.sends += 1;
        self.opens += u64::from(job.opened_at.is_some());
        self.visits += u64::from(job.visited_at.is_some());
        self.rsvps += u64::from(job.rsvp_at.is_some());
    }

    pub fn open_rate(&self) -> f64 {
        rate(self.opens, self.sends)
    }

    pub fn visit_rate(&self) -> f64 {
        rate(self.visits, self.sends)
    }

    pub fn rsvp_rate(&self) -> f64 {
        rate(self.rsvps, self.sends)
    }
}

fn rate(count: u64, sends: u64) -> f64 {
    if sends == 0 {
        0.0
    } else {
        count as f64 / sends as f64
    }
}

/// Schedules of one campaign sharing a step order.
#[derive(Debug, Clone)]
pub struct VariantGroup {
    pub key: String,
    pub campaign_id: CampaignId,
    pub step_order: u32,
    /// Ordered by variant label, then id
    pub schedules: Vec<Schedule>,
    /// Parallel to `schedules`
    pub metrics: Vec<VariantMetrics>,
    pub first_send_at: Option<DateTime<Utc>>,
}

impl VariantGroup {
    pub fn total_sends(&self) -> u64 {
        self.metrics.iter().map(|m| m.sends).sum()
    }

    /// A split has been written and not reset.
    pub fn is_decided(&self) -> bool {
        self.schedules.iter().any(|s| s.assignment.is_some())
    }

    /// Time since the first send, zero before any send.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        self.first_send_at
            .map(|first| now - first)
            .unwrap_or_else(Duration::zero)
    }

    pub fn is_experiment(&self) -> bool {
        self.schedules.len() > 1
    }
}

/// Read every campaign step as a variant group with its metrics.
///
/// Schedules outside a campaign and cancelled schedules are left out.
pub async fn collect_groups(store: &dyn CampaignStore) -> QueueResult<Vec<VariantGroup>> {
    let names: HashMap<CampaignId, String> = store
        .campaigns()
        .await?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();

    let mut grouped: BTreeMap<(CampaignId, u32), Vec<(String, Schedule)>> = BTreeMap::new();
    for schedule in store.schedules().await? {
        let Some(campaign_id) = schedule.campaign_id else {
            continue;
        };
        if schedule.status == ScheduleStatus::Cancelled {
            continue;
        }
        let variant = store.template(schedule.template_id).await?.variant_label();
        grouped
            .entry((campaign_id, schedule.step_order))
            .or_default()
            .push((variant, schedule));
    }

    let mut groups = Vec::with_capacity(grouped.len());
    for ((campaign_id, step_order), mut members) in grouped {
        members.sort_by(|(va, a), (vb, b)| va.cmp(vb).then(a.id.cmp(&b.id)));

        let mut schedules = Vec::with_capacity(members.len());
        let mut metrics = Vec::with_capacity(members.len());
        let mut first_send_at: Option<DateTime<Utc>> = None;
        for (variant, schedule) in members {
            let mut variant_metrics = VariantMetrics::new(schedule.id, variant);
            for job in store.schedule_jobs(schedule.id).await? {
                variant_metrics.add(&job);
                if let Some(sent) = job.sent_at {
                    first_send_at = Some(first_send_at.map_or(sent, |first| first.min(sent)));
                }
            }
            schedules.push(schedule);
            metrics.push(variant_metrics);
        }

        let name = names.get(&campaign_id).map(String::as_str).unwrap_or_default();
        groups.push(VariantGroup {
            key: group_key(name, step_order),
            campaign_id,
            step_order,
            schedules,
            metrics,
            first_send_at,
        });
    }
    Ok(groups)
}
