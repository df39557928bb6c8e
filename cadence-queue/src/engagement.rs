//! Engagement sink for opens, visits and RSVPs.

use crate::error::QueueResult;
use crate::model::{EmailJob, EngagementKind, EventKind, JobEvent, JobId};
use crate::store::CampaignStore;
use cadence_log::debug;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// An inbound beacon or webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementEvent {
    pub invite_token: String,
    pub event_type: EngagementKind,
    pub at: DateTime<Utc>,
}

/// Result of recording an engagement event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementOutcome {
    Recorded(JobId),
    /// The job already carried this event type
    Duplicate(JobId),
    /// No job holds the token
    Unknown,
}

/// Stamps engagement timestamps on the job a token belongs to.
pub struct EngagementTracker {
    store: Arc<dyn CampaignStore>,
}

impl EngagementTracker {
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, event: &EngagementEvent) -> QueueResult<EngagementOutcome> {
        let jobs = self.store.jobs_for_token(&event.invite_token).await?;
        let Some(job) = attribute(&jobs) else {
            debug!(token = %event.invite_token, "Engagement for unknown token ignored");
            return Ok(EngagementOutcome::Unknown);
        };

        let stamped = self
            .store
            .stamp_engagement(job.id, event.event_type, event.at)
            .await?;
        if event.event_type == EngagementKind::Rsvp {
            self.store
                .stamp_engagement(job.id, EngagementKind::Visit, event.at)
                .await?;
        }

        if !stamped {
            return Ok(EngagementOutcome::Duplicate(job.id));
        }

        self.store
            .append_event(JobEvent::for_job(
                job,
                EventKind::Engagement,
                event.at,
                json!({ "type": event.event_type }),
            ))
            .await?;
        debug!(job_id = %job.id, kind = ?event.event_type, "Engagement recorded");
        Ok(EngagementOutcome::Recorded(job.id))
    }
}

/// Most recently sent job, else most recently created.
fn attribute(jobs: &[EmailJob]) -> Option<&EmailJob> {
    jobs.iter()
        .filter(|j| j.sent_at.is_some())
        .max_by_key(|j| (j.sent_at, j.seq))
        .or_else(|| jobs.iter().max_by_key(|j| j.seq))
}
