//! Campaign store trait and in-memory backend.

use crate::error::{QueueError, QueueResult};
use crate::model::{
    Campaign, CampaignId, CampaignStatus, EmailJob, EngagementKind, ExperimentAssignment, JobEvent,
    JobId, JobStatus, Schedule, ScheduleId, ScheduleStatus, Template, TemplateId,
};
use async_trait::async_trait;
use cadence_slots::{CampaignSettings, Occupancy};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Selection of jobs ready to dispatch.
#[derive(Debug, Clone)]
pub struct DueQuery {
    pub now: DateTime<Utc>,
    pub limit: usize,
    pub campaign_id: Option<CampaignId>,
}

impl DueQuery {
    pub fn new(now: DateTime<Utc>, limit: usize) -> Self {
        Self {
            now,
            limit,
            campaign_id: None,
        }
    }

    pub fn for_campaign(mut self, campaign_id: CampaignId) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }
}

/// Durable campaign state.
///
/// Every status transition is a compare-and-swap: methods returning `bool`
/// report whether this caller won the transition.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: Campaign) -> QueueResult<()>;
    async fn campaign(&self, id: CampaignId) -> QueueResult<Campaign>;
    async fn campaigns(&self) -> QueueResult<Vec<Campaign>>;
    async fn set_campaign_status(&self, id: CampaignId, status: CampaignStatus) -> QueueResult<()>;

    /// Stored settings, or the defaults when none were saved.
    async fn settings(&self, campaign_id: CampaignId) -> QueueResult<CampaignSettings>;
    async fn put_settings(&self, campaign_id: CampaignId, settings: CampaignSettings) -> QueueResult<()>;

    async fn insert_template(&self, template: Template) -> QueueResult<()>;
    async fn template(&self, id: TemplateId) -> QueueResult<Template>;

    async fn insert_schedule(&self, schedule: Schedule) -> QueueResult<()>;
    async fn schedule(&self, id: ScheduleId) -> QueueResult<Schedule>;
    async fn schedules(&self) -> QueueResult<Vec<Schedule>>;
    /// Overwrite a stored schedule.
    async fn update_schedule(&self, schedule: Schedule) -> QueueResult<()>;
    /// Move a schedule to `to` if its status is one of `from`.
    async fn transition_schedule(
        &self,
        id: ScheduleId,
        from: &[ScheduleStatus],
        to: ScheduleStatus,
    ) -> QueueResult<bool>;
    /// Replace only the experiment assignment of a schedule.
    async fn set_assignment(
        &self,
        id: ScheduleId,
        assignment: Option<ExperimentAssignment>,
    ) -> QueueResult<()>;

    /// Store a new job, assigning its creation sequence.
    async fn insert_job(&self, job: EmailJob) -> QueueResult<EmailJob>;
    async fn job(&self, id: JobId) -> QueueResult<EmailJob>;
    /// Jobs of one campaign, or of schedules outside any campaign when `None`.
    async fn campaign_jobs(&self, campaign_id: Option<CampaignId>) -> QueueResult<Vec<EmailJob>>;
    async fn schedule_jobs(&self, schedule_id: ScheduleId) -> QueueResult<Vec<EmailJob>>;
    async fn jobs_with_status(&self, status: JobStatus) -> QueueResult<Vec<EmailJob>>;

    /// Scheduled jobs due at `query.now`, oldest send time first, skipping jobs
    /// of inactive schedules or campaigns.
    async fn due_jobs(&self, query: &DueQuery) -> QueueResult<Vec<EmailJob>>;
    /// scheduled -> processing, re-checking that the schedule and campaign still allow sending.
    async fn claim(&self, id: JobId) -> QueueResult<bool>;
    /// processing -> sent.
    async fn mark_sent(&self, id: JobId, at: DateTime<Utc>, message_id: Option<String>) -> QueueResult<bool>;
    /// processing -> pending, or failed once `max_attempts` is reached.
    ///
    /// Returns the new status, or `None` when the job was not processing.
    async fn record_failure(&self, id: JobId, error: &str, max_attempts: u32) -> QueueResult<Option<JobStatus>>;
    /// Rewrite send times of jobs still pending or scheduled; others are left alone.
    ///
    /// Returns how many jobs were updated.
    async fn reslot(&self, assignments: &[(JobId, DateTime<Utc>)]) -> QueueResult<usize>;
    /// Per-minute count of slotted jobs at or after `from`.
    async fn occupancy(&self, campaign_id: Option<CampaignId>, from: DateTime<Utc>) -> QueueResult<Occupancy>;

    async fn jobs_for_token(&self, invite_token: &str) -> QueueResult<Vec<EmailJob>>;
    /// Set an engagement timestamp if it is still empty.
    async fn stamp_engagement(&self, id: JobId, kind: EngagementKind, at: DateTime<Utc>) -> QueueResult<bool>;

    async fn append_event(&self, event: JobEvent) -> QueueResult<()>;
    async fn events(&self) -> QueueResult<Vec<JobEvent>>;
}

#[derive(Default)]
struct State {
    campaigns: HashMap<CampaignId, Campaign>,
    settings: HashMap<CampaignId, CampaignSettings>,
    templates: HashMap<TemplateId, Template>,
    schedules: HashMap<ScheduleId, Schedule>,
    jobs: HashMap<JobId, EmailJob>,
    /// (schedule, recipient) pairs that already hold a job
    recipients: HashSet<(ScheduleId, String)>,
    next_seq: u64,
    events: Vec<JobEvent>,
}

impl State {
    fn dispatch_allowed(&self, job: &EmailJob) -> bool {
        let schedule_ok = self
            .schedules
            .get(&job.schedule_id)
            .is_some_and(|s| s.status.allows_dispatch());
        let campaign_ok = job
            .campaign_id
            .is_none_or(|id| self.campaigns.get(&id).is_none_or(|c| c.status.allows_dispatch()));
        schedule_ok && campaign_ok
    }

    fn job_mut(&mut self, id: JobId) -> QueueResult<&mut EmailJob> {
        self.jobs.get_mut(&id).ok_or(QueueError::JobNotFound(id))
    }
}

/// In-process store guarded by a single lock, so each method is atomic.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignStore for InMemoryStore {
    async fn insert_campaign(&self, campaign: Campaign) -> QueueResult<()> {
        self.state.write().await.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn campaign(&self, id: CampaignId) -> QueueResult<Campaign> {
        self.state
            .read()
            .await
            .campaigns
            .get(&id)
            .cloned()
            .ok_or(QueueError::CampaignNotFound(id))
    }

    async fn campaigns(&self) -> QueueResult<Vec<Campaign>> {
        let mut campaigns: Vec<_> = self.state.read().await.campaigns.values().cloned().collect();
        campaigns.sort_by_key(|c| c.created_at);
        Ok(campaigns)
    }

    async fn set_campaign_status(&self, id: CampaignId, status: CampaignStatus) -> QueueResult<()> {
        let mut state = self.state.write().await;
        let campaign = state
            .campaigns
            .get_mut(&id)
            .ok_or(QueueError::CampaignNotFound(id))?;
        campaign.status = status;
        Ok(())
    }

    async fn settings(&self, campaign_id: CampaignId) -> QueueResult<CampaignSettings> {
        let state = self.state.read().await;
        if !state.campaigns.contains_key(&campaign_id) {
            return Err(QueueError::CampaignNotFound(campaign_id));
        }
        Ok(state.settings.get(&campaign_id).cloned().unwrap_or_default())
    }

    async fn put_settings(&self, campaign_id: CampaignId, settings: CampaignSettings) -> QueueResult<()> {
        let mut state = self.state.write().await;
        if !state.campaigns.contains_key(&campaign_id) {
            return Err(QueueError::CampaignNotFound(campaign_id));
        }
        state.settings.insert(campaign_id, settings);
        Ok(())
    }

    async fn insert_template(&self, template: Template) -> QueueResult<()> {
        self.state.write().await.templates.insert(template.id, template);
        Ok(())
    }

    async fn template(&self, id: TemplateId) -> QueueResult<Template> {
        self.state
            .read()
            .await
            .templates
            .get(&id)
            .cloned()
            .ok_or(QueueError::TemplateNotFound(id))
    }

    async fn insert_schedule(&self, schedule: Schedule) -> QueueResult<()> {
        self.state.write().await.schedules.insert(schedule.id, schedule);
        Ok(())
    }

    async fn schedule(&self, id: ScheduleId) -> QueueResult<Schedule> {
        self.state
            .read()
            .await
            .schedules
            .get(&id)
            .cloned()
            .ok_or(QueueError::ScheduleNotFound(id))
    }

    async fn schedules(&self) -> QueueResult<Vec<Schedule>> {
        let mut schedules: Vec<_> = self.state.read().await.schedules.values().cloned().collect();
        schedules.sort_by_key(|s| (s.campaign_id, s.step_order, s.id));
        Ok(schedules)
    }

    async fn update_schedule(&self, schedule: Schedule) -> QueueResult<()> {
        let mut state = self.state.write().await;
        match state.schedules.get_mut(&schedule.id) {
            Some(stored) => {
                *stored = schedule;
                Ok(())
            }
            None => Err(QueueError::ScheduleNotFound(schedule.id)),
        }
    }

    async fn transition_schedule(
        &self,
        id: ScheduleId,
        from: &[ScheduleStatus],
        to: ScheduleStatus,
    ) -> QueueResult<bool> {
        let mut state = self.state.write().await;
        let schedule = state
            .schedules
            .get_mut(&id)
            .ok_or(QueueError::ScheduleNotFound(id))?;
        if !from.contains(&schedule.status) {
            return Ok(false);
        }
        schedule.status = to;
        Ok(true)
    }

    async fn set_assignment(
        &self,
        id: ScheduleId,
        assignment: Option<ExperimentAssignment>,
    ) -> QueueResult<()> {
        let mut state = self.state.write().await;
        let schedule = state
            .schedules
            .get_mut(&id)
            .ok_or(QueueError::ScheduleNotFound(id))?;
        schedule.assignment = assignment;
        Ok(())
    }

    async fn insert_job(&self, mut job: EmailJob) -> QueueResult<EmailJob> {
        let mut state = self.state.write().await;
        let key = (job.schedule_id, job.recipient.recipient_id.clone());
        if state.recipients.contains(&key) {
            return Err(QueueError::DuplicateJob {
                schedule_id: job.schedule_id,
                recipient_id: key.1,
            });
        }

        state.next_seq += 1;
        job.seq = state.next_seq;
        state.recipients.insert(key);
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn job(&self, id: JobId) -> QueueResult<EmailJob> {
        self.state
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(QueueError::JobNotFound(id))
    }

    async fn campaign_jobs(&self, campaign_id: Option<CampaignId>) -> QueueResult<Vec<EmailJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.campaign_id == campaign_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.seq);
        Ok(jobs)
    }

    async fn schedule_jobs(&self, schedule_id: ScheduleId) -> QueueResult<Vec<EmailJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.schedule_id == schedule_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.seq);
        Ok(jobs)
    }

    async fn jobs_with_status(&self, status: JobStatus) -> QueueResult<Vec<EmailJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.seq);
        Ok(jobs)
    }

    async fn due_jobs(&self, query: &DueQuery) -> QueueResult<Vec<EmailJob>> {
        let state = self.state.read().await;
        let mut due: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Scheduled)
            .filter(|j| j.send_at.is_some_and(|at| at <= query.now))
            .filter(|j| query.campaign_id.is_none_or(|id| j.campaign_id == Some(id)))
            .filter(|j| state.dispatch_allowed(j))
            .cloned()
            .collect();
        due.sort_by_key(|j| (j.send_at, j.seq));
        due.truncate(query.limit);
        Ok(due)
    }

    async fn claim(&self, id: JobId) -> QueueResult<bool> {
        let mut state = self.state.write().await;
        let allowed = match state.jobs.get(&id) {
            Some(job) => job.status == JobStatus::Scheduled && state.dispatch_allowed(job),
            None => return Err(QueueError::JobNotFound(id)),
        };
        if allowed {
            state.job_mut(id)?.status = JobStatus::Processing;
        }
        Ok(allowed)
    }

    async fn mark_sent(&self, id: JobId, at: DateTime<Utc>, message_id: Option<String>) -> QueueResult<bool> {
        let mut state = self.state.write().await;
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Processing {
            return Ok(false);
        }
        job.status = JobStatus::Sent;
        job.sent_at = Some(at);
        job.message_id = message_id;
        job.error = None;
        Ok(true)
    }

    async fn record_failure(&self, id: JobId, error: &str, max_attempts: u32) -> QueueResult<Option<JobStatus>> {
        let mut state = self.state.write().await;
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Processing {
            return Ok(None);
        }
        job.retry_count += 1;
        job.error = Some(error.to_string());
        job.status = if job.retry_count >= max_attempts {
            JobStatus::Failed
        } else {
            JobStatus::Pending
        };
        Ok(Some(job.status))
    }

    async fn reslot(&self, assignments: &[(JobId, DateTime<Utc>)]) -> QueueResult<usize> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for (id, send_at) in assignments {
            if let Some(job) = state.jobs.get_mut(id)
                && job.status.is_reslottable()
            {
                job.send_at = Some(*send_at);
                job.status = JobStatus::Scheduled;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn occupancy(&self, campaign_id: Option<CampaignId>, from: DateTime<Utc>) -> QueueResult<Occupancy> {
        let state = self.state.read().await;
        // Minute granularity: a job earlier in the same minute still holds capacity.
        let floor = from - chrono::Duration::seconds(from.timestamp().rem_euclid(60))
            - chrono::Duration::nanoseconds(from.timestamp_subsec_nanos() as i64);
        Ok(state
            .jobs
            .values()
            .filter(|j| j.campaign_id == campaign_id)
            .filter(|j| {
                matches!(
                    j.status,
                    JobStatus::Scheduled | JobStatus::Processing | JobStatus::Sent
                )
            })
            .filter_map(|j| j.send_at)
            .filter(|at| *at >= floor)
            .collect())
    }

    async fn jobs_for_token(&self, invite_token: &str) -> QueueResult<Vec<EmailJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.recipient.invite_token == invite_token)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.seq);
        Ok(jobs)
    }

    async fn stamp_engagement(&self, id: JobId, kind: EngagementKind, at: DateTime<Utc>) -> QueueResult<bool> {
        let mut state = self.state.write().await;
        let job = state.job_mut(id)?;
        let slot = match kind {
            EngagementKind::Open => &mut job.opened_at,
            EngagementKind::Visit => &mut job.visited_at,
            EngagementKind::Rsvp => &mut job.rsvp_at,
        };
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(at);
        Ok(true)
    }

    async fn append_event(&self, event: JobEvent) -> QueueResult<()> {
        self.state.write().await.events.push(event);
        Ok(())
    }

    async fn events(&self) -> QueueResult<Vec<JobEvent>> {
        Ok(self.state.read().await.events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Contact;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 30, 0).unwrap()
    }

    async fn seeded() -> (InMemoryStore, Schedule) {
        let store = InMemoryStore::new();
        let campaign = Campaign::new("Spring").with_status(CampaignStatus::Active);
        let schedule = Schedule::new(Uuid::new_v4(), "g", 1)
            .in_campaign(campaign.id)
            .with_status(ScheduleStatus::Scheduled);
        store.insert_campaign(campaign).await.unwrap();
        store.insert_schedule(schedule.clone()).await.unwrap();
        (store, schedule)
    }

    fn job(schedule: &Schedule, who: &str) -> EmailJob {
        let recipient = Contact::new(who)
            .with_email(format!("{who}@example.com"))
            .with_token(format!("tok-{who}"))
            .into_recipient()
            .unwrap();
        EmailJob::new(schedule, recipient, now())
    }

    async fn scheduled_job(store: &InMemoryStore, schedule: &Schedule, who: &str, at: DateTime<Utc>) -> EmailJob {
        let job = store.insert_job(job(schedule, who)).await.unwrap();
        assert_eq!(store.reslot(&[(job.id, at)]).await.unwrap(), 1);
        store.job(job.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_job_rejected() {
        let (store, schedule) = seeded().await;
        let first = store.insert_job(job(&schedule, "r1")).await.unwrap();
        assert_eq!(first.seq, 1);

        let err = store.insert_job(job(&schedule, "r1")).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateJob { .. }));

        let second = store.insert_job(job(&schedule, "r2")).await.unwrap();
        assert_eq!(second.seq, 2);
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_swap() {
        let (store, schedule) = seeded().await;
        let job = scheduled_job(&store, &schedule, "r1", now()).await;

        assert!(store.claim(job.id).await.unwrap());
        assert!(!store.claim(job.id).await.unwrap());

        assert!(store.mark_sent(job.id, now(), Some("m1".into())).await.unwrap());
        assert!(!store.mark_sent(job.id, now(), None).await.unwrap());
        assert!(!store.claim(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_due_jobs_skip_inactive_schedules_and_campaigns() {
        let (store, schedule) = seeded().await;
        let job = scheduled_job(&store, &schedule, "r1", now()).await;

        let query = DueQuery::new(now(), 10);
        assert_eq!(store.due_jobs(&query).await.unwrap().len(), 1);

        store
            .transition_schedule(schedule.id, &[ScheduleStatus::Scheduled], ScheduleStatus::Draft)
            .await
            .unwrap();
        assert!(store.due_jobs(&query).await.unwrap().is_empty());
        assert!(!store.claim(job.id).await.unwrap());

        store
            .transition_schedule(schedule.id, &[ScheduleStatus::Draft], ScheduleStatus::Scheduled)
            .await
            .unwrap();
        store
            .set_campaign_status(schedule.campaign_id.unwrap(), CampaignStatus::Paused)
            .await
            .unwrap();
        assert!(store.due_jobs(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_jobs_ordered_and_limited() {
        let (store, schedule) = seeded().await;
        let late = scheduled_job(&store, &schedule, "late", now()).await;
        let early = scheduled_job(&store, &schedule, "early", now() - Duration::minutes(5)).await;
        scheduled_job(&store, &schedule, "future", now() + Duration::minutes(5)).await;

        let due = store.due_jobs(&DueQuery::new(now(), 10)).await.unwrap();
        let ids: Vec<_> = due.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        let due = store.due_jobs(&DueQuery::new(now(), 1)).await.unwrap();
        assert_eq!(due[0].id, early.id);
    }

    #[tokio::test]
    async fn test_failure_retries_then_fails() {
        let (store, schedule) = seeded().await;
        let job = scheduled_job(&store, &schedule, "r1", now()).await;

        for attempt in 1..=3 {
            store.reslot(&[(job.id, now())]).await.unwrap();
            assert!(store.claim(job.id).await.unwrap());
            let status = store.record_failure(job.id, "boom", 3).await.unwrap();
            let expected = if attempt < 3 { JobStatus::Pending } else { JobStatus::Failed };
            assert_eq!(status, Some(expected));
        }

        let failed = store.job(job.id).await.unwrap();
        assert_eq!(failed.retry_count, 3);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(store.reslot(&[(job.id, now())]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reslot_skips_claimed_jobs() {
        let (store, schedule) = seeded().await;
        let claimed = scheduled_job(&store, &schedule, "r1", now()).await;
        let waiting = scheduled_job(&store, &schedule, "r2", now()).await;
        store.claim(claimed.id).await.unwrap();

        let later = now() + Duration::hours(1);
        let updated = store
            .reslot(&[(claimed.id, later), (waiting.id, later)])
            .await
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(store.job(claimed.id).await.unwrap().send_at, Some(now()));
        assert_eq!(store.job(waiting.id).await.unwrap().send_at, Some(later));
    }

    #[tokio::test]
    async fn test_occupancy_counts_current_minute() {
        let (store, schedule) = seeded().await;
        scheduled_job(&store, &schedule, "r1", now()).await;
        scheduled_job(&store, &schedule, "r2", now() + Duration::minutes(1)).await;
        scheduled_job(&store, &schedule, "r3", now() - Duration::minutes(1)).await;

        let occupancy = store
            .occupancy(schedule.campaign_id, now() + Duration::seconds(20))
            .await
            .unwrap();
        assert_eq!(occupancy.count(now()), 1);
        assert_eq!(occupancy.count(now() + Duration::minutes(1)), 1);
        assert_eq!(occupancy.count(now() - Duration::minutes(1)), 0);
    }

    #[tokio::test]
    async fn test_engagement_stamped_once() {
        let (store, schedule) = seeded().await;
        let job = store.insert_job(job(&schedule, "r1")).await.unwrap();

        assert!(store.stamp_engagement(job.id, EngagementKind::Open, now()).await.unwrap());
        assert!(!store
            .stamp_engagement(job.id, EngagementKind::Open, now() + Duration::hours(1))
            .await
            .unwrap());
        assert_eq!(store.job(job.id).await.unwrap().opened_at, Some(now()));
    }

    #[tokio::test]
    async fn test_settings_default_until_saved() {
        let (store, schedule) = seeded().await;
        let campaign_id = schedule.campaign_id.unwrap();
        assert_eq!(store.settings(campaign_id).await.unwrap(), CampaignSettings::default());

        let unknown = Uuid::new_v4();
        assert!(matches!(
            store.settings(unknown).await,
            Err(QueueError::CampaignNotFound(_))
        ));
    }
}
