//! Dispatcher tests against the in-memory store

use async_trait::async_trait;
use cadence_mail::*;
use cadence_queue::{
    Campaign, CampaignId, CampaignStatus, CampaignStore, Contact, DueQuery, EmailJob, EngagementKind,
    EventKind, ExperimentAssignment, InMemoryStore, JobEvent, JobId, JobStatus, Planner, QueueError,
    QueueResult, Schedule, ScheduleId, ScheduleStatus, StaticAudience, Template, TemplateId,
};
use cadence_slots::{CampaignSettings, ManualClock, Occupancy, ReconfigureRequest, WindowSpec};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, h, m, 0).unwrap()
}

struct Harness {
    store: Arc<InMemoryStore>,
    planner: Planner,
    clock: ManualClock,
    campaign: Campaign,
    template: Template,
}

impl Harness {
    async fn new(n: usize) -> Self {
        let contacts = (0..n)
            .map(|i| {
                Contact::new(format!("biz-{i}"))
                    .with_name(format!("Business {i}"))
                    .with_email(format!("owner{i}@example.com"))
                    .with_token(format!("token-{i}"))
            })
            .collect();

        let store = Arc::new(InMemoryStore::new());
        let audience = Arc::new(StaticAudience::new().with_group("leads", contacts).await);
        let clock = ManualClock::new(at(9, 0));
        let planner = Planner::new(store.clone(), audience, Arc::new(clock.clone()));

        let campaign = Campaign::new("Spring").with_status(CampaignStatus::Active);
        let template = Template::new(
            "Invite",
            "Hello {{business_name}}",
            r#"<a href="{{invite_link}}">RSVP</a>"#,
        );
        store.insert_campaign(campaign.clone()).await.unwrap();
        store.insert_template(template.clone()).await.unwrap();

        Self {
            store,
            planner,
            clock,
            campaign,
            template,
        }
    }

    /// Materialize one active step and move the clock into its first slot.
    async fn materialize(&self, schedule: Schedule) -> Schedule {
        let schedule = self
            .planner
            .create_schedule(schedule.in_campaign(self.campaign.id))
            .await
            .unwrap();
        self.planner.activate_schedule(schedule.id).await.unwrap();
        self.planner.materialize_due().await.unwrap();
        self.clock.set(at(9, 31));
        schedule
    }

    fn dispatcher(&self, transport: Arc<dyn Transport>) -> Dispatcher {
        Dispatcher::new(
            self.store.clone(),
            transport,
            Arc::new(TemplateRenderer::new("https://events.example.com/rsvp")),
            Arc::new(self.clock.clone()),
        )
    }
}

/// Rejects every recipient as undeliverable.
struct BouncingTransport;

#[async_trait]
impl Transport for BouncingTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt> {
        Err(MailError::InvalidAddress(email.to.clone()))
    }
}

#[tokio::test]
async fn test_repeated_polls_send_each_job_once() {
    let h = Harness::new(3).await;
    let schedule = h.materialize(Schedule::new(h.template.id, "leads", 1)).await;

    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = h.dispatcher(transport.clone());

    let first = dispatcher.poll(None).await.unwrap();
    assert_eq!(first.sent, 3);
    let second = dispatcher.poll(None).await.unwrap();
    assert_eq!(second, DispatchReport::default());
    assert_eq!(transport.sent().await.len(), 3);

    for job in h.store.schedule_jobs(schedule.id).await.unwrap() {
        assert_eq!(job.status, JobStatus::Sent);
        assert_eq!(job.sent_at, Some(at(9, 31)));
        assert!(job.message_id.is_some());
    }

    let events = h.store.events().await.unwrap();
    let sent_events = events.iter().filter(|e| e.kind == EventKind::Sent).count();
    let attempts = events.iter().filter(|e| e.kind == EventKind::SendAttempt).count();
    assert_eq!((sent_events, attempts), (3, 3));
}

#[tokio::test]
async fn test_outbound_email_is_rendered_with_metadata() {
    let h = Harness::new(1).await;
    h.materialize(Schedule::new(h.template.id, "leads", 1)).await;

    let transport = Arc::new(RecordingTransport::new());
    h.dispatcher(transport.clone()).poll(None).await.unwrap();

    let sent = transport.sent().await;
    let email = &sent[0];
    assert_eq!(email.to, "owner0@example.com");
    assert_eq!(email.subject, "Hello Business 0");
    assert!(email.html.contains("https://events.example.com/rsvp?eid=biz_token-0"));
    assert_eq!(email.metadata.get("inviteToken").map(String::as_str), Some("token-0"));
    assert_eq!(
        email.metadata.get("campaignId"),
        Some(&h.campaign.id.to_string())
    );
    assert!(email.metadata.contains_key("jobId"));
}

#[tokio::test]
async fn test_transport_failures_retry_then_fail() {
    let h = Harness::new(2).await;
    let schedule = h.materialize(Schedule::new(h.template.id, "leads", 1)).await;

    let transport = Arc::new(RecordingTransport::new());
    transport.fail_for("owner0@example.com").await;
    let dispatcher = h.dispatcher(transport.clone());

    let report = dispatcher.poll(None).await.unwrap();
    assert_eq!((report.sent, report.retried), (1, 1));

    for round in 2..=3 {
        assert_eq!(h.planner.slot_pending().await.unwrap(), 1);
        h.clock.advance(Duration::minutes(10));
        let report = dispatcher.poll(None).await.unwrap();
        if round < 3 {
            assert_eq!(report.retried, 1);
        } else {
            assert_eq!(report.failed, 1);
        }
    }

    let jobs = h.store.schedule_jobs(schedule.id).await.unwrap();
    let failed = jobs
        .iter()
        .find(|j| j.recipient.email == "owner0@example.com")
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, 3);
    assert!(failed.error.as_deref().unwrap().contains("unavailable"));

    // Nothing left to retry.
    assert_eq!(h.planner.slot_pending().await.unwrap(), 0);
    assert_eq!(transport.attempts(), 4);
}

#[tokio::test]
async fn test_invalid_address_fails_without_retry() {
    let h = Harness::new(1).await;
    let schedule = h.materialize(Schedule::new(h.template.id, "leads", 1)).await;

    let report = h.dispatcher(Arc::new(BouncingTransport)).poll(None).await.unwrap();
    assert_eq!(report.failed, 1);

    let job = &h.store.schedule_jobs(schedule.id).await.unwrap()[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_transport_times_out() {
    let h = Harness::new(1).await;
    let schedule = h.materialize(Schedule::new(h.template.id, "leads", 1)).await;

    let transport = Arc::new(RecordingTransport::new().with_latency(std::time::Duration::from_secs(60)));
    let dispatcher = h
        .dispatcher(transport.clone())
        .with_config(DispatchConfig::new().with_transport_timeout(std::time::Duration::from_secs(5)));

    let report = dispatcher.poll(None).await.unwrap();
    assert_eq!(report.retried, 1);

    let job = &h.store.schedule_jobs(schedule.id).await.unwrap()[0];
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.error.as_deref().unwrap().contains("timed out"));
    assert!(transport.sent().await.is_empty());
}

#[tokio::test]
async fn test_paused_campaign_and_schedule_hold_jobs() {
    let h = Harness::new(2).await;
    let schedule = h
        .materialize(Schedule::new(h.template.id, "leads", 1).repeat_every(60))
        .await;
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = h.dispatcher(transport.clone());

    assert!(h.planner.pause_schedule(schedule.id).await.unwrap());
    assert_eq!(dispatcher.poll(None).await.unwrap().processed, 0);

    h.planner.activate_schedule(schedule.id).await.unwrap();
    h.store
        .set_campaign_status(h.campaign.id, CampaignStatus::Paused)
        .await
        .unwrap();
    assert_eq!(dispatcher.poll(None).await.unwrap().processed, 0);

    h.store
        .set_campaign_status(h.campaign.id, CampaignStatus::Active)
        .await
        .unwrap();
    assert_eq!(dispatcher.poll(None).await.unwrap().sent, 2);
}

#[tokio::test]
async fn test_domain_cap_spreads_sends_across_polls() {
    let h = Harness::new(5).await;
    h.planner
        .reconfigure(
            h.campaign.id,
            ReconfigureRequest {
                windows: vec![WindowSpec::new("09:30", "11:45")],
                throttle_per_minute: 60,
                max_concurrent: 10,
                per_domain: Some(BTreeMap::from([("Example.com".to_string(), 2)])),
                quiet_hours: None,
                time_zone: None,
            },
        )
        .await
        .unwrap();
    h.materialize(Schedule::new(h.template.id, "leads", 1)).await;

    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = h.dispatcher(transport.clone());

    let sent: Vec<usize> = {
        let mut sent = Vec::new();
        for _ in 0..3 {
            sent.push(dispatcher.poll(None).await.unwrap().sent);
        }
        sent
    };
    assert_eq!(sent, vec![2, 2, 1]);
}

#[tokio::test]
async fn test_poll_scoped_to_campaign() {
    let h = Harness::new(2).await;
    h.materialize(Schedule::new(h.template.id, "leads", 1)).await;
    let dispatcher = h.dispatcher(Arc::new(RecordingTransport::new()));

    let other = Campaign::new("Other");
    h.store.insert_campaign(other.clone()).await.unwrap();
    assert_eq!(dispatcher.poll(Some(other.id)).await.unwrap().processed, 0);
    assert_eq!(dispatcher.poll(Some(h.campaign.id)).await.unwrap().sent, 2);
}

/// In-memory store whose audit log and sent-marking can be switched off.
struct FlakyStore {
    inner: InMemoryStore,
    events_down: AtomicBool,
    mark_sent_down: AtomicBool,
}

impl FlakyStore {
    fn over(inner: InMemoryStore) -> Self {
        Self {
            inner,
            events_down: AtomicBool::new(false),
            mark_sent_down: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CampaignStore for FlakyStore {
    async fn insert_campaign(&self, campaign: Campaign) -> QueueResult<()> {
        self.inner.insert_campaign(campaign).await
    }
    async fn campaign(&self, id: CampaignId) -> QueueResult<Campaign> {
        self.inner.campaign(id).await
    }
    async fn campaigns(&self) -> QueueResult<Vec<Campaign>> {
        self.inner.campaigns().await
    }
    async fn set_campaign_status(&self, id: CampaignId, status: CampaignStatus) -> QueueResult<()> {
        self.inner.set_campaign_status(id, status).await
    }
    async fn settings(&self, campaign_id: CampaignId) -> QueueResult<CampaignSettings> {
        self.inner.settings(campaign_id).await
    }
    async fn put_settings(&self, campaign_id: CampaignId, settings: CampaignSettings) -> QueueResult<()> {
        self.inner.put_settings(campaign_id, settings).await
    }
    async fn insert_template(&self, template: Template) -> QueueResult<()> {
        self.inner.insert_template(template).await
    }
    async fn template(&self, id: TemplateId) -> QueueResult<Template> {
        self.inner.template(id).await
    }
    async fn insert_schedule(&self, schedule: Schedule) -> QueueResult<()> {
        self.inner.insert_schedule(schedule).await
    }
    async fn schedule(&self, id: ScheduleId) -> QueueResult<Schedule> {
        self.inner.schedule(id).await
    }
    async fn schedules(&self) -> QueueResult<Vec<Schedule>> {
        self.inner.schedules().await
    }
    async fn update_schedule(&self, schedule: Schedule) -> QueueResult<()> {
        self.inner.update_schedule(schedule).await
    }
    async fn transition_schedule(
        &self,
        id: ScheduleId,
        from: &[ScheduleStatus],
        to: ScheduleStatus,
    ) -> QueueResult<bool> {
        self.inner.transition_schedule(id, from, to).await
    }
    async fn set_assignment(
        &self,
        id: ScheduleId,
        assignment: Option<ExperimentAssignment>,
    ) -> QueueResult<()> {
        self.inner.set_assignment(id, assignment).await
    }
    async fn insert_job(&self, job: EmailJob) -> QueueResult<EmailJob> {
        self.inner.insert_job(job).await
    }
    async fn job(&self, id: JobId) -> QueueResult<EmailJob> {
        self.inner.job(id).await
    }
    async fn campaign_jobs(&self, campaign_id: Option<CampaignId>) -> QueueResult<Vec<EmailJob>> {
        self.inner.campaign_jobs(campaign_id).await
    }
    async fn schedule_jobs(&self, schedule_id: ScheduleId) -> QueueResult<Vec<EmailJob>> {
        self.inner.schedule_jobs(schedule_id).await
    }
    async fn jobs_with_status(&self, status: JobStatus) -> QueueResult<Vec<EmailJob>> {
        self.inner.jobs_with_status(status).await
    }
    async fn due_jobs(&self, query: &DueQuery) -> QueueResult<Vec<EmailJob>> {
        self.inner.due_jobs(query).await
    }
    async fn claim(&self, id: JobId) -> QueueResult<bool> {
        self.inner.claim(id).await
    }
    async fn mark_sent(&self, id: JobId, at: DateTime<Utc>, message_id: Option<String>) -> QueueResult<bool> {
        if self.mark_sent_down.load(Ordering::SeqCst) {
            return Err(QueueError::Storage("write timed out".into()));
        }
        self.inner.mark_sent(id, at, message_id).await
    }
    async fn record_failure(&self, id: JobId, error: &str, max_attempts: u32) -> QueueResult<Option<JobStatus>> {
        self.inner.record_failure(id, error, max_attempts).await
    }
    async fn reslot(&self, assignments: &[(JobId, DateTime<Utc>)]) -> QueueResult<usize> {
        self.inner.reslot(assignments).await
    }
    async fn occupancy(&self, campaign_id: Option<CampaignId>, from: DateTime<Utc>) -> QueueResult<Occupancy> {
        self.inner.occupancy(campaign_id, from).await
    }
    async fn jobs_for_token(&self, invite_token: &str) -> QueueResult<Vec<EmailJob>> {
        self.inner.jobs_for_token(invite_token).await
    }
    async fn stamp_engagement(&self, id: JobId, kind: EngagementKind, at: DateTime<Utc>) -> QueueResult<bool> {
        self.inner.stamp_engagement(id, kind, at).await
    }
    async fn append_event(&self, event: JobEvent) -> QueueResult<()> {
        if self.events_down.load(Ordering::SeqCst) {
            return Err(QueueError::Storage("event log offline".into()));
        }
        self.inner.append_event(event).await
    }
    async fn events(&self) -> QueueResult<Vec<JobEvent>> {
        self.inner.events().await
    }
}

/// Materialize `n` jobs over a flaky store and return it with a dispatcher.
async fn flaky_world(n: usize, transport: Arc<dyn Transport>) -> (Arc<FlakyStore>, Dispatcher, ScheduleId) {
    let store = Arc::new(FlakyStore::over(InMemoryStore::new()));
    let contacts = (0..n)
        .map(|i| {
            Contact::new(format!("biz-{i}"))
                .with_email(format!("owner{i}@example.com"))
                .with_token(format!("token-{i}"))
        })
        .collect();
    let audience = Arc::new(StaticAudience::new().with_group("leads", contacts).await);
    let clock = ManualClock::new(at(9, 0));
    let planner = Planner::new(store.clone(), audience, Arc::new(clock.clone()));

    let campaign = Campaign::new("Spring").with_status(CampaignStatus::Active);
    let template = Template::new("Invite", "Hello", "<p>{{invite_link}}</p>");
    store.insert_campaign(campaign.clone()).await.unwrap();
    store.insert_template(template.clone()).await.unwrap();
    let schedule = planner
        .create_schedule(Schedule::new(template.id, "leads", 1).in_campaign(campaign.id))
        .await
        .unwrap();
    planner.activate_schedule(schedule.id).await.unwrap();
    planner.materialize_due().await.unwrap();
    clock.set(at(9, 31));

    let dispatcher = Dispatcher::new(
        store.clone(),
        transport,
        Arc::new(TemplateRenderer::new("https://events.example.com/rsvp")),
        Arc::new(clock),
    );
    (store, dispatcher, schedule.id)
}

#[tokio::test]
async fn test_unavailable_event_log_does_not_block_delivery() {
    let transport = Arc::new(RecordingTransport::new());
    let (store, dispatcher, schedule_id) = flaky_world(2, transport.clone()).await;
    store.events_down.store(true, Ordering::SeqCst);

    let report = dispatcher.poll(None).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(transport.sent().await.len(), 2);
    for job in store.schedule_jobs(schedule_id).await.unwrap() {
        assert_eq!(job.status, JobStatus::Sent);
    }
    assert!(store.events().await.unwrap().iter().all(|e| e.kind != EventKind::SendAttempt));
}

#[tokio::test]
async fn test_failed_sent_marking_releases_the_claim() {
    let transport = Arc::new(RecordingTransport::new());
    let (store, dispatcher, schedule_id) = flaky_world(2, transport.clone()).await;
    store.mark_sent_down.store(true, Ordering::SeqCst);

    let report = dispatcher.poll(None).await.unwrap();
    assert_eq!(report.retried, 2);
    for job in store.schedule_jobs(schedule_id).await.unwrap() {
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.error.as_deref().unwrap().contains("write timed out"));
    }
    assert!(store.jobs_with_status(JobStatus::Processing).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_polls_send_each_job_once() {
    let h = Harness::new(6).await;
    let schedule = h.materialize(Schedule::new(h.template.id, "leads", 1)).await;

    let transport = Arc::new(RecordingTransport::new().with_latency(std::time::Duration::from_millis(200)));
    let dispatcher = h.dispatcher(transport.clone());

    let (first, second) = tokio::join!(dispatcher.poll(None), dispatcher.poll(None));
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.sent + second.sent, 6);
    assert_eq!(transport.sent().await.len(), 6);
    assert_eq!(transport.attempts(), 6);

    let mut recipients: Vec<String> = transport.sent().await.into_iter().map(|e| e.to).collect();
    recipients.sort();
    recipients.dedup();
    assert_eq!(recipients.len(), 6);
    for job in h.store.schedule_jobs(schedule.id).await.unwrap() {
        assert_eq!(job.status, JobStatus::Sent);
    }
}
