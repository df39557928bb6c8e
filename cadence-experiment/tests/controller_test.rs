//! Experiment controller tests against the in-memory store

use cadence_experiment::*;
use cadence_queue::{
    Campaign, CampaignStatus, CampaignStore, Contact, EmailJob, InMemoryStore, JobStatus, Schedule,
    ScheduleStatus, Template,
};
use cadence_slots::ManualClock;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap()
}

struct Lab {
    store: Arc<InMemoryStore>,
    clock: ManualClock,
    campaign: Campaign,
}

impl Lab {
    async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let campaign = Campaign::new("Spring").with_status(CampaignStatus::Active);
        store.insert_campaign(campaign.clone()).await.unwrap();
        Self {
            store,
            clock: ManualClock::new(t0()),
            campaign,
        }
    }

    /// A variant schedule with `sends` sent jobs, `rsvps` of which converted.
    async fn variant(&self, label: &str, step: u32, sends: usize, rsvps: usize) -> Schedule {
        let template = Template::new(format!("Invite - Variant {label}"), "Hi", "<p>Hi</p>");
        self.store.insert_template(template.clone()).await.unwrap();

        let schedule = Schedule::new(template.id, "leads", step)
            .in_campaign(self.campaign.id)
            .repeat_every(60)
            .with_status(ScheduleStatus::Scheduled);
        self.store.insert_schedule(schedule.clone()).await.unwrap();

        for i in 0..sends {
            let recipient = Contact::new(format!("{label}-{i}"))
                .with_email(format!("{label}-{i}@example.com"))
                .with_token(format!("{label}-tok-{i}"))
                .into_recipient()
                .unwrap();
            let mut job = EmailJob::new(&schedule, recipient, t0());
            job.status = JobStatus::Sent;
            job.send_at = Some(t0());
            job.sent_at = Some(t0());
            if i < rsvps {
                job.rsvp_at = Some(t0() + Duration::hours(1));
            }
            self.store.insert_job(job).await.unwrap();
        }
        schedule
    }

    fn controller(&self, config: ControllerConfig) -> ExperimentController {
        ExperimentController::new(self.store.clone(), Arc::new(self.clock.clone()), config)
            .with_seed(7)
    }
}

#[tokio::test]
async fn test_clear_winner_gets_seventy_percent() {
    let lab = Lab::new().await;
    let a = lab.variant("A", 1, 40, 2).await;
    let b = lab.variant("B", 1, 40, 10).await;
    lab.clock.set(t0() + Duration::hours(50));

    let controller = lab.controller(ControllerConfig::default());
    let report = controller.run().await.unwrap();
    assert_eq!(report.tests_monitored, 1);
    assert_eq!(report.winners_declared, 1);

    let a = lab.store.schedule(a.id).await.unwrap();
    let b = lab.store.schedule(b.id).await.unwrap();
    let (a_split, b_split) = (a.assignment.unwrap(), b.assignment.unwrap());
    assert_eq!(b_split.split_percent, 70.0);
    assert_eq!(a_split.split_percent, 30.0);
    assert_eq!(b_split.group_key, "Spring|1");
    assert_eq!(b_split.updated_at, t0() + Duration::hours(50));

    // Decided groups are not evaluated again.
    let report = controller.run().await.unwrap();
    assert_eq!(report.winners_declared, 0);
    assert_eq!(report.tests_monitored, 1);
}

#[tokio::test]
async fn test_no_winner_before_age_gate() {
    let lab = Lab::new().await;
    let a = lab.variant("A", 1, 40, 2).await;
    lab.variant("B", 1, 40, 10).await;
    lab.clock.set(t0() + Duration::hours(47));

    let report = lab.controller(ControllerConfig::default()).run().await.unwrap();
    assert_eq!(report.winners_declared, 0);
    assert!(lab.store.schedule(a.id).await.unwrap().assignment.is_none());
}

#[tokio::test]
async fn test_no_winner_before_send_gate() {
    let lab = Lab::new().await;
    lab.variant("A", 1, 20, 0).await;
    lab.variant("B", 1, 20, 12).await;
    lab.clock.set(t0() + Duration::hours(72));

    let report = lab.controller(ControllerConfig::default()).run().await.unwrap();
    assert_eq!(report.winners_declared, 0);
}

#[tokio::test]
async fn test_weighted_draw_approximates_split() {
    let lab = Lab::new().await;
    let a = lab.variant("A", 1, 40, 2).await;
    let b = lab.variant("B", 1, 40, 10).await;
    lab.clock.set(t0() + Duration::hours(50));
    let controller = lab.controller(ControllerConfig::default());

    let (mut a_active, mut b_active) = (0, 0);
    for _ in 0..200 {
        controller.run().await.unwrap();
        let a_status = lab.store.schedule(a.id).await.unwrap().status;
        let b_status = lab.store.schedule(b.id).await.unwrap().status;
        assert!(matches!(a_status, ScheduleStatus::Scheduled | ScheduleStatus::Draft));
        a_active += usize::from(a_status == ScheduleStatus::Scheduled);
        b_active += usize::from(b_status == ScheduleStatus::Scheduled);
    }
    assert!((35..=85).contains(&a_active), "A active {a_active} times");
    assert!((115..=165).contains(&b_active), "B active {b_active} times");
}

#[tokio::test]
async fn test_paused_variant_is_never_toggled() {
    let lab = Lab::new().await;
    let a = lab.variant("A", 1, 40, 2).await;
    lab.variant("B", 1, 40, 10).await;
    lab.store
        .transition_schedule(a.id, &[ScheduleStatus::Scheduled], ScheduleStatus::Paused)
        .await
        .unwrap();
    lab.clock.set(t0() + Duration::hours(50));

    let controller = lab.controller(ControllerConfig::default());
    for _ in 0..20 {
        controller.run().await.unwrap();
    }
    assert_eq!(lab.store.schedule(a.id).await.unwrap().status, ScheduleStatus::Paused);
}

#[tokio::test]
async fn test_reset_reopens_group() {
    let lab = Lab::new().await;
    let a = lab.variant("A", 1, 40, 2).await;
    let b = lab.variant("B", 1, 40, 10).await;
    lab.clock.set(t0() + Duration::hours(50));
    let controller = lab.controller(ControllerConfig::default());
    controller.run().await.unwrap();

    assert_eq!(controller.reset("Spring|1").await.unwrap(), 2);
    for id in [a.id, b.id] {
        let schedule = lab.store.schedule(id).await.unwrap();
        assert!(schedule.assignment.is_none());
        assert_eq!(schedule.status, ScheduleStatus::Scheduled);
    }

    let report = controller.run().await.unwrap();
    assert_eq!(report.winners_declared, 1);

    assert!(matches!(
        controller.reset("Spring|9").await,
        Err(ExperimentError::UnknownGroup(_))
    ));
}

#[tokio::test]
async fn test_single_variant_step_is_not_an_experiment() {
    let lab = Lab::new().await;
    let only = lab.variant("A", 2, 100, 60).await;
    lab.clock.set(t0() + Duration::hours(100));

    let report = lab.controller(ControllerConfig::default()).run().await.unwrap();
    assert_eq!(report, ControllerReport::default());
    assert!(lab.store.schedule(only.id).await.unwrap().assignment.is_none());
}

#[tokio::test]
async fn test_bucket_policy_keeps_variants_active() {
    let lab = Lab::new().await;
    let a = lab.variant("A", 1, 40, 2).await;
    let b = lab.variant("B", 1, 40, 10).await;
    lab.clock.set(t0() + Duration::hours(50));

    let controller =
        lab.controller(ControllerConfig::default().with_policy(SplitPolicy::RecipientBucket));
    let report = controller.run().await.unwrap();
    assert_eq!(report.winners_declared, 1);
    assert_eq!(report.adjustments_made, 0);

    let a = lab.store.schedule(a.id).await.unwrap();
    let b = lab.store.schedule(b.id).await.unwrap();
    assert_eq!(a.status, ScheduleStatus::Scheduled);
    assert_eq!(b.status, ScheduleStatus::Scheduled);

    let a_share = a.assignment.unwrap();
    let b_share = b.assignment.unwrap();
    assert_eq!((a_share.bucket_floor, a_share.split_percent), (0.0, 30.0));
    assert_eq!((b_share.bucket_floor, b_share.split_percent), (30.0, 70.0));
}
