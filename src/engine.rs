//! The campaign engine: one handle over planning, delivery and experiments.

use cadence_config::{EngineConfig, Validate};
use cadence_cron::{CronError, CronScheduler, SchedulerConfig};
use cadence_experiment::{
    BucketRouter, ControllerConfig, ControllerReport, ExperimentController, SplitPolicy,
};
use cadence_log::{info, warn};
use cadence_mail::{DispatchConfig, DispatchReport, Dispatcher, TemplateRenderer, Transport};
use cadence_queue::{
    AudienceSource, Campaign, CampaignId, CampaignReport, CampaignStatus, CampaignStore,
    EngagementEvent, EngagementOutcome, EngagementTracker, InMemoryStore, MaterializeReport,
    Planner, ReconfigureOutcome, RunMode, RunOutcome, Schedule, ScheduleId, ScheduleStatus,
    SchedulePreview, StaticAudience, Template, campaign_report, schedule_preview,
};
use cadence_slots::{Clock, ReconfigureRequest, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Everything one cron trigger did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerReport {
    pub materialized: MaterializeReport,
    /// Retried jobs given a fresh slot
    pub slotted: usize,
    pub dispatched: DispatchReport,
    pub experiments: ControllerReport,
    /// Stages that failed; the remaining stages still ran
    pub errors: Vec<String>,
}

/// Builder for [`CampaignEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn CampaignStore>>,
    audience: Option<Arc<dyn AudienceSource>>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    seed: Option<u64>,
    policy: SplitPolicy,
}

impl EngineBuilder {
    pub fn store(mut self, store: Arc<dyn CampaignStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audience(mut self, audience: Arc<dyn AudienceSource>) -> Self {
        self.audience = Some(audience);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Seed the experiment draw for reproducible runs.
    pub fn experiment_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn split_policy(mut self, policy: SplitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validate the configuration and wire the workers together.
    ///
    /// A transport is required; the store defaults to memory, the audience
    /// to an empty static source and the clock to the system clock.
    pub fn build(self) -> Result<CampaignEngine> {
        self.config.validate()?;
        let transport = self.transport.ok_or(EngineError::Missing("mail transport"))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let audience = self
            .audience
            .unwrap_or_else(|| Arc::new(StaticAudience::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut planner = Planner::new(store.clone(), audience, clock.clone());
        if self.policy == SplitPolicy::RecipientBucket {
            planner = planner.with_filter(Arc::new(BucketRouter));
        }

        let dispatch = &self.config.dispatcher;
        let dispatcher = Dispatcher::new(
            store.clone(),
            transport,
            Arc::new(TemplateRenderer::new(self.config.mail.link_base.clone())),
            clock.clone(),
        )
        .with_config(
            DispatchConfig::new()
                .with_batch_limit(dispatch.batch_limit)
                .with_max_attempts(dispatch.max_attempts)
                .with_transport_timeout(dispatch.transport_timeout()),
        );

        let controller_config =
            ControllerConfig::from(&self.config.experiment).with_policy(self.policy);
        controller_config.validate()?;
        let mut experiments = ExperimentController::new(store.clone(), clock.clone(), controller_config);
        if let Some(seed) = self.seed {
            experiments = experiments.with_seed(seed);
        }

        Ok(CampaignEngine {
            tracker: EngagementTracker::new(store.clone()),
            store,
            clock,
            planner,
            dispatcher,
            experiments,
            config: self.config,
        })
    }
}

/// Campaign operations plus the periodic trigger.
pub struct CampaignEngine {
    store: Arc<dyn CampaignStore>,
    clock: Arc<dyn Clock>,
    planner: Planner,
    dispatcher: Dispatcher,
    experiments: ExperimentController,
    tracker: EngagementTracker,
    config: EngineConfig,
}

impl CampaignEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            store: None,
            audience: None,
            transport: None,
            clock: None,
            seed: None,
            policy: SplitPolicy::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CampaignStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Campaigns, templates, schedules
    // ------------------------------------------------------------------

    pub async fn create_campaign(&self, name: impl Into<String>) -> Result<Campaign> {
        let campaign = Campaign::new(name);
        self.store.insert_campaign(campaign.clone()).await?;
        info!(campaign_id = %campaign.id, name = %campaign.name, "Campaign created");
        Ok(campaign)
    }

    /// Mark the campaign active and activate its draft steps.
    ///
    /// Variants held in draft by a decided experiment stay there; only the
    /// experiment controller moves them. Returns how many schedules were activated.
    pub async fn activate_campaign(&self, id: CampaignId) -> Result<usize> {
        self.store.set_campaign_status(id, CampaignStatus::Active).await?;

        let mut activated = 0;
        for schedule in self.store.schedules().await? {
            if schedule.campaign_id == Some(id)
                && schedule.status == ScheduleStatus::Draft
                && schedule.assignment.is_none()
                && self.planner.activate_schedule(schedule.id).await?
            {
                activated += 1;
            }
        }
        Ok(activated)
    }

    /// Hold every unsent job of the campaign until it is activated again.
    pub async fn pause_campaign(&self, id: CampaignId) -> Result<()> {
        self.store.set_campaign_status(id, CampaignStatus::Paused).await?;
        Ok(())
    }

    pub async fn cancel_campaign(&self, id: CampaignId) -> Result<()> {
        self.store.set_campaign_status(id, CampaignStatus::Cancelled).await?;
        Ok(())
    }

    pub async fn create_template(&self, template: Template) -> Result<Template> {
        self.store.insert_template(template.clone()).await?;
        Ok(template)
    }

    pub async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule> {
        Ok(self.planner.create_schedule(schedule).await?)
    }

    pub async fn activate_schedule(&self, id: ScheduleId) -> Result<bool> {
        Ok(self.planner.activate_schedule(id).await?)
    }

    pub async fn pause_schedule(&self, id: ScheduleId) -> Result<bool> {
        Ok(self.planner.pause_schedule(id).await?)
    }

    pub async fn cancel_schedule(&self, id: ScheduleId) -> Result<bool> {
        Ok(self.planner.cancel_schedule(id).await?)
    }

    /// Replace a campaign's sending settings and re-slot its unclaimed jobs.
    pub async fn reconfigure(
        &self,
        campaign_id: CampaignId,
        request: ReconfigureRequest,
    ) -> Result<ReconfigureOutcome> {
        Ok(self.planner.reconfigure(campaign_id, request).await?)
    }

    /// Materialize one schedule now, or preview its audience.
    pub async fn run_schedule(&self, id: ScheduleId, mode: RunMode) -> Result<RunOutcome> {
        Ok(self.planner.run_schedule(id, mode).await?)
    }

    // ------------------------------------------------------------------
    // Engagement and reporting
    // ------------------------------------------------------------------

    pub async fn record_engagement(&self, event: &EngagementEvent) -> Result<EngagementOutcome> {
        Ok(self.tracker.record(event).await?)
    }

    pub async fn campaign_report(&self, campaign_id: CampaignId) -> Result<CampaignReport> {
        Ok(campaign_report(self.store.as_ref(), campaign_id).await?)
    }

    pub async fn schedule_preview(&self, campaign_id: CampaignId) -> Result<SchedulePreview> {
        Ok(schedule_preview(self.store.as_ref(), campaign_id, self.clock.now()).await?)
    }

    /// Re-open a decided variant group, e.g. `"Spring launch|1"`.
    pub async fn reset_experiment(&self, group_key: &str) -> Result<usize> {
        Ok(self.experiments.reset(group_key).await?)
    }

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    pub async fn dispatch(&self, campaign_id: Option<CampaignId>) -> Result<DispatchReport> {
        Ok(self.dispatcher.poll(campaign_id).await?)
    }

    pub async fn evaluate_experiments(&self) -> Result<ControllerReport> {
        Ok(self.experiments.run().await?)
    }

    /// Materialize due schedules, re-slot retried jobs, then dispatch.
    pub async fn deliver(&self) -> TriggerReport {
        let mut report = TriggerReport::default();

        match self.planner.materialize_due().await {
            Ok(materialized) => report.materialized = materialized,
            Err(e) => report.fail("materialize", e),
        }
        match self.planner.slot_pending().await {
            Ok(slotted) => report.slotted = slotted,
            Err(e) => report.fail("slot", e),
        }
        match self.dispatcher.poll(None).await {
            Ok(dispatched) => report.dispatched = dispatched,
            Err(e) => report.fail("dispatch", e),
        }
        report
    }

    /// One full cron trigger: delivery followed by experiment evaluation.
    ///
    /// A failing stage is logged and recorded; later stages still run.
    pub async fn trigger(&self) -> TriggerReport {
        let mut report = self.deliver().await;
        match self.experiments.run().await {
            Ok(experiments) => report.experiments = experiments,
            Err(e) => report.fail("experiments", e),
        }

        info!(
            created = report.materialized.created,
            slotted = report.slotted,
            sent = report.dispatched.sent,
            winners = report.experiments.winners_declared,
            errors = report.errors.len(),
            "Cron trigger complete"
        );
        report
    }

    /// Register the delivery and experiment workers on a scheduler.
    ///
    /// The scheduler is started unless cron is disabled in the configuration.
    pub async fn spawn(self: &Arc<Self>) -> Result<CronScheduler> {
        let mut scheduler = CronScheduler::with_config(
            SchedulerConfig::default().with_tick_interval(self.config.cron.tick_interval()),
        );

        let engine = self.clone();
        scheduler
            .add_task("deliver", self.config.dispatcher.poll_interval(), move |_ctx| {
                let engine = engine.clone();
                async move {
                    let report = engine.deliver().await;
                    match report.errors.first() {
                        Some(error) => Err(CronError::failed(error)),
                        None => Ok(()),
                    }
                }
            })
            .await?;

        let engine = self.clone();
        scheduler
            .add_task("experiments", self.config.experiment.interval(), move |_ctx| {
                let engine = engine.clone();
                async move {
                    engine
                        .evaluate_experiments()
                        .await
                        .map(|_| ())
                        .map_err(CronError::failed)
                }
            })
            .await?;

        if self.config.cron.enabled {
            scheduler.start().await?;
        }
        Ok(scheduler)
    }
}

impl TriggerReport {
    fn fail(&mut self, stage: &str, error: impl std::fmt::Display) {
        warn!(stage, error = %error, "Trigger stage failed");
        self.errors.push(format!("{stage}: {error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_mail::RecordingTransport;

    #[test]
    fn test_build_requires_transport() {
        let result = CampaignEngine::builder(EngineConfig::default()).build();
        assert!(matches!(result, Err(EngineError::Missing(_))));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.dispatcher.batch_limit = 0;
        let result = CampaignEngine::builder(config)
            .transport(Arc::new(RecordingTransport::new()))
            .build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_trigger_report_records_failures() {
        let mut report = TriggerReport::default();
        report.fail("dispatch", "store offline");
        assert_eq!(report.errors, vec!["dispatch: store offline".to_string()]);
    }

    #[tokio::test]
    async fn test_create_campaign_starts_in_draft() {
        let engine = CampaignEngine::builder(EngineConfig::default())
            .transport(Arc::new(RecordingTransport::new()))
            .build()
            .unwrap();
        let campaign = engine.create_campaign("Spring").await.unwrap();
        let stored = engine.store().campaign(campaign.id).await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Draft);
    }
}
