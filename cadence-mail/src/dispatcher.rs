//! Periodic delivery of due jobs.

use cadence_log::{debug, info, warn};
use cadence_queue::{
    CampaignId, CampaignStore, DueQuery, EmailJob, EventKind, JobEvent, JobStatus,
};
use cadence_slots::{CampaignSettings, Clock};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::render::TemplateRenderer;
use crate::transport::{OutboundEmail, SendReceipt, Transport};
use crate::{MailError, Result};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Jobs selected per poll
    pub batch_limit: usize,
    /// Transport failures before a job is permanently failed
    pub max_attempts: u32,
    /// Deadline for one transport call
    pub transport_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            max_attempts: 3,
            transport_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout = timeout;
        self
    }
}

/// Counters of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Jobs claimed and handed to the transport
    pub processed: usize,
    pub sent: usize,
    /// Permanently failed this poll
    pub failed: usize,
    /// Failed this poll, returned to pending for a fresh slot
    pub retried: usize,
    /// Lost the claim, held back by a domain cap, or hit a store error
    pub skipped: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Sent => {
                self.processed += 1;
                self.sent += 1;
            }
            Outcome::Retried => {
                self.processed += 1;
                self.retried += 1;
            }
            Outcome::Failed => {
                self.processed += 1;
                self.failed += 1;
            }
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Retried,
    Failed,
    Skipped,
}

/// Sends due jobs through a [`Transport`], one compare-and-swap claim per job.
pub struct Dispatcher {
    store: Arc<dyn CampaignStore>,
    transport: Arc<dyn Transport>,
    renderer: Arc<TemplateRenderer>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        transport: Arc<dyn Transport>,
        renderer: Arc<TemplateRenderer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            transport,
            renderer,
            clock,
            config: DispatchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Send every job due now, optionally limited to one campaign.
    ///
    /// Individual job failures are recorded on the job and never abort the poll.
    pub async fn poll(&self, campaign_id: Option<CampaignId>) -> Result<DispatchReport> {
        let now = self.clock.now();
        let mut query = DueQuery::new(now, self.config.batch_limit);
        if let Some(id) = campaign_id {
            query = query.for_campaign(id);
        }

        let due = self.store.due_jobs(&query).await?;
        let mut report = DispatchReport::default();
        if due.is_empty() {
            return Ok(report);
        }

        let mut by_campaign: BTreeMap<Option<CampaignId>, Vec<EmailJob>> = BTreeMap::new();
        for job in due {
            by_campaign.entry(job.campaign_id).or_default().push(job);
        }

        for (campaign_id, jobs) in by_campaign {
            let settings = match campaign_id {
                Some(id) => self.store.settings(id).await?,
                None => CampaignSettings::default(),
            };
            let (admitted, held) = apply_domain_caps(&settings, jobs);
            for _ in 0..held {
                report.record(Outcome::Skipped);
            }

            let outcomes: Vec<Outcome> = stream::iter(admitted)
                .map(|job| self.process(job))
                .buffer_unordered(settings.max_concurrent.max(1) as usize)
                .collect()
                .await;
            for outcome in outcomes {
                report.record(outcome);
            }
        }

        info!(
            processed = report.processed,
            sent = report.sent,
            retried = report.retried,
            failed = report.failed,
            skipped = report.skipped,
            "Dispatch poll complete"
        );
        Ok(report)
    }

    async fn process(&self, job: EmailJob) -> Outcome {
        match self.try_process(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Dispatch bookkeeping failed");
                Outcome::Skipped
            }
        }
    }

    /// Claim, send and settle one job.
    ///
    /// Once the claim succeeds the job always leaves `Processing`: audit events
    /// are best-effort, and a failed `mark_sent` is settled as a failure.
    async fn try_process(&self, job: &EmailJob) -> Result<Outcome> {
        if !self.store.claim(job.id).await? {
            debug!(job_id = %job.id, "Job already claimed or no longer active");
            return Ok(Outcome::Skipped);
        }

        self.log_event(JobEvent::for_job(
            job,
            EventKind::SendAttempt,
            self.clock.now(),
            json!({ "attempt": job.retry_count + 1 }),
        ))
        .await;

        let receipt = match self.deliver(job).await {
            Ok(receipt) => receipt,
            Err(error) => return self.fail(job, &error).await,
        };

        let at = self.clock.now();
        if let Err(e) = self
            .store
            .mark_sent(job.id, at, Some(receipt.message_id.clone()))
            .await
        {
            warn!(job_id = %job.id, message_id = %receipt.message_id, error = %e, "Delivered job could not be marked sent");
            return self.fail(job, &MailError::Queue(e)).await;
        }
        self.log_event(JobEvent::for_job(
            job,
            EventKind::Sent,
            at,
            json!({ "messageId": receipt.message_id }),
        ))
        .await;
        debug!(job_id = %job.id, message_id = %receipt.message_id, "Job sent");
        Ok(Outcome::Sent)
    }

    async fn fail(&self, job: &EmailJob, error: &MailError) -> Result<Outcome> {
        let max_attempts = if error.is_retryable() {
            self.config.max_attempts
        } else {
            1
        };
        let status = self
            .store
            .record_failure(job.id, &error.to_string(), max_attempts)
            .await?;

        let outcome = match status {
            Some(JobStatus::Failed) => Outcome::Failed,
            Some(_) => Outcome::Retried,
            None => return Ok(Outcome::Skipped),
        };

        self.log_event(JobEvent::for_job(
            job,
            EventKind::Failed,
            self.clock.now(),
            json!({
                "error": error.to_string(),
                "retryCount": job.retry_count + 1,
                "willRetry": outcome == Outcome::Retried,
            }),
        ))
        .await;
        warn!(
            job_id = %job.id,
            error = %error,
            will_retry = outcome == Outcome::Retried,
            "Send failed"
        );
        Ok(outcome)
    }

    async fn log_event(&self, event: JobEvent) {
        let kind = event.kind;
        if let Err(e) = self.store.append_event(event).await {
            warn!(event = ?kind, error = %e, "Audit event dropped");
        }
    }

    async fn deliver(&self, job: &EmailJob) -> Result<SendReceipt> {
        let email = self.compose(job).await?;
        tokio::time::timeout(self.config.transport_timeout, self.transport.send(&email))
            .await
            .map_err(|_| MailError::Timeout)?
    }

    async fn compose(&self, job: &EmailJob) -> Result<OutboundEmail> {
        let template = self.store.template(job.template_id).await?;
        let rendered = self.renderer.render(&template, &job.recipient)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("jobId".to_string(), job.id.to_string());
        metadata.insert("scheduleId".to_string(), job.schedule_id.to_string());
        if let Some(campaign_id) = job.campaign_id {
            metadata.insert("campaignId".to_string(), campaign_id.to_string());
        }
        metadata.insert("inviteToken".to_string(), job.recipient.invite_token.clone());

        Ok(OutboundEmail {
            to: job.recipient.email.clone(),
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
            metadata,
        })
    }
}

/// Split jobs into those within their per-domain cap and a count of those held back.
fn apply_domain_caps(settings: &CampaignSettings, jobs: Vec<EmailJob>) -> (Vec<EmailJob>, usize) {
    if settings.per_domain.is_empty() {
        return (jobs, 0);
    }

    let mut used: HashMap<String, u32> = HashMap::new();
    let mut held = 0;
    let admitted = jobs
        .into_iter()
        .filter(|job| {
            let Some(limit) = settings.domain_limit(&job.recipient.email) else {
                return true;
            };
            let domain = job
                .recipient
                .email
                .rsplit_once('@')
                .map(|(_, d)| d.to_lowercase())
                .unwrap_or_default();
            let count = used.entry(domain).or_insert(0);
            if *count < limit {
                *count += 1;
                true
            } else {
                held += 1;
                false
            }
        })
        .collect();
    (admitted, held)
}
