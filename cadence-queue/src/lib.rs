//! Campaign job queue for Cadence.
//!
//! Holds the durable side of a campaign:
//! - 📋 Campaigns, templates and schedules (steps)
//! - 📨 Per-recipient jobs with a compare-and-swap status machine
//! - 🗓️ Materialization of schedules into throttled, slotted jobs
//! - 🔁 Re-slotting of unclaimed jobs when settings change
//! - 👀 Engagement tracking (opens, visits, RSVPs)
//! - 📊 Campaign reports and send previews
//!
//! ## Job Lifecycle
//!
//! ```
//! use cadence_queue::{Contact, EmailJob, JobStatus, Schedule};
//! use chrono::Utc;
//! use uuid::Uuid;
//!
//! let schedule = Schedule::new(Uuid::new_v4(), "spring-leads", 1);
//! let recipient = Contact::new("biz-42")
//!     .with_email("owner@example.com")
//!     .with_token("a1b2c3")
//!     .into_recipient()
//!     .unwrap();
//!
//! let job = EmailJob::new(&schedule, recipient, Utc::now());
//! assert_eq!(job.status, JobStatus::Pending);
//! assert!(job.status.is_reslottable());
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use cadence_queue::*;
//! use cadence_slots::SystemClock;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let store = Arc::new(InMemoryStore::new());
//!     let audience = Arc::new(StaticAudience::new());
//!     let planner = Planner::new(store.clone(), audience, Arc::new(SystemClock));
//!
//!     let campaign = Campaign::new("Spring launch");
//!     let template = Template::new("Invite - Variant A", "You're invited", "<p>Hi {{business_name}}</p>");
//!     let schedule = Schedule::new(template.id, "spring-leads", 1).in_campaign(campaign.id);
//!     store.insert_campaign(campaign).await?;
//!     store.insert_template(template).await?;
//!
//!     let schedule = planner.create_schedule(schedule).await?;
//!     planner.activate_schedule(schedule.id).await?;
//!     let report = planner.materialize_due().await?;
//!     println!("created {} jobs", report.created);
//!
//!     Ok(())
//! }
//! ```

pub mod audience;
pub mod engagement;
pub mod error;
pub mod model;
pub mod planner;
pub mod report;
pub mod store;

pub use audience::{AudienceSource, StaticAudience};
pub use engagement::{EngagementEvent, EngagementOutcome, EngagementTracker};
pub use error::{QueueError, QueueResult};
pub use model::{
    Campaign, CampaignId, CampaignStatus, Contact, EmailJob, EngagementKind, EventKind,
    ExperimentAssignment, JobEvent, JobId, JobStatus, Recipient, Schedule, ScheduleId,
    ScheduleStatus, Template, TemplateId, Timing,
};
pub use planner::{
    MaterializeReport, Materialized, Planner, ReconfigureOutcome, RecipientFilter, RunMode,
    RunOutcome,
};
pub use report::{
    CampaignReport, JobFailure, SchedulePreview, StatusCounts, campaign_report, schedule_preview,
};
pub use store::{CampaignStore, DueQuery, InMemoryStore};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::audience::{AudienceSource, StaticAudience};
    pub use crate::engagement::{EngagementEvent, EngagementOutcome, EngagementTracker};
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::model::{
        Campaign, CampaignStatus, Contact, EmailJob, EngagementKind, JobStatus, Schedule,
        ScheduleStatus, Template, Timing,
    };
    pub use crate::planner::{Planner, RecipientFilter, RunMode, RunOutcome};
    pub use crate::store::{CampaignStore, DueQuery, InMemoryStore};
}
