//! Cadence: throttled, window-aware email campaign delivery with adaptive
//! A/B/C experiments.
//!
//! - 🗓️ Per-minute throttles, daily sending windows, quiet hours and time zones
//! - 🎯 Smart windows that send as early as capacity allows
//! - 🚚 Claim-before-send dispatch with bounded retries
//! - 👀 Open, visit and RSVP tracking
//! - 🏆 Variant experiments that shift traffic to the winner
//!
//! The workspace crates are re-exported as modules; [`CampaignEngine`] ties
//! them together.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cadence::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> cadence::Result<()> {
//!     cadence::log::init();
//!
//!     let config = EngineConfig::load(None)?;
//!     let smtp = SmtpTransport::new(SmtpConfig::new("smtp.example.com", &config.mail.from_address))?;
//!     let engine = Arc::new(
//!         CampaignEngine::builder(config)
//!             .transport(Arc::new(smtp))
//!             .build()?,
//!     );
//!
//!     let campaign = engine.create_campaign("Spring launch").await?;
//!     let template = engine
//!         .create_template(Template::new("Invite - Variant A", "You're invited", "<a href=\"{{invite_link}}\">RSVP</a>"))
//!         .await?;
//!     engine
//!         .create_schedule(Schedule::new(template.id, "spring-leads", 1).in_campaign(campaign.id))
//!         .await?;
//!     engine.activate_campaign(campaign.id).await?;
//!
//!     let _scheduler = engine.spawn().await?;
//!     tokio::signal::ctrl_c().await.ok();
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;

pub use engine::{CampaignEngine, EngineBuilder, TriggerReport};
pub use error::{EngineError, Result};

pub use cadence_config as config;
pub use cadence_cron as cron;
pub use cadence_experiment as experiment;
pub use cadence_log as log;
pub use cadence_mail as mail;
pub use cadence_queue as queue;
pub use cadence_slots as slots;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::engine::{CampaignEngine, EngineBuilder, TriggerReport};
    pub use crate::error::{EngineError, Result};
    pub use cadence_config::EngineConfig;
    pub use cadence_experiment::SplitPolicy;
    pub use cadence_mail::{RecordingTransport, SmtpConfig, SmtpTransport, Transport};
    pub use cadence_queue::{
        Campaign, CampaignStatus, Contact, EngagementEvent, EngagementKind, RunMode, Schedule,
        ScheduleStatus, StaticAudience, Template,
    };
    pub use cadence_slots::{ManualClock, ReconfigureRequest, SmartWindow, SystemClock, WindowSpec};
}
