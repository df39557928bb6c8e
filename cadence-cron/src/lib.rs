//! Periodic task runner for Cadence.
//!
//! Drives the campaign workers on fixed intervals:
//! - ⏱️ Named async tasks, each with its own period
//! - 🔒 No overlapping runs of the same task
//! - ❌ Failing runs are logged and retried at the next interval
//! - 📊 Per-task run and failure counters
//!
//! ## Quick Start
//!
//! ```no_run
//! use cadence_cron::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CronError> {
//!     let mut scheduler = CronScheduler::with_config(
//!         SchedulerConfig::default().with_tick_interval(Duration::from_millis(500)),
//!     );
//!
//!     scheduler
//!         .add_task("experiments", Duration::from_secs(3600), |_ctx| async move {
//!             println!("evaluating experiments");
//!             Ok(())
//!         })
//!         .await?;
//!
//!     scheduler.start().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod scheduler;
pub mod task;

pub use error::{CronError, CronResult};
pub use scheduler::{CronScheduler, SchedulerConfig, TaskStats};
pub use task::{Task, TaskContext, TaskFn, TaskStatus};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{CronError, CronResult};
    pub use crate::scheduler::{CronScheduler, SchedulerConfig};
    pub use crate::task::{TaskContext, TaskStatus};
}
