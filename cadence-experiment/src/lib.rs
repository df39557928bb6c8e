//! Adaptive A/B/C experiments for Cadence.
//!
//! Schedules of one campaign that share a step order but use different
//! templates form a variant group. The controller:
//!
//! - 📊 Aggregates sends, opens, visits and RSVPs per variant
//! - 🧮 Scores each variant with a one-sided two-proportion z-test
//! - 🏆 Declares a winner once the group has enough sends and age
//! - 🎲 Realizes the split by weighted draws, or by stable recipient buckets
//!
//! ## Example
//!
//! ```no_run
//! use cadence_experiment::*;
//! use cadence_queue::InMemoryStore;
//! use cadence_slots::SystemClock;
//! use std::sync::Arc;
//!
//! # async fn example() -> ExperimentResult<()> {
//! let controller = ExperimentController::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(SystemClock),
//!     ControllerConfig::default(),
//! );
//!
//! let report = controller.run().await?;
//! println!("{} winners declared", report.winners_declared);
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod stats;

pub use bucket::{BucketRouter, recipient_bucket};
pub use controller::{
    ControllerConfig, ControllerReport, ExperimentController, GroupOutcome, SplitPolicy,
    split_assignments,
};
pub use error::{ExperimentError, ExperimentResult};
pub use metrics::{VariantGroup, VariantMetrics, collect_groups, group_key};
pub use stats::{DecisionRule, Evaluation, confidence, evaluate, normal_cdf, pick_winner};
