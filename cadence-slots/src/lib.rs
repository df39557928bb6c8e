//! Send-window slot allocation for Cadence.
//!
//! Provides the throttled scheduling core:
//! - 🕘 Repeating daily `HH:MM` windows with quiet hours and time zones
//! - 🚦 Per-minute throttle shared across all windows
//! - 🔁 Lazy, pull-based slot cursor that rolls over day by day
//! - 📬 FIFO allocation of queued jobs to slots
//! - 🎯 Smart-window resolution on top of the throttled stream
//! - ⏱️ Injectable clocks
//!
//! ## Quick Start
//!
//! ```
//! use cadence_slots::{allocate, CampaignSettings, ReconfigureRequest, WindowSpec};
//! use chrono::{TimeZone, Utc};
//!
//! let settings = CampaignSettings::try_from(ReconfigureRequest {
//!     windows: vec![
//!         WindowSpec::new("09:30", "11:45"),
//!         WindowSpec::new("13:15", "16:30"),
//!     ],
//!     throttle_per_minute: 2,
//!     max_concurrent: 10,
//!     per_domain: None,
//!     quiet_hours: None,
//!     time_zone: None,
//! })
//! .unwrap();
//!
//! let now = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
//! let mut cursor = settings.plan().unwrap().cursor(now, settings.throttle_per_minute);
//!
//! let assigned = allocate(["a", "b", "c", "d", "e"], &mut cursor);
//! let minutes: Vec<_> = assigned.iter().map(|a| a.send_at.format("%H:%M").to_string()).collect();
//! assert_eq!(minutes, ["09:30", "09:30", "09:31", "09:31", "09:32"]);
//! ```

pub mod clock;
pub mod cursor;
pub mod error;
pub mod plan;
pub mod settings;
pub mod smart;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cursor::{Assignment, Occupancy, SlotCursor, allocate};
pub use error::{SlotError, SlotResult};
pub use plan::SendingPlan;
pub use settings::{CampaignSettings, MAX_LIMIT, ReconfigureRequest};
pub use smart::{Resolution, SmartWindow, SmartWindowResolver};
pub use window::{DailyWindow, TimeOfDay, WindowSpec};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::cursor::{Assignment, Occupancy, SlotCursor, allocate};
    pub use crate::error::{SlotError, SlotResult};
    pub use crate::plan::SendingPlan;
    pub use crate::settings::{CampaignSettings, ReconfigureRequest};
    pub use crate::smart::{Resolution, SmartWindow};
    pub use crate::window::{DailyWindow, WindowSpec};
}
