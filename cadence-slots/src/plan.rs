//! Admissible-minute map for a campaign.

use crate::cursor::{Occupancy, SlotCursor};
use crate::error::{SlotError, SlotResult};
use crate::window::{DailyWindow, MINUTES_PER_DAY};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

/// Which minutes of the day may receive sends, in a given time zone.
///
/// A minute is admissible when at least one window covers it and no quiet-hour
/// range does. Overlapping windows admit a minute once.
#[derive(Debug, Clone)]
pub struct SendingPlan {
    admissible: Arc<[bool]>,
    open_minutes: u16,
    tz: Tz,
}

impl SendingPlan {
    /// Build a plan, rejecting configurations that could never yield a slot.
    pub fn new(windows: &[DailyWindow], quiet_hours: &[DailyWindow], tz: Tz) -> SlotResult<Self> {
        if windows.is_empty() {
            return Err(SlotError::NoWindows);
        }

        let mut admissible = vec![false; MINUTES_PER_DAY as usize];
        for minute in 0..MINUTES_PER_DAY {
            admissible[minute as usize] = windows.iter().any(|w| w.contains(minute))
                && !quiet_hours.iter().any(|q| q.contains(minute));
        }

        let open_minutes = admissible.iter().filter(|open| **open).count() as u16;
        if open_minutes == 0 {
            return Err(SlotError::NoAdmissibleMinutes);
        }

        Ok(Self {
            admissible: admissible.into(),
            open_minutes,
            tz,
        })
    }

    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    /// Number of admissible minutes per (non-DST-transition) day.
    pub fn open_minutes_per_day(&self) -> u16 {
        self.open_minutes
    }

    /// Whether the minute containing `at` is admissible.
    pub fn admits(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.tz);
        let minute_of_day = local.hour() * 60 + local.minute();
        self.admissible[minute_of_day as usize]
    }

    /// A cursor over slots starting at `from`, rounded up to the next whole minute.
    pub fn cursor(&self, from: DateTime<Utc>, throttle_per_minute: u32) -> SlotCursor {
        SlotCursor::new(self.clone(), from, throttle_per_minute, Occupancy::default())
    }

    /// A cursor that only hands out capacity left over by `occupancy`.
    pub fn cursor_with_occupancy(
        &self,
        from: DateTime<Utc>,
        throttle_per_minute: u32,
        occupancy: Occupancy,
    ) -> SlotCursor {
        SlotCursor::new(self.clone(), from, throttle_per_minute, occupancy)
    }
}
