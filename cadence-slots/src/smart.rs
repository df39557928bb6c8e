//! Smart-window send time resolution.

use crate::cursor::{Occupancy, SlotCursor};
use crate::error::{SlotError, SlotResult};
use crate::plan::SendingPlan;
use cadence_log::warn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An absolute range in which a step should go out, chosen adaptively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl SmartWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> SlotResult<Self> {
        if end <= start {
            return Err(SlotError::InvalidSmartWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether the window has fully elapsed at `now`.
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }

    /// Resolve send times for jobs of this window, starting at `now`.
    pub fn resolver(
        &self,
        plan: &SendingPlan,
        throttle_per_minute: u32,
        occupancy: Occupancy,
        now: DateTime<Utc>,
    ) -> SmartWindowResolver {
        let from = now.max(self.start);
        SmartWindowResolver {
            window: *self,
            now,
            cursor: plan.cursor_with_occupancy(from, throttle_per_minute, occupancy),
            saturated: false,
        }
    }
}

/// How a job's send time was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A throttled slot inside the window
    InWindow(DateTime<Utc>),
    /// The window already elapsed; the job is due at the next poll
    Immediate(DateTime<Utc>),
    /// The window ran out of capacity; the next throttled slot after it
    Overflow(DateTime<Utc>),
}

impl Resolution {
    pub fn send_at(&self) -> DateTime<Utc> {
        match self {
            Resolution::InWindow(at) | Resolution::Immediate(at) | Resolution::Overflow(at) => *at,
        }
    }
}

/// Hands out send times for one smart window occurrence.
///
/// Slots come from the campaign's throttled cursor, so the per-minute cap holds
/// across smart and fixed schedules alike.
#[derive(Debug)]
pub struct SmartWindowResolver {
    window: SmartWindow,
    now: DateTime<Utc>,
    cursor: SlotCursor,
    saturated: bool,
}

impl SmartWindowResolver {
    /// Send time for the next job, or `None` once the cursor is exhausted.
    pub fn next_resolution(&mut self) -> Option<Resolution> {
        if self.window.has_elapsed(self.now) {
            return Some(Resolution::Immediate(self.now));
        }

        let slot = self.cursor.next()?;
        if slot < self.window.end {
            return Some(Resolution::InWindow(slot));
        }

        if !self.saturated {
            self.saturated = true;
            warn!(
                window_end = %self.window.end,
                first_overflow = %slot,
                "Smart window saturated, spilling to later throttled slots"
            );
        }
        Some(Resolution::Overflow(slot))
    }

    /// Count a slot handed out elsewhere against the window's capacity.
    pub fn reserve(&mut self, at: DateTime<Utc>) {
        self.cursor.reserve(at);
    }
}

impl Iterator for SmartWindowResolver {
    type Item = Resolution;

    fn next(&mut self) -> Option<Resolution> {
        self.next_resolution()
    }
}
