//! Lazy slot cursor and FIFO allocation.

use crate::plan::SendingPlan;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Whole minutes since the Unix epoch.
type MinuteIndex = i64;

fn minute_floor(at: DateTime<Utc>) -> MinuteIndex {
    at.timestamp().div_euclid(60)
}

fn minute_ceil(at: DateTime<Utc>) -> MinuteIndex {
    let floor = minute_floor(at);
    if at.timestamp().rem_euclid(60) == 0 && at.timestamp_subsec_nanos() == 0 {
        floor
    } else {
        floor + 1
    }
}

fn minute_start(index: MinuteIndex) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(index.checked_mul(60)?, 0)
}

/// Number of slots already taken in each calendar minute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    taken: HashMap<MinuteIndex, u32>,
}

impl Occupancy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one slot in the minute containing `at`.
    pub fn add(&mut self, at: DateTime<Utc>) {
        *self.taken.entry(minute_floor(at)).or_insert(0) += 1;
    }

    /// Slots taken in the minute containing `at`.
    pub fn count(&self, at: DateTime<Utc>) -> u32 {
        self.count_index(minute_floor(at))
    }

    fn count_index(&self, index: MinuteIndex) -> u32 {
        self.taken.get(&index).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

impl FromIterator<DateTime<Utc>> for Occupancy {
    fn from_iter<I: IntoIterator<Item = DateTime<Utc>>>(iter: I) -> Self {
        let mut occupancy = Occupancy::new();
        for at in iter {
            occupancy.add(at);
        }
        occupancy
    }
}

/// Pull-based, unbounded sequence of send slots.
///
/// Walks forward one calendar minute at a time, skipping minutes the plan does not
/// admit, and yields each admissible minute up to `throttle_per_minute` times
/// (less whatever [`Occupancy`] says is already taken). Yielded instants are
/// non-decreasing, so consuming jobs in order keeps them FIFO.
///
/// ```
/// use cadence_slots::{DailyWindow, SendingPlan};
/// use chrono::{TimeZone, Utc};
/// use chrono_tz::Tz;
///
/// let plan = SendingPlan::new(
///     &[DailyWindow::parse("09:30", "11:45").unwrap()],
///     &[],
///     Tz::UTC,
/// )
/// .unwrap();
///
/// let now = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
/// let mut cursor = plan.cursor(now, 2);
///
/// let first = cursor.next().unwrap();
/// assert_eq!(first, Utc.with_ymd_and_hms(2025, 3, 3, 9, 30, 0).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct SlotCursor {
    plan: SendingPlan,
    throttle: u32,
    minute: MinuteIndex,
    used: u32,
    occupancy: Occupancy,
}

impl SlotCursor {
    pub(crate) fn new(
        plan: SendingPlan,
        from: DateTime<Utc>,
        throttle_per_minute: u32,
        occupancy: Occupancy,
    ) -> Self {
        let minute = minute_ceil(from);
        let used = occupancy.count_index(minute);
        Self {
            plan,
            throttle: throttle_per_minute.max(1),
            minute,
            used,
            occupancy,
        }
    }

    pub fn throttle_per_minute(&self) -> u32 {
        self.throttle
    }

    /// Start of the minute the cursor is currently filling.
    pub fn position(&self) -> Option<DateTime<Utc>> {
        minute_start(self.minute)
    }

    /// Count a slot handed out elsewhere against this cursor's capacity.
    pub fn reserve(&mut self, at: DateTime<Utc>) {
        self.occupancy.add(at);
        if minute_floor(at) == self.minute {
            self.used += 1;
        }
    }

    /// Move forward to the minute containing `at`; never moves back.
    pub fn skip_to(&mut self, at: DateTime<Utc>) {
        let target = minute_floor(at);
        if target > self.minute {
            self.minute = target;
            self.used = self.occupancy.count_index(target);
        }
    }

    fn advance(&mut self) -> bool {
        match self.minute.checked_add(1) {
            Some(next) => {
                self.minute = next;
                self.used = self.occupancy.count_index(next);
                true
            }
            None => false,
        }
    }
}

impl Iterator for SlotCursor {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        loop {
            let at = minute_start(self.minute)?;
            if self.used < self.throttle && self.plan.admits(at) {
                self.used += 1;
                return Some(at);
            }
            if !self.advance() {
                return None;
            }
        }
    }
}

/// A job paired with the slot it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment<J> {
    pub job: J,
    pub send_at: DateTime<Utc>,
}

/// Give each job, in order, the next slot from `cursor`.
///
/// Input order is priority: an earlier job never receives a later slot than a
/// job after it.
pub fn allocate<I>(jobs: I, cursor: &mut SlotCursor) -> Vec<Assignment<I::Item>>
where
    I: IntoIterator,
{
    jobs.into_iter()
        .map_while(|job| cursor.next().map(|send_at| Assignment { job, send_at }))
        .collect()
}
