//! Daily wall-clock windows.

use crate::error::{SlotError, SlotResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minutes in a day.
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// A wall-clock minute of the day, `00:00` to `23:59`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> SlotResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(SlotError::InvalidTime(format!("{:02}:{:02}", hour, minute)));
        }
        Ok(Self(hour as u16 * 60 + minute as u16))
    }

    /// Minute index within the day.
    pub fn minute_of_day(&self) -> u16 {
        self.0
    }

    pub fn hour(&self) -> u8 {
        (self.0 / 60) as u8
    }

    pub fn minute(&self) -> u8 {
        (self.0 % 60) as u8
    }
}

impl FromStr for TimeOfDay {
    type Err = SlotError;

    /// Parse a strict `HH:MM` string.
    fn from_str(s: &str) -> SlotResult<Self> {
        let invalid = || SlotError::InvalidTime(s.to_string());

        let (hh, mm) = s.split_once(':').ok_or_else(invalid)?;
        if hh.len() != 2 || mm.len() != 2 {
            return Err(invalid());
        }
        if !hh.bytes().chain(mm.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let hour: u8 = hh.parse().map_err(|_| invalid())?;
        let minute: u8 = mm.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Wire form of a window: `{"start": "09:30", "end": "11:45"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub start: String,
    pub end: String,
}

impl WindowSpec {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// A repeating daily range `[start, end)`. The end minute is not included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WindowSpec", into = "WindowSpec")]
pub struct DailyWindow {
    start: TimeOfDay,
    end: TimeOfDay,
}

impl DailyWindow {
    /// Create a window, rejecting `end <= start`.
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> SlotResult<Self> {
        if end <= start {
            return Err(SlotError::EmptyWindow {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse a window from two `HH:MM` strings.
    ///
    /// ```
    /// use cadence_slots::DailyWindow;
    ///
    /// let morning = DailyWindow::parse("09:30", "11:45").unwrap();
    /// assert_eq!(morning.len_minutes(), 135);
    ///
    /// assert!(DailyWindow::parse("16:30", "13:15").is_err());
    /// ```
    pub fn parse(start: &str, end: &str) -> SlotResult<Self> {
        Self::new(start.parse()?, end.parse()?)
    }

    /// Window from minute-of-day bounds known to be valid at compile time.
    pub(crate) const fn fixed(start: u16, end: u16) -> Self {
        assert!(start < end && end <= MINUTES_PER_DAY);
        Self {
            start: TimeOfDay(start),
            end: TimeOfDay(end),
        }
    }

    pub fn start(&self) -> TimeOfDay {
        self.start
    }

    pub fn end(&self) -> TimeOfDay {
        self.end
    }

    pub fn contains(&self, minute_of_day: u16) -> bool {
        minute_of_day >= self.start.0 && minute_of_day < self.end.0
    }

    pub fn len_minutes(&self) -> u16 {
        self.end.0 - self.start.0
    }
}

impl TryFrom<WindowSpec> for DailyWindow {
    type Error = SlotError;

    fn try_from(spec: WindowSpec) -> SlotResult<Self> {
        Self::parse(&spec.start, &spec.end)
    }
}

impl From<DailyWindow> for WindowSpec {
    fn from(window: DailyWindow) -> Self {
        WindowSpec::new(window.start.to_string(), window.end.to_string())
    }
}

impl fmt::Display for DailyWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
