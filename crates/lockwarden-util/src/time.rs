//! Time utilities for lockwarden
//!
//! All governance decisions use UTC wall-clock time. Schedule evaluation is a
//! pure function of `(window, now)`: callers re-evaluate on every tick or
//! request instead of keeping a persistent timer, so periodic and on-demand
//! execution share exactly the same logic.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Get the current UTC time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Days of the week mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const MONDAY: u8 = 1 << 0;
    pub const TUESDAY: u8 = 1 << 1;
    pub const WEDNESDAY: u8 = 1 << 2;
    pub const THURSDAY: u8 = 1 << 3;
    pub const FRIDAY: u8 = 1 << 4;
    pub const SATURDAY: u8 = 1 << 5;
    pub const SUNDAY: u8 = 1 << 6;

    pub const WEEKDAYS: DaysOfWeek = DaysOfWeek(
        Self::MONDAY | Self::TUESDAY | Self::WEDNESDAY | Self::THURSDAY | Self::FRIDAY,
    );
    pub const WEEKENDS: DaysOfWeek = DaysOfWeek(Self::SATURDAY | Self::SUNDAY);
    pub const ALL_DAYS: DaysOfWeek = DaysOfWeek(0x7F);
    pub const NONE: DaysOfWeek = DaysOfWeek(0);

    const ORDER: [(Weekday, &'static str); 7] = [
        (Weekday::Mon, "mon"),
        (Weekday::Tue, "tue"),
        (Weekday::Wed, "wed"),
        (Weekday::Thu, "thu"),
        (Weekday::Fri, "fri"),
        (Weekday::Sat, "sat"),
        (Weekday::Sun, "sun"),
    ];

    pub fn new(mask: u8) -> Self {
        Self(mask & 0x7F)
    }

    fn bit(weekday: Weekday) -> u8 {
        match weekday {
            Weekday::Mon => Self::MONDAY,
            Weekday::Tue => Self::TUESDAY,
            Weekday::Wed => Self::WEDNESDAY,
            Weekday::Thu => Self::THURSDAY,
            Weekday::Fri => Self::FRIDAY,
            Weekday::Sat => Self::SATURDAY,
            Weekday::Sun => Self::SUNDAY,
        }
    }

    pub fn contains(&self, weekday: Weekday) -> bool {
        (self.0 & Self::bit(weekday)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Short lowercase names of the contained days, Monday first
    pub fn names(&self) -> Vec<&'static str> {
        Self::ORDER
            .iter()
            .filter(|(day, _)| self.contains(*day))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl std::ops::BitOr for DaysOfWeek {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl From<Weekday> for DaysOfWeek {
    fn from(day: Weekday) -> Self {
        Self(Self::bit(day))
    }
}

/// When a scheduled workflow is allowed to run.
///
/// Exactly one shape is active per workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ScheduleWindow {
    /// A fixed day of every month, optionally narrowed to one hour
    DayOfMonth { day: u8, hour: Option<u8> },
    /// A set of weekdays at a fixed hour
    Weekdays { days: DaysOfWeek, hour: u8 },
}

impl ScheduleWindow {
    /// Human-readable description for config summaries
    pub fn describe(&self) -> String {
        match self {
            ScheduleWindow::DayOfMonth { day, hour: Some(hour) } => {
                format!("day {} of every month at {:02}:00 UTC", day, hour)
            }
            ScheduleWindow::DayOfMonth { day, hour: None } => {
                format!("day {} of every month (any hour)", day)
            }
            ScheduleWindow::Weekdays { days, hour } => {
                format!("{} at {:02}:00 UTC", days.names().join(","), hour)
            }
        }
    }

    /// Identifies the window occurrence containing `now`, if the window is open.
    ///
    /// Two instants in the same occurrence yield the same key, which lets a
    /// ticking caller run a workflow at most once per occurrence.
    pub fn slot_key<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<String> {
        if !is_scheduled_now(self, now) {
            return None;
        }
        let date = now.date_naive();
        Some(match self {
            ScheduleWindow::DayOfMonth { hour: None, .. } => date.format("%Y-%m-%d").to_string(),
            _ => format!("{}T{:02}", date.format("%Y-%m-%d"), now.hour()),
        })
    }
}

/// Whether `now` falls inside `window`.
///
/// Day-of-month windows match on the calendar day, with the hour as a
/// secondary filter when present. Weekday windows match when the weekday is
/// in the set and the hour is equal.
pub fn is_scheduled_now<Tz: TimeZone>(window: &ScheduleWindow, now: &DateTime<Tz>) -> bool {
    match window {
        ScheduleWindow::DayOfMonth { day, hour } => {
            now.day() == u32::from(*day) && hour.is_none_or(|h| now.hour() == u32::from(h))
        }
        ScheduleWindow::Weekdays { days, hour } => {
            days.contains(now.weekday()) && now.hour() == u32::from(*hour)
        }
    }
}
