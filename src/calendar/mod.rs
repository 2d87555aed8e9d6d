// src/calendar/mod.rs

//! Calendar scheduling.
//!
//! Everything in here is a pure function of its inputs: a schedule never looks
//! at the wall clock except in [`ScheduleSet::sleep_until_next`].
//!
//! - [`date`] holds the date-only recurrence rules (`DateSchedule`).
//! - [`time`] holds the time-of-day rules bounded within one day (`TimeSchedule`).
//! - [`schedule`] composes the two into a `Schedule`, and aggregates schedules
//!   into a racing `ScheduleSet`.

use thiserror::Error;

pub mod date;
pub mod schedule;
pub mod time;

pub use date::{DateSchedule, DateUnit, LogicalDay, Ordinal, WeekdaySet};
pub use schedule::{Schedule, ScheduleSet};
pub use time::{TimeSchedule, TimeUnit};

/// Invalid schedule parameters, reported when a schedule is constructed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("frequency must be >= 1 (got 0)")]
    ZeroFrequency,

    #[error("end {end} is before start {start}")]
    EndBeforeStart { start: String, end: String },

    #[error("day of month must be between 1 and 28 (got {0})")]
    DayOutOfRange(u32),

    #[error("ordinal must be between 0 (last) and 4 (got {0})")]
    OrdinalOutOfRange(u32),

    #[error("at least one weekday is required")]
    NoWeekdays,

    #[error("unrecognised day name '{0}'")]
    UnknownDay(String),
}
