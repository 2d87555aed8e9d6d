// src/calendar/time.rs

//! Time-of-day rules, bounded within a single calendar day.

use chrono::{NaiveTime, Timelike};
use serde::Deserialize;

use super::ScheduleError;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Unit of a recurring time-of-day rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnit {
    fn seconds(self) -> i64 {
        match self {
            TimeUnit::Hours => 3600,
            TimeUnit::Minutes => 60,
            TimeUnit::Seconds => 1,
        }
    }
}

/// Which times of day are eligible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSchedule {
    /// No time slot at all; a schedule using it never fires on its own.
    Never,
    /// Exactly one time of day.
    Once(NaiveTime),
    /// `start`, `start + every`, ... up to and including `end`.
    Recurring {
        unit: TimeUnit,
        every: u32,
        start: NaiveTime,
        end: NaiveTime,
    },
}

impl TimeSchedule {
    pub fn once(time: NaiveTime) -> Self {
        TimeSchedule::Once(time)
    }

    pub fn recurring(
        unit: TimeUnit,
        every: u32,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Self, ScheduleError> {
        if every == 0 {
            return Err(ScheduleError::ZeroFrequency);
        }
        if end < start {
            return Err(ScheduleError::EndBeforeStart {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(TimeSchedule::Recurring {
            unit,
            every,
            start,
            end,
        })
    }

    /// First slot at or after `earliest` on the same day.
    pub fn next_from(&self, earliest: NaiveTime) -> Option<NaiveTime> {
        match *self {
            TimeSchedule::Never => None,
            TimeSchedule::Once(time) => (time >= earliest).then_some(time),
            TimeSchedule::Recurring {
                unit,
                every,
                start,
                end,
            } => {
                let from = earliest.max(start);
                if from > end {
                    return None;
                }
                let step = i64::from(every) * unit.seconds() * NANOS_PER_SEC;
                let start_ns = nanos_of_day(start);
                let elapsed = nanos_of_day(from) - start_ns;
                // Ceiling division lands on the first boundary >= `from`.
                let cycles = (elapsed + step - 1) / step;
                let candidate = start_ns + cycles * step;
                if candidate > nanos_of_day(end) {
                    return None;
                }
                time_of_day(candidate)
            }
        }
    }

    /// Earliest slot of any day.
    pub fn first(&self) -> Option<NaiveTime> {
        self.next_from(NaiveTime::MIN)
    }
}

fn nanos_of_day(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * NANOS_PER_SEC + i64::from(time.nanosecond())
}

fn time_of_day(nanos: i64) -> Option<NaiveTime> {
    let secs = u32::try_from(nanos / NANOS_PER_SEC).ok()?;
    let frac = u32::try_from(nanos % NANOS_PER_SEC).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, frac)
}
