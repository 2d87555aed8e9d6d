// src/calendar/date.rs

//! Date-only recurrence rules.
//!
//! Every recurring rule is anchored at its `start` date. To find the next
//! occurrence we jump straight to the cycle that contains `earliest` (whole
//! units between `start` and `earliest`, floor-divided by the frequency) and
//! then walk forward at most one cycle, so the cost does not depend on how far
//! `earliest` is from `start`.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use serde::Deserialize;

use super::ScheduleError;

/// Unit of a plain chronological recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateUnit {
    Days,
    Weeks,
    Months,
}

/// Which matching day of the month is meant: first..fourth, or the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordinal {
    First,
    Second,
    Third,
    Fourth,
    Last,
}

impl Ordinal {
    /// `1..=4` select the n-th match, `0` selects the last one.
    pub fn from_number(n: u32) -> Result<Self, ScheduleError> {
        match n {
            0 => Ok(Ordinal::Last),
            1 => Ok(Ordinal::First),
            2 => Ok(Ordinal::Second),
            3 => Ok(Ordinal::Third),
            4 => Ok(Ordinal::Fourth),
            other => Err(ScheduleError::OrdinalOutOfRange(other)),
        }
    }

    fn index(self) -> Option<usize> {
        match self {
            Ordinal::First => Some(0),
            Ordinal::Second => Some(1),
            Ordinal::Third => Some(2),
            Ordinal::Fourth => Some(3),
            Ordinal::Last => None,
        }
    }
}

/// The kind of day counted by a logical day-of-month rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalDay {
    /// Any calendar day.
    Day,
    /// One specific day of the week.
    Named(Weekday),
    /// Monday to Friday.
    Workday,
    /// Saturday or Sunday.
    WeekendDay,
}

impl LogicalDay {
    fn matches(self, day: Weekday) -> bool {
        match self {
            LogicalDay::Day => true,
            LogicalDay::Named(wanted) => day == wanted,
            LogicalDay::Workday => !matches!(day, Weekday::Sat | Weekday::Sun),
            LogicalDay::WeekendDay => matches!(day, Weekday::Sat | Weekday::Sun),
        }
    }
}

impl FromStr for LogicalDay {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" => Ok(LogicalDay::Day),
            "weekday" | "workday" => Ok(LogicalDay::Workday),
            "weekendday" | "weekend_day" | "weekend" => Ok(LogicalDay::WeekendDay),
            other => other
                .parse::<Weekday>()
                .map(LogicalDay::Named)
                .map_err(|_| ScheduleError::UnknownDay(s.to_string())),
        }
    }
}

/// Compact set of weekdays.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = WeekdaySet::default();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl fmt::Debug for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut day = Weekday::Mon;
        let mut set = f.debug_set();
        for _ in 0..7 {
            if self.contains(day) {
                set.entry(&day);
            }
            day = day.succ();
        }
        set.finish()
    }
}

/// Date-only schedule: which calendar dates are eligible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSchedule {
    /// Exactly one date.
    Once(NaiveDate),
    /// Every `every` days/weeks/months counted from `start`.
    Recurring {
        unit: DateUnit,
        every: u32,
        start: NaiveDate,
        end: Option<NaiveDate>,
    },
    /// Selected weekdays of every `every`-th week, weeks counted from the
    /// week containing `start`.
    DaysOfWeek {
        every: u32,
        days: WeekdaySet,
        start: NaiveDate,
        end: Option<NaiveDate>,
    },
    /// Fixed day number (1..=28) of every `every`-th month.
    DayOfMonth {
        every: u32,
        day: u32,
        start: NaiveDate,
        end: Option<NaiveDate>,
    },
    /// n-th (or last) matching logical day of every `every`-th month.
    LogicalDayOfMonth {
        every: u32,
        ordinal: Ordinal,
        day: LogicalDay,
        start: NaiveDate,
        end: Option<NaiveDate>,
    },
}

impl DateSchedule {
    pub fn once(date: NaiveDate) -> Self {
        DateSchedule::Once(date)
    }

    pub fn recurring(
        unit: DateUnit,
        every: u32,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Self, ScheduleError> {
        check_range(every, start, end)?;
        Ok(DateSchedule::Recurring {
            unit,
            every,
            start,
            end,
        })
    }

    pub fn days_of_week(
        every: u32,
        days: impl IntoIterator<Item = Weekday>,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Self, ScheduleError> {
        check_range(every, start, end)?;
        let days: WeekdaySet = days.into_iter().collect();
        if days.is_empty() {
            return Err(ScheduleError::NoWeekdays);
        }
        Ok(DateSchedule::DaysOfWeek {
            every,
            days,
            start,
            end,
        })
    }

    pub fn day_of_month(
        every: u32,
        day: u32,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Self, ScheduleError> {
        check_range(every, start, end)?;
        if !(1..=28).contains(&day) {
            return Err(ScheduleError::DayOutOfRange(day));
        }
        Ok(DateSchedule::DayOfMonth {
            every,
            day,
            start,
            end,
        })
    }

    /// `LogicalDay::Day` with a concrete ordinal is just a day number, so it
    /// collapses into [`DateSchedule::DayOfMonth`].
    pub fn logical_day_of_month(
        every: u32,
        ordinal: Ordinal,
        day: LogicalDay,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Self, ScheduleError> {
        if let (LogicalDay::Day, Some(index)) = (day, ordinal.index()) {
            return Self::day_of_month(every, index as u32 + 1, start, end);
        }
        check_range(every, start, end)?;
        Ok(DateSchedule::LogicalDayOfMonth {
            every,
            ordinal,
            day,
            start,
            end,
        })
    }

    /// First eligible date on or after `earliest`, or `None` once exhausted.
    pub fn next_from(&self, earliest: NaiveDate) -> Option<NaiveDate> {
        match *self {
            DateSchedule::Once(date) => (date >= earliest).then_some(date),
            DateSchedule::Recurring {
                unit,
                every,
                start,
                end,
            } => {
                let from = clamp(earliest, start, end)?;
                let candidate = match unit {
                    DateUnit::Days => step_days(start, from, i64::from(every))?,
                    DateUnit::Weeks => step_days(start, from, i64::from(every) * 7)?,
                    DateUnit::Months => step_months(start, from, every)?,
                };
                within(candidate, end)
            }
            DateSchedule::DaysOfWeek {
                every,
                days,
                start,
                end,
            } => {
                let from = clamp(earliest, start, end)?;
                next_weekday(every, days, start, from).and_then(|d| within(d, end))
            }
            DateSchedule::DayOfMonth {
                every,
                day,
                start,
                end,
            } => next_monthly(every, start, end, earliest, |year, month| {
                NaiveDate::from_ymd_opt(year, month, day)
            }),
            DateSchedule::LogicalDayOfMonth {
                every,
                ordinal,
                day,
                start,
                end,
            } => next_monthly(every, start, end, earliest, |year, month| {
                logical_occurrence(year, month, ordinal, day)
            }),
        }
    }
}

fn check_range(every: u32, start: NaiveDate, end: Option<NaiveDate>) -> Result<(), ScheduleError> {
    if every == 0 {
        return Err(ScheduleError::ZeroFrequency);
    }
    if let Some(end) = end {
        if end < start {
            return Err(ScheduleError::EndBeforeStart {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
    }
    Ok(())
}

/// Clamp `earliest` to `start`; `None` if that is already past `end`.
fn clamp(earliest: NaiveDate, start: NaiveDate, end: Option<NaiveDate>) -> Option<NaiveDate> {
    within(earliest.max(start), end)
}

fn within(date: NaiveDate, end: Option<NaiveDate>) -> Option<NaiveDate> {
    match end {
        Some(end) if date > end => None,
        _ => Some(date),
    }
}

fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(u64::try_from(days).ok()?))
}

fn step_days(start: NaiveDate, from: NaiveDate, step: i64) -> Option<NaiveDate> {
    let elapsed = (from - start).num_days();
    let candidate = add_days(start, elapsed / step * step)?;
    if candidate < from {
        add_days(candidate, step)
    } else {
        Some(candidate)
    }
}

fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

fn step_months(start: NaiveDate, from: NaiveDate, every: u32) -> Option<NaiveDate> {
    let elapsed = month_index(from) - month_index(start);
    let cycles = u32::try_from(elapsed / i64::from(every)).ok()?;
    let candidate = start.checked_add_months(Months::new(cycles * every))?;
    if candidate < from {
        // Re-derive from `start` so month-end clamping never accumulates.
        start.checked_add_months(Months::new((cycles + 1) * every))
    } else {
        Some(candidate)
    }
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

fn next_weekday(every: u32, days: WeekdaySet, start: NaiveDate, from: NaiveDate) -> Option<NaiveDate> {
    let anchor = monday_of(start);
    let weeks = (monday_of(from) - anchor).num_days() / 7;
    let every = i64::from(every);
    let cycle = weeks / every * every;

    for week in [cycle, cycle + every] {
        let monday = add_days(anchor, week * 7)?;
        for offset in 0..7 {
            let date = add_days(monday, offset)?;
            if date >= from && days.contains(date.weekday()) {
                return Some(date);
            }
        }
    }
    None
}

fn next_monthly(
    every: u32,
    start: NaiveDate,
    end: Option<NaiveDate>,
    earliest: NaiveDate,
    occurrence: impl Fn(i32, u32) -> Option<NaiveDate>,
) -> Option<NaiveDate> {
    let from = clamp(earliest, start, end)?;
    let base = month_index(start);
    let every = i64::from(every);
    let cycle = (month_index(from) - base) / every;

    // The occurrence in the cycle holding `from` may already be behind it;
    // the following cycle is a strictly later month.
    for k in [cycle, cycle + 1] {
        let index = base + k * every;
        let year = i32::try_from(index.div_euclid(12)).ok()?;
        let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
        if let Some(date) = occurrence(year, month) {
            if date >= from {
                return within(date, end);
            }
        }
    }
    None
}

fn logical_occurrence(year: i32, month: u32, ordinal: Ordinal, day: LogicalDay) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let mut matching = first
        .iter_days()
        .take_while(|d| d.month() == month)
        .filter(|d| day.matches(d.weekday()));

    match ordinal.index() {
        Some(n) => matching.nth(n),
        None => matching.last(),
    }
}
