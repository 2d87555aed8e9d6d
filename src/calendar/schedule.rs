// src/calendar/schedule.rs

use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::date::DateSchedule;
use super::time::TimeSchedule;

/// How far back to look for the offset in force before a DST gap.
const GAP_PROBE_HOURS: i64 = 3;

/// Upper bound on local slots skipped while mapping to instants. Only
/// repeated (fall-back) hours can make a slot land behind `earliest`.
const MAX_ZONE_ATTEMPTS: usize = 8;

/// A date rule combined with a time rule.
///
/// `immediate` asks the owner to fire once right away, before the first
/// calendar occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    date: DateSchedule,
    time: TimeSchedule,
    immediate: bool,
}

impl Schedule {
    pub fn new(date: DateSchedule, time: TimeSchedule) -> Self {
        Self {
            date,
            time,
            immediate: false,
        }
    }

    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    pub fn date(&self) -> &DateSchedule {
        &self.date
    }

    pub fn time(&self) -> &TimeSchedule {
        &self.time
    }

    /// Next occurrence at or after `earliest` in local (wall-clock) terms.
    ///
    /// Do not turn the result into a sleep duration: local times around
    /// daylight-saving transitions do not map to a single instant. Use
    /// [`Schedule::next_from_zoned`] for that.
    pub fn next_from(&self, earliest: NaiveDateTime) -> Option<NaiveDateTime> {
        let first_slot = self.time.first()?;

        let mut date = self.date.next_from(earliest.date())?;
        let mut slot = if date == earliest.date() {
            self.time.next_from(earliest.time())
        } else {
            Some(first_slot)
        };

        while slot.is_none() {
            date = self.date.next_from(date.succ_opt()?)?;
            slot = Some(first_slot);
        }
        slot.map(|time| date.and_time(time))
    }

    /// Next occurrence at or after the instant `earliest`, resolved in the
    /// time zone of `earliest`.
    ///
    /// Local times skipped by a DST gap are shifted forward by the gap
    /// length; local times repeated by a DST overlap resolve to the first
    /// instance that is not before `earliest`.
    pub fn next_from_zoned<Tz: TimeZone>(&self, earliest: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = earliest.timezone();
        let mut from = earliest.naive_local();

        for _ in 0..MAX_ZONE_ATTEMPTS {
            let local = self.next_from(from)?;
            if let Some(instant) = resolve_local(&tz, local, earliest) {
                return Some(instant);
            }
            from = local + TimeDelta::nanoseconds(1);
        }
        None
    }
}

/// Map a local slot to an instant not before `earliest`, if there is one.
fn resolve_local<Tz: TimeZone>(
    tz: &Tz,
    local: NaiveDateTime,
    earliest: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) => (instant >= *earliest).then_some(instant),
        LocalResult::Ambiguous(first, second) => {
            let (first, second) = if first <= second {
                (first, second)
            } else {
                (second, first)
            };
            if first >= *earliest {
                Some(first)
            } else {
                (second >= *earliest).then_some(second)
            }
        }
        LocalResult::None => {
            let before = tz
                .from_local_datetime(&(local - TimeDelta::hours(GAP_PROBE_HOURS)))
                .earliest()?;
            let offset = i64::from(before.offset().fix().local_minus_utc());
            let utc = local - TimeDelta::seconds(offset);
            let instant = tz.from_utc_datetime(&utc);
            (instant >= *earliest).then_some(instant)
        }
    }
}

/// Ordered collection of schedules racing each other: the earliest next
/// occurrence across all members wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSet {
    schedules: Vec<Schedule>,
}

impl ScheduleSet {
    pub fn new(schedules: Vec<Schedule>) -> Self {
        Self { schedules }
    }

    pub fn push(&mut self, schedule: Schedule) {
        self.schedules.push(schedule);
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    /// True if any member asks for an immediate first run.
    pub fn is_immediate(&self) -> bool {
        self.schedules.iter().any(Schedule::is_immediate)
    }

    pub fn next_from(&self, earliest: NaiveDateTime) -> Option<NaiveDateTime> {
        self.schedules
            .iter()
            .filter_map(|s| s.next_from(earliest))
            .min()
    }

    pub fn next_from_zoned<Tz: TimeZone>(&self, earliest: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedules
            .iter()
            .filter_map(|s| s.next_from_zoned(earliest))
            .min()
    }

    /// Sleep until the clock has passed the next occurrence after now.
    ///
    /// Sleeps in increments of at most `granularity` and only returns once
    /// the clock is strictly past the target, so the same occurrence can
    /// never be picked up twice. Returns `false` when the set is exhausted or
    /// `cancel` fires first.
    pub async fn sleep_until_next(&self, granularity: Duration, cancel: &CancellationToken) -> bool {
        let now = chrono::Local::now();
        let Some(next) = self.next_from_zoned(&now) else {
            debug!("schedule set exhausted");
            return false;
        };
        let target = next.with_timezone(&Utc);
        debug!(next = %next, "sleeping until next occurrence");

        loop {
            let now = Utc::now();
            if now > target {
                return true;
            }
            let remaining = (target - now).to_std().unwrap_or_default();
            let nap = remaining.min(granularity).max(Duration::from_millis(1));

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("sleep interrupted by cancellation");
                    return false;
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}
