//! Wall-clock access for the suppression windows and the reminder schedule.

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveTime, TimeZone, Utc};

/// Source of the current time and of the user's local time zone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// First instant strictly after `after` whose local wall time is `at`.
    fn next_local(&self, after: DateTime<Utc>, at: NaiveTime) -> Option<DateTime<Utc>>;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// First instant strictly after `after` whose wall time in `tz` is `at`.
///
/// A day whose `at` falls into a DST gap is skipped; on an ambiguous day the
/// earlier instant wins.
pub fn next_occurrence<Tz: TimeZone>(
    tz: &Tz,
    after: DateTime<Utc>,
    at: NaiveTime,
) -> Option<DateTime<Utc>> {
    let mut date = after.with_timezone(tz).date_naive();
    for _ in 0..4 {
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > after {
                return Some(candidate);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// The machine clock in the machine's time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn next_local(&self, after: DateTime<Utc>, at: NaiveTime) -> Option<DateTime<Utc>> {
        next_occurrence(&Local, after, at)
    }
}

/// Settable clock with a fixed UTC offset.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Clock reading `local` wall time at `offset_hours` from UTC.
    pub fn at_local(local: &str, offset_hours: i32) -> Option<Self> {
        let offset = FixedOffset::east_opt(offset_hours * 3600)?;
        let naive = chrono::NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S").ok()?;
        let now = offset.from_local_datetime(&naive).single()?.with_timezone(&Utc);
        Some(Self::new(now, offset))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_local(&self, after: DateTime<Utc>, at: NaiveTime) -> Option<DateTime<Utc>> {
        next_occurrence(&self.offset, after, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    fn local(clock: &ManualClock, t: DateTime<Utc>) -> String {
        t.with_timezone(&clock.offset())
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    #[test]
    fn test_next_nine_before_nine_is_today() {
        let clock = ManualClock::at_local("2024-03-10 08:00:00", -3).unwrap();
        let next = clock.next_local(clock.now(), nine()).unwrap();
        assert_eq!(local(&clock, next), "2024-03-10 09:00");
    }

    #[test]
    fn test_next_nine_after_nine_is_tomorrow() {
        let clock = ManualClock::at_local("2024-03-10 10:00:00", -3).unwrap();
        let next = clock.next_local(clock.now(), nine()).unwrap();
        assert_eq!(local(&clock, next), "2024-03-11 09:00");
    }

    #[test]
    fn test_exactly_nine_is_not_now() {
        let clock = ManualClock::at_local("2024-03-10 09:00:00", 0).unwrap();
        let next = clock.next_local(clock.now(), nine()).unwrap();
        assert_eq!(local(&clock, next), "2024-03-11 09:00");
    }

    #[test]
    fn test_advance() {
        let clock = ManualClock::at_local("2024-03-10 23:59:00", 0).unwrap();
        clock.advance(Duration::minutes(2));
        assert_eq!(local(&clock, clock.now()), "2024-03-11 00:01");
    }
}
