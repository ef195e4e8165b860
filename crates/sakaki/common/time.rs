//! Temporal value representations.
//!
//! All types are plain fixed-size payloads so they can live inside record
//! buffers; conversions to calendar types go through `chrono`.

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

pub const NANOS_PER_SEC: u64 = 1_000_000_000;
pub const NANOS_PER_DAY: u64 = 86_400 * NANOS_PER_SEC;

/// Days since the epoch 1970-01-01, may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Date(pub i64);

impl Date {
    pub fn days_since_epoch(&self) -> i64 {
        self.0
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
        Some(Self(i64::from(date.num_days_from_ce() - epoch.num_days_from_ce())))
    }

    pub fn to_naive_date(&self) -> Option<NaiveDate> {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
        epoch.checked_add_signed(chrono::Duration::days(self.0))
    }
}

/// Nanoseconds since midnight, in `[0, 86_400 * 10^9)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(pub u64);

impl TimeOfDay {
    pub fn new(nanos: u64) -> Option<Self> {
        (nanos < NANOS_PER_DAY).then_some(Self(nanos))
    }

    pub fn nanos_since_midnight(&self) -> u64 {
        self.0
    }

    pub fn from_hms(hour: u32, min: u32, sec: u32) -> Option<Self> {
        let t = NaiveTime::from_hms_opt(hour, min, sec)?;
        Self::new(u64::from(t.num_seconds_from_midnight()) * NANOS_PER_SEC)
    }
}

/// Instant as seconds since the epoch plus a sub-second part in `[0, 10^9)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimePoint {
    pub seconds: i64,
    pub subsecond_nanos: u32,
}

impl TimePoint {
    pub fn new(seconds: i64, subsecond_nanos: u32) -> Option<Self> {
        (u64::from(subsecond_nanos) < NANOS_PER_SEC).then_some(Self { seconds, subsecond_nanos })
    }
}

/// Time of day carrying the zone offset it was written with, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeOfDayWithOffset {
    pub time: TimeOfDay,
    pub offset_minutes: i16,
}

/// Instant carrying the zone offset it was written with, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimePointWithOffset {
    pub time_point: TimePoint,
    pub offset_minutes: i16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_epoch_is_day_zero() {
        assert_eq!(Date::from_ymd(1970, 1, 1), Some(Date(0)));
        assert_eq!(Date::from_ymd(1970, 1, 2), Some(Date(1)));
        assert_eq!(Date::from_ymd(1969, 12, 31), Some(Date(-1)));
    }

    #[test]
    fn date_round_trips() {
        let d = Date::from_ymd(2024, 2, 29).unwrap();
        let nd = d.to_naive_date().unwrap();
        assert_eq!((nd.year(), nd.month(), nd.day()), (2024, 2, 29));
    }

    #[test]
    fn time_of_day_rejects_out_of_range() {
        assert!(TimeOfDay::new(NANOS_PER_DAY).is_none());
        assert!(TimeOfDay::new(NANOS_PER_DAY - 1).is_some());
    }

    #[test]
    fn time_point_rejects_bad_subsecond() {
        assert!(TimePoint::new(0, 1_000_000_000).is_none());
        assert!(TimePoint::new(-5, 999_999_999).is_some());
    }
}
