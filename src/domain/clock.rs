use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Weekday of a timetable slot. Serialized as the full English name so blobs
/// written by the mobile client load unchanged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

pub const ALL_DAYS: [DayOfWeek; 7] = [
    DayOfWeek::Monday,
    DayOfWeek::Tuesday,
    DayOfWeek::Wednesday,
    DayOfWeek::Thursday,
    DayOfWeek::Friday,
    DayOfWeek::Saturday,
    DayOfWeek::Sunday,
];

impl DayOfWeek {
    /// Monday-first index in [0, 6].
    pub fn index(self) -> u32 {
        match self {
            Self::Monday => 0,
            Self::Tuesday => 1,
            Self::Wednesday => 2,
            Self::Thursday => 3,
            Self::Friday => 4,
            Self::Saturday => 5,
            Self::Sunday => 6,
        }
    }

    /// Weekday number used by the platform notification service
    /// (Sunday = 1 through Saturday = 7).
    pub fn platform_weekday(self) -> u32 {
        match self {
            Self::Sunday => 1,
            Self::Monday => 2,
            Self::Tuesday => 3,
            Self::Wednesday => 4,
            Self::Thursday => 5,
            Self::Friday => 6,
            Self::Saturday => 7,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
            Weekday::Sun => Self::Sunday,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
            Self::Saturday => "Saturday",
            Self::Sunday => "Sunday",
        }
    }
}

/// Parses an "HH:MM" clock string into minutes since midnight.
pub fn parse_clock(value: &str) -> Result<u32, InfraError> {
    let invalid = || InfraError::InvalidTime(value.to_string());

    let mut split = value.split(':');
    let hour_str = split.next().ok_or_else(invalid)?;
    let minute_str = split.next().ok_or_else(invalid)?;
    if split.next().is_some() {
        return Err(invalid());
    }

    let hour = hour_str.trim().parse::<u32>().map_err(|_| invalid())?;
    let minute = minute_str.trim().parse::<u32>().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok(hour * 60 + minute)
}

/// Formats minutes since midnight as "HH:MM", wrapping modulo one day.
pub fn format_clock(minutes: u32) -> String {
    let minutes = minutes % MINUTES_PER_DAY;
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// 12-hour display form, e.g. 780 -> "1:00 PM", 0 -> "12:00 AM".
pub fn format_display(minutes: u32) -> String {
    let minutes = minutes % MINUTES_PER_DAY;
    let hour = minutes / 60;
    let minute = minutes % 60;
    let meridiem = if hour >= 12 { "PM" } else { "AM" };
    let display_hour = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{display_hour}:{minute:02} {meridiem}")
}

/// Minute-of-day a reminder fires at: lead time subtracted from the start,
/// wrapping past midnight into the previous day's time-of-day.
pub fn notify_minute_of_day(start_minutes: u32, lead_minutes: u32) -> u32 {
    (start_minutes as i64 - lead_minutes as i64).rem_euclid(MINUTES_PER_DAY as i64) as u32
}

/// Next calendar instant strictly after `now` that falls on `day` at
/// `minutes` past midnight. A same-day time that has already passed advances
/// exactly seven days.
pub fn next_occurrence(day: DayOfWeek, minutes: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = DayOfWeek::from_chrono(now.weekday());
    let mut day_diff = day.index() as i64 - today.index() as i64;
    if day_diff < 0 {
        day_diff += 7;
    }

    let midnight = now - Duration::seconds(now.num_seconds_from_midnight() as i64)
        - Duration::nanoseconds(now.timestamp_subsec_nanos() as i64);
    let candidate = midnight + Duration::days(day_diff) + Duration::minutes(minutes as i64);
    if candidate <= now {
        candidate + Duration::days(7)
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn parse_clock_accepts_valid_times() {
        assert_eq!(parse_clock("00:00").expect("midnight"), 0);
        assert_eq!(parse_clock("09:05").expect("morning"), 9 * 60 + 5);
        assert_eq!(parse_clock("23:59").expect("last minute"), 1439);
    }

    #[test]
    fn parse_clock_rejects_malformed_input() {
        for value in ["", "9", "24:00", "12:60", "09:00:00", "ab:cd", "9:5:"] {
            match parse_clock(value) {
                Err(InfraError::InvalidTime(raw)) => assert_eq!(raw, value),
                other => panic!("expected InvalidTime for {value:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn format_display_uses_twelve_hour_clock() {
        assert_eq!(format_display(0), "12:00 AM");
        assert_eq!(format_display(9 * 60 + 5), "9:05 AM");
        assert_eq!(format_display(12 * 60), "12:00 PM");
        assert_eq!(format_display(13 * 60 + 30), "1:30 PM");
        assert_eq!(format_display(23 * 60 + 59), "11:59 PM");
    }

    proptest! {
        #[test]
        fn clock_roundtrip(minutes in 0u32..1440u32) {
            prop_assert_eq!(parse_clock(&format_clock(minutes)).expect("roundtrip"), minutes);
        }
    }

    proptest! {
        #[test]
        fn notify_minute_stays_in_range(start in 0u32..1440u32, lead in 0u32..10_000u32) {
            let wrapped = notify_minute_of_day(start, lead);
            prop_assert!(wrapped < MINUTES_PER_DAY);
            prop_assert_eq!(
                wrapped as i64,
                (start as i64 - lead as i64).rem_euclid(MINUTES_PER_DAY as i64)
            );
        }
    }

    #[test]
    fn notify_minute_wraps_past_midnight() {
        // 00:10 start with a 30 minute lead fires at 23:40 the previous day.
        assert_eq!(notify_minute_of_day(10, 30), 23 * 60 + 40);
        assert_eq!(notify_minute_of_day(540, 0), 540);
    }

    #[test]
    fn next_occurrence_same_day_still_upcoming() {
        // Wednesday 10:00 UTC.
        let now = fixed_time("2026-08-05T10:00:00Z");
        let at_eleven = next_occurrence(DayOfWeek::Wednesday, 11 * 60, now);
        assert_eq!(at_eleven, fixed_time("2026-08-05T11:00:00Z"));
    }

    #[test]
    fn next_occurrence_same_day_already_passed_advances_a_week() {
        let now = fixed_time("2026-08-05T10:00:00Z");
        let at_nine = next_occurrence(DayOfWeek::Wednesday, 9 * 60, now);
        assert_eq!(at_nine, fixed_time("2026-08-12T09:00:00Z"));
    }

    #[test]
    fn next_occurrence_exact_now_counts_as_passed() {
        let now = fixed_time("2026-08-05T10:00:00Z");
        let at_ten = next_occurrence(DayOfWeek::Wednesday, 10 * 60, now);
        assert_eq!(at_ten, fixed_time("2026-08-12T10:00:00Z"));
    }

    #[test]
    fn next_occurrence_earlier_weekday_lands_next_week() {
        // Wednesday now, Monday slot.
        let now = fixed_time("2026-08-05T10:00:00Z");
        let monday = next_occurrence(DayOfWeek::Monday, 8 * 60, now);
        assert_eq!(monday, fixed_time("2026-08-10T08:00:00Z"));
    }

    proptest! {
        #[test]
        fn next_occurrence_is_strictly_future_and_matches_inputs(
            day_index in 0usize..7,
            minutes in 0u32..1440u32,
            offset_minutes in 0i64..(14 * 24 * 60),
        ) {
            let now = fixed_time("2026-08-03T00:00:00Z") + Duration::minutes(offset_minutes);
            let day = ALL_DAYS[day_index];
            let instant = next_occurrence(day, minutes, now);

            prop_assert!(instant > now);
            prop_assert!(instant - now <= Duration::days(7));
            prop_assert_eq!(DayOfWeek::from_chrono(instant.weekday()), day);
            prop_assert_eq!(instant.num_seconds_from_midnight(), minutes * 60);
        }
    }
}
