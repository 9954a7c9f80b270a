//! Noon-anchored schedule time arithmetic.
//!
//! All static schedule times are signed second offsets from **local noon** of
//! their service date. Anchoring at noon instead of midnight keeps a nominal
//! clock time stable across daylight-saving transitions, which happen in the
//! early-morning hours. Times of `24:00:00` and beyond are legal GTFS and
//! come out as offsets >= 43200.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone};
use chrono_tz::Tz;

/// Sentinel for an absent arrival/departure time.
pub const NO_TIME: i32 = i32::MAX;

/// Seconds between midnight and local noon.
pub const NOON_SECS: i32 = 43_200;

/// Parse an `hh:mm:ss` schedule time into a local-noon offset.
/// Hours may exceed 23 for service running past midnight. Empty or
/// unparseable input yields [`NO_TIME`].
pub fn offset_from_hhmmss(hhmmss: &str) -> i32 {
    let text = hhmmss.trim();
    if text.is_empty() {
        return NO_TIME;
    }
    let mut parts = text.split(':');
    let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return NO_TIME;
    };
    let (Ok(h), Ok(m), Ok(s)) = (h.parse::<i32>(), m.parse::<i32>(), s.parse::<i32>()) else {
        return NO_TIME;
    };
    if h < 0 || !(0..60).contains(&m) || !(0..60).contains(&s) {
        return NO_TIME;
    }
    h * 3600 + m * 60 + s - NOON_SECS
}

/// Render a local-noon offset back to `hh:mm:ss` (hours may exceed 23).
pub fn to_hhmmss(offset: i32) -> String {
    let clock = offset + NOON_SECS;
    format!("{:02}:{:02}:{:02}", clock / 3600, (clock % 3600) / 60, clock % 60)
}

/// A stop with an offset at or past 43200 serves the civil day after its
/// service date.
pub fn is_next_actual_day(offset: i32) -> bool {
    offset >= NOON_SECS
}

/// Local noon of a service date in the agency timezone.
///
/// Noon never falls inside a DST gap for real-world agency zones; should a
/// zone ever skip noon, the UTC interpretation stands in so conversion stays
/// total.
pub fn local_noon(service_date: NaiveDate, tz: Tz) -> DateTime<Tz> {
    let noon = service_date.and_hms_opt(12, 0, 0).expect("valid wall-clock time");
    match tz.from_local_datetime(&noon) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz.from_utc_datetime(&noon),
    }
}

/// Absolute instant of a schedule offset on a service date, in the agency
/// timezone. `None` for [`NO_TIME`].
pub fn to_instant(service_date: NaiveDate, offset: i32, tz: Tz) -> Option<DateTime<Tz>> {
    if offset == NO_TIME {
        return None;
    }
    Some(local_noon(service_date, tz) + Duration::seconds(i64::from(offset)))
}

/// The three service days that can put trips at a stop "today": after-midnight
/// trips belong to yesterday's service date, and a long look-ahead can reach
/// into tomorrow's.
pub fn service_window(today: NaiveDate) -> [NaiveDate; 3] {
    [
        today.pred_opt().unwrap_or(today),
        today,
        today.succ_opt().unwrap_or(today),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use chrono_tz::America::New_York;

    #[test]
    fn parse_regular_times() {
        assert_eq!(offset_from_hhmmss("12:00:00"), 0);
        assert_eq!(offset_from_hhmmss("08:00:00"), -4 * 3600);
        assert_eq!(offset_from_hhmmss("13:30:15"), 5415);
        assert_eq!(offset_from_hhmmss("00:00:00"), -NOON_SECS);
    }

    #[test]
    fn parse_after_midnight_times() {
        assert_eq!(offset_from_hhmmss("24:00:00"), NOON_SECS);
        assert_eq!(offset_from_hhmmss("25:10:00"), 46_800 + 600);
        assert!(is_next_actual_day(offset_from_hhmmss("24:00:00")));
        assert!(!is_next_actual_day(offset_from_hhmmss("23:59:59")));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(offset_from_hhmmss(""), NO_TIME);
        assert_eq!(offset_from_hhmmss("   "), NO_TIME);
        assert_eq!(offset_from_hhmmss("8:30"), NO_TIME);
        assert_eq!(offset_from_hhmmss("8:30:00:00"), NO_TIME);
        assert_eq!(offset_from_hhmmss("aa:bb:cc"), NO_TIME);
        assert_eq!(offset_from_hhmmss("08:61:00"), NO_TIME);
    }

    #[test]
    fn hhmmss_round_trip() {
        for clock_secs in [0, 1, 43_199, 43_200, 86_399, 86_400, 91_800, 172_800] {
            let offset = clock_secs - NOON_SECS;
            assert_eq!(offset_from_hhmmss(&to_hhmmss(offset)), offset);
        }
        assert_eq!(to_hhmmss(46_800 + 600), "25:10:00");
    }

    #[test]
    fn instant_on_standard_day() {
        // 2026-01-15 is EST (UTC-5): 08:00 local = 13:00 UTC
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let dt = to_instant(date, offset_from_hhmmss("08:00:00"), New_York).unwrap();
        assert_eq!(dt.naive_utc().hour(), 13);
    }

    #[test]
    fn instant_is_dst_immune_on_spring_forward() {
        // 2026-03-08: US clocks jump 02:00 -> 03:00. A 08:00 stop must still
        // read 08:00 on the wall clock even though the day is 23 hours long.
        let date = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let dt = to_instant(date, offset_from_hhmmss("08:00:00"), New_York).unwrap();
        assert_eq!(dt.hour(), 8);
        // EDT by 08:00, so 12:00 UTC
        assert_eq!(dt.naive_utc().hour(), 12);
    }

    #[test]
    fn instant_is_dst_immune_on_fall_back() {
        // 2026-11-01: US clocks fall back 02:00 -> 01:00 (25-hour day).
        let date = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        let dt = to_instant(date, offset_from_hhmmss("08:00:00"), New_York).unwrap();
        assert_eq!(dt.hour(), 8);
        // back on EST by 08:00, so 13:00 UTC
        assert_eq!(dt.naive_utc().hour(), 13);
    }

    #[test]
    fn after_midnight_instant_lands_on_next_civil_day() {
        let date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let dt = to_instant(date, offset_from_hhmmss("25:10:00"), New_York).unwrap();
        assert_eq!(dt.date_naive(), NaiveDate::from_ymd_opt(2026, 6, 2).unwrap());
        assert_eq!(dt.hour(), 1);
        assert_eq!(dt.minute(), 10);
    }

    #[test]
    fn no_time_has_no_instant() {
        let date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert!(to_instant(date, NO_TIME, New_York).is_none());
    }

    #[test]
    fn window_brackets_the_day() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let window = service_window(today);
        assert_eq!(window[0], NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
        assert_eq!(window[1], today);
        assert_eq!(window[2], NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
    }
}
