//! Response builders, one per protocol verb family, plus the shared
//! request plumbing every response carries.

pub mod between;
pub mod end_to_end;
pub mod route_rt;
pub mod routes;
pub mod rt_product;
pub mod rt_status;
pub mod rt_trips;
pub mod station;
pub mod status;
pub mod stops_no_trips;
pub mod stops_served;
pub mod trip_schedule;
pub mod trips_serving_route;
pub mod trips_serving_stop;
pub mod upcoming;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};

use crate::realtime::RealtimeGateway;
use crate::reconcile::TripRecord;
use crate::schedule::time::NOON_SECS;
use crate::schedule::{ScheduleStore, NO_TIME};

/// Long-lived server state every request reads.
pub struct AppContext {
    pub schedule: Arc<ScheduleStore>,
    pub gateway: Arc<RealtimeGateway>,
    pub clock_12h: bool,
    /// 0 = unbounded
    pub nex_trips_per_route: u32,
    pub hide_terminating: bool,
    pub worker_limit: usize,
    pub server_started: DateTime<Utc>,
    /// Fixed "now" for debugging; every request sees this instant
    pub frozen_now: Option<DateTime<Tz>>,
    handled_requests: Mutex<u64>,
}

impl AppContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schedule: Arc<ScheduleStore>,
        gateway: Arc<RealtimeGateway>,
        clock_12h: bool,
        nex_trips_per_route: u32,
        hide_terminating: bool,
        worker_limit: usize,
        frozen_now: Option<DateTime<Tz>>,
    ) -> Self {
        Self {
            schedule,
            gateway,
            clock_12h,
            nex_trips_per_route,
            hide_terminating,
            worker_limit,
            server_started: Utc::now(),
            frozen_now,
            handled_requests: Mutex::new(0),
        }
    }

    pub fn handled_requests(&self) -> u64 {
        self.handled_requests.lock().map(|g| *g).unwrap_or(0)
    }

    /// Start a transaction: counts it and pins its view of "now".
    pub fn begin_request(&self) -> Txn {
        if let Ok(mut guard) = self.handled_requests.lock() {
            *guard += 1;
        }
        let tz = self.schedule.meta.timezone;
        let (now_utc, now_agency) = match self.frozen_now {
            Some(frozen) => (frozen.with_timezone(&Utc), frozen),
            None => {
                let now = Utc::now();
                (now, now.with_timezone(&tz))
            }
        };
        Txn {
            now_utc,
            now_agency,
            clock_12h: self.clock_12h,
            started: std::time::Instant::now(),
        }
    }
}

/// One transaction's pinned clock and timer.
pub struct Txn {
    pub now_utc: DateTime<Utc>,
    pub now_agency: DateTime<Tz>,
    pub clock_12h: bool,
    started: std::time::Instant,
}

impl Txn {
    /// Attach the protocol fields every response carries and seal the object.
    pub fn finish(&self, verb: &str, error: i64, mut resp: Map<String, Value>) -> Value {
        resp.insert("message_type".into(), Value::from(verb));
        resp.insert("error".into(), Value::from(error));
        resp.insert("message_time".into(), Value::from(fmt_timestamp(&self.now_agency)));
        resp.insert(
            "proc_time_ms".into(),
            Value::from(self.started.elapsed().as_millis() as u64),
        );
        Value::Object(resp)
    }

    pub fn error(&self, verb: &str, error: i64) -> Value {
        self.finish(verb, error, Map::new())
    }
}

// --- shared formatting ---

pub fn fmt_timestamp(dt: &DateTime<Tz>) -> String {
    dt.format("%d-%b-%Y %H:%M:%S %Z").to_string()
}

pub fn fmt_timestamp_clocked(dt: &DateTime<Tz>, clock_12h: bool) -> String {
    if clock_12h {
        dt.format("%d-%b-%Y %-I:%M:%S %p %Z").to_string()
    } else {
        fmt_timestamp(dt)
    }
}

/// Weekday-qualified stop time, e.g. `"Mon 08:15"` or `"Mon 8:15am"`.
pub fn fmt_day_time(dt: &DateTime<Tz>, clock_12h: bool) -> String {
    if clock_12h {
        dt.format("%a %-I:%M%P").to_string()
    } else {
        dt.format("%a %H:%M").to_string()
    }
}

pub fn fmt_opt_day_time(dt: Option<&DateTime<Tz>>, clock_12h: bool) -> String {
    dt.map(|t| fmt_day_time(t, clock_12h)).unwrap_or_else(|| "-".to_string())
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

pub fn fmt_opt_date(date: Option<NaiveDate>) -> String {
    date.map(fmt_date).unwrap_or_else(|| "__-___-____".to_string())
}

pub fn fmt_date_compact(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%d%b%Y").to_string()).unwrap_or_default()
}

pub fn fmt_service_date(date: NaiveDate) -> String {
    date.format("%a %d-%b-%Y").to_string()
}

/// Bare clock rendering of a schedule offset, wrapped into one day
/// (a 25:10 stop prints as 01:10). `"-"` when untimed.
pub fn fmt_clock(offset: i32) -> String {
    if offset == NO_TIME {
        return "-".to_string();
    }
    let clock = (offset + NOON_SECS).rem_euclid(86_400);
    format!("{:02}:{:02}", clock / 3600, (clock % 3600) / 60)
}

pub fn fmt_static_modified(schedule: &ScheduleStore) -> String {
    schedule
        .meta
        .static_modified
        .map(|dt| fmt_timestamp(&dt.with_timezone(&schedule.meta.timezone)))
        .unwrap_or_else(|| "-".to_string())
}

/// Age of the active realtime buffer, or `"-"` when it carries no
/// generation timestamp.
pub fn realtime_age(store: &crate::realtime::RealtimeStore, now_utc: DateTime<Utc>) -> Value {
    match store.feed_time() {
        Some(feed_time) => Value::from((now_utc - feed_time).num_seconds()),
        None => Value::from("-"),
    }
}

// --- shared argument handling ---

/// Split off the first space-delimited token.
pub fn take_first_token(args: &str) -> (&str, &str) {
    match args.find(' ') {
        Some(pos) => (&args[..pos], args[pos + 1..].trim()),
        None => (args, ""),
    }
}

/// `|`-separated id list; a bare id is a one-element list.
pub fn split_ids(args: &str) -> Vec<String> {
    args.split('|').map(|s| s.to_string()).collect()
}

/// Day token: D (today), Y, T, or a literal ddMMMyyyy date.
pub fn parse_day_token(token: &str, today: NaiveDate) -> Option<NaiveDate> {
    match token.to_ascii_uppercase().as_str() {
        "D" => Some(today),
        "Y" => today.pred_opt(),
        "T" => today.succ_opt(),
        _ => NaiveDate::parse_from_str(token, "%d%b%Y").ok(),
    }
}

/// Non-negative minute count; anything else is rejected.
pub fn parse_minutes(token: &str) -> Option<i64> {
    token.parse::<i64>().ok().filter(|m| *m >= 0)
}

/// One trip entry of an upcoming-service response. Shared by the NEX/NCF
/// and connection-search renderings.
pub fn fill_trip_data(
    record: &TripRecord,
    short_name: &str,
    clock_12h: bool,
) -> Map<String, Value> {
    let mut item = Map::new();
    item.insert("trip_id".into(), Value::from(record.trip_id.clone()));
    item.insert("short_name".into(), Value::from(short_name));
    item.insert("wait_time_sec".into(), Value::from(record.wait_time_sec));
    item.insert("headsign".into(), Value::from(record.headsign.clone()));
    item.insert("pickup_type".into(), Value::from(record.pickup_type));
    item.insert("drop_off_type".into(), Value::from(record.drop_off_type));
    item.insert("trip_begins".into(), Value::from(record.trip_begins));
    item.insert("trip_terminates".into(), Value::from(record.trip_terminates));
    item.insert(
        "dep_time".into(),
        Value::from(fmt_opt_day_time(record.sched_departure.as_ref(), clock_12h)),
    );
    item.insert(
        "arr_time".into(),
        Value::from(fmt_opt_day_time(record.sched_arrival.as_ref(), clock_12h)),
    );

    if record.realtime {
        let mut rt = Map::new();
        rt.insert("status".into(), Value::from(record.status.code()));
        rt.insert("stop_status".into(), Value::from(record.stop_status.as_str()));
        rt.insert("offset_seconds".into(), Value::from(record.offset_seconds));
        rt.insert("vehicle".into(), Value::from(record.vehicle.clone()));
        rt.insert(
            "actual_arrival".into(),
            Value::from(fmt_opt_day_time(record.rt_arrival.as_ref(), clock_12h)),
        );
        rt.insert(
            "actual_departure".into(),
            Value::from(fmt_opt_day_time(record.rt_departure.as_ref(), clock_12h)),
        );
        item.insert("realtime_data".into(), Value::Object(rt));
    }
    item
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    #[test]
    fn protocol_fields_on_every_response() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = txn.finish("SDS", 0, Map::new());
        let obj = value.as_object().unwrap();
        assert_eq!(obj["message_type"], "SDS");
        assert_eq!(obj["error"], 0);
        assert!(obj["message_time"].as_str().unwrap().contains("2026"));
        assert!(obj["proc_time_ms"].is_number());
        assert_eq!(ctx.handled_requests(), 1);
    }

    #[test]
    fn frozen_clock_pins_every_transaction() {
        let ctx = testutil::context_with_stores();
        let a = ctx.begin_request();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = ctx.begin_request();
        assert_eq!(a.now_utc, b.now_utc);
        assert_eq!(ctx.handled_requests(), 2);
    }

    #[test]
    fn day_tokens() {
        let today = chrono::NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert_eq!(parse_day_token("D", today), Some(today));
        assert_eq!(parse_day_token("y", today), chrono::NaiveDate::from_ymd_opt(2026, 5, 31));
        assert_eq!(parse_day_token("T", today), chrono::NaiveDate::from_ymd_opt(2026, 6, 2));
        assert_eq!(
            parse_day_token("04Jul2026", today),
            chrono::NaiveDate::from_ymd_opt(2026, 7, 4)
        );
        assert_eq!(parse_day_token("not-a-day", today), None);
    }

    #[test]
    fn minute_parsing_rejects_negatives() {
        assert_eq!(parse_minutes("30"), Some(30));
        assert_eq!(parse_minutes("0"), Some(0));
        assert_eq!(parse_minutes("-5"), None);
        assert_eq!(parse_minutes("abc"), None);
    }

    #[test]
    fn id_splitting() {
        assert_eq!(split_ids("S1"), vec!["S1"]);
        assert_eq!(split_ids("S1|S2|S3"), vec!["S1", "S2", "S3"]);
    }

    #[test]
    fn clock_formatting_wraps_past_midnight() {
        assert_eq!(fmt_clock(crate::schedule::time::offset_from_hhmmss("08:30:00")), "08:30");
        assert_eq!(fmt_clock(crate::schedule::time::offset_from_hhmmss("25:10:00")), "01:10");
        assert_eq!(fmt_clock(NO_TIME), "-");
    }

    #[test]
    fn day_time_formats() {
        let dt = New_York.with_ymd_and_hms(2026, 6, 1, 14, 5, 0).single().unwrap();
        assert_eq!(fmt_day_time(&dt, false), "Mon 14:05");
        assert_eq!(fmt_day_time(&dt, true), "Mon 2:05pm");
        assert_eq!(fmt_opt_day_time(None, false), "-");
    }
}
