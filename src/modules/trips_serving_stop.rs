//! TSS / TSD: trips calling at a stop, grouped by route, optionally
//! filtered to one day.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use super::trips_serving_route::is_dst;
use super::{fmt_clock, fmt_date_compact, fmt_service_date, AppContext, Txn};
use crate::schedule::time::to_instant;
use crate::schedule::{ScheduleStore, StopTime};

const ERR_UNKNOWN_STOP: i64 = 301;

pub fn respond(ctx: &AppContext, txn: &Txn, stop_id: &str, only_date: Option<NaiveDate>) -> Value {
    let schedule = &ctx.schedule;
    let Some(stop) = schedule.stop(stop_id) else {
        return txn.error("TSS", ERR_UNKNOWN_STOP);
    };

    let mut resp = Map::new();
    resp.insert("stop_id".into(), Value::from(stop_id));
    resp.insert("stop_name".into(), Value::from(stop.name.clone()));
    resp.insert("stop_desc".into(), Value::from(stop.desc.clone()));
    resp.insert("parent_sta".into(), Value::from(stop.parent_station.clone()));
    resp.insert(
        "service_date".into(),
        Value::from(only_date.map(fmt_service_date).unwrap_or_default()),
    );

    let mut route_ids: Vec<&String> = stop.trips_by_route.keys().collect();
    route_ids.sort();

    let mut routes = Vec::new();
    for route_id in route_ids {
        let mut entry = Map::new();
        entry.insert("route_id".into(), Value::from(route_id.clone()));
        if let Some(route) = schedule.routes.get(route_id) {
            entry.insert("route_short_name".into(), Value::from(route.short_name.clone()));
            entry.insert("route_long_name".into(), Value::from(route.long_name.clone()));
        }

        let mut trips = Vec::new();
        for visit in &stop.trips_by_route[route_id] {
            let Some(trip) = schedule.trips.get(&visit.trip_id) else {
                continue;
            };
            if let Some(date) = only_date {
                if !schedule.calendar.running(&trip.service_id, date) {
                    continue;
                }
            }
            let Some(st) = schedule
                .stop_times
                .get(&visit.trip_id)
                .and_then(|times| times.get(visit.stop_index))
            else {
                continue;
            };
            trips.push(Value::Object(unified_trip_details(
                schedule,
                &visit.trip_id,
                visit.stop_index,
                st,
                only_date,
            )));
        }
        entry.insert("trips".into(), Value::from(trips));
        routes.push(Value::Object(entry));
    }
    resp.insert("routes".into(), Value::from(routes));

    txn.finish("TSS", 0, resp)
}

/// The per-trip details shared by the trips-at-stop listings: schedule
/// identity, service pattern, and the stop's own times.
fn unified_trip_details(
    schedule: &ScheduleStore,
    trip_id: &str,
    stop_index: usize,
    st: &StopTime,
    service_date: Option<NaiveDate>,
) -> Map<String, Value> {
    let calendar = &schedule.calendar;
    let service_id = schedule
        .trips
        .get(trip_id)
        .map(|t| t.service_id.clone())
        .unwrap_or_default();

    let mut entry = Map::new();
    entry.insert("trip_id".into(), Value::from(trip_id));
    entry.insert("headsign".into(), Value::from(schedule.headsign_at(trip_id, stop_index)));
    entry.insert("drop_off_type".into(), Value::from(st.drop_off_type));
    entry.insert("pickup_type".into(), Value::from(st.pickup_type));
    entry.insert("service_id".into(), Value::from(service_id.clone()));
    entry.insert(
        "svc_start_date".into(),
        Value::from(fmt_date_compact(calendar.start_date(&service_id))),
    );
    entry.insert(
        "svc_end_date".into(),
        Value::from(fmt_date_compact(calendar.end_date(&service_id))),
    );
    entry.insert(
        "operate_days_condensed".into(),
        Value::from(calendar.condensed_days(&service_id)),
    );
    entry.insert(
        "supplements_other_days".into(),
        Value::from(calendar.has_added_dates(&service_id)),
    );
    entry.insert(
        "exceptions_present".into(),
        Value::from(calendar.has_removed_dates(&service_id)),
    );

    match service_date {
        None => {
            entry.insert("arr_time".into(), Value::from(fmt_clock(st.arrival)));
            entry.insert("dep_time".into(), Value::from(fmt_clock(st.departure)));
        }
        Some(date) => {
            // A concrete day gets real instants so DST shows through
            let tz = schedule.meta.timezone;
            match to_instant(date, st.arrival, tz) {
                Some(arr) => {
                    entry.insert("arr_time".into(), Value::from(arr.format("%H:%M").to_string()));
                    entry.insert("dst_on".into(), Value::from(is_dst(&arr)));
                }
                None => {
                    entry.insert("arr_time".into(), Value::from("-"));
                }
            }
            match to_instant(date, st.departure, tz) {
                Some(dep) => {
                    entry.insert("dep_time".into(), Value::from(dep.format("%H:%M").to_string()));
                    entry.insert("dst_on".into(), Value::from(is_dst(&dep)));
                }
                None => {
                    entry.insert("dep_time".into(), Value::from("-"));
                }
            }
        }
    }

    let trip_len = schedule.stop_times.get(trip_id).map(|t| t.len()).unwrap_or(0);
    entry.insert("trip_begins".into(), Value::from(stop_index == 0));
    entry.insert(
        "trip_terminates".into(),
        Value::from(trip_len > 0 && stop_index == trip_len - 1),
    );
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil;

    #[test]
    fn unknown_stop_is_301() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, "nope", None);
        assert_eq!(testutil::obj(&value)["error"], 301);
    }

    #[test]
    fn trips_grouped_by_route_with_stop_times() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, "B", None);
        let obj = testutil::obj(&value);
        assert_eq!(obj["error"], 0);
        assert_eq!(obj["stop_name"], "Stop B");
        let routes = obj["routes"].as_array().unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0]["route_id"], "R1");
        let trips = routes[0]["trips"].as_array().unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0]["trip_id"], "T1");
        assert_eq!(trips[0]["arr_time"], "08:00");
        assert_eq!(trips[0]["trip_begins"], false);
        assert_eq!(trips[0]["trip_terminates"], false);
    }

    #[test]
    fn dated_query_stamps_dst_flag() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        // June in New York is daylight-saving time
        let date = chrono::NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let value = respond(&ctx, &txn, "B", Some(date));
        let obj = testutil::obj(&value);
        let trips = obj["routes"][0]["trips"].as_array().unwrap();
        assert_eq!(trips[0]["dst_on"], true);

        // January is standard time
        let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let value = respond(&ctx, &txn, "B", Some(date));
        let obj = testutil::obj(&value);
        let trips = obj["routes"][0]["trips"].as_array().unwrap();
        assert_eq!(trips[0]["dst_on"], false);
    }
}
