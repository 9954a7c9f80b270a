//! TRR: live position of every realtime trip on the requested routes.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use super::{fmt_date, realtime_age, split_ids, AppContext, Txn};
use crate::realtime::{MatchMode, RealtimeStore, RtStopTime};
use crate::schedule::calendar::parse_yyyymmdd;
use crate::schedule::StopTime;

const ERR_NO_REALTIME: i64 = 801;
const ERR_UNKNOWN_ROUTE: i64 = 802;
const ERR_NO_FEED_TIME: i64 = 803;

pub fn respond(ctx: &AppContext, txn: &Txn, args: &str) -> Value {
    let schedule = &ctx.schedule;
    ctx.gateway.request_entered();
    let Some(store) = ctx.gateway.snapshot() else {
        return txn.error("TRR", ERR_NO_REALTIME);
    };

    let route_ids = split_ids(args);
    if route_ids.iter().any(|route_id| !schedule.routes.contains_key(route_id)) {
        return txn.error("TRR", ERR_UNKNOWN_ROUTE);
    }

    let mut resp = Map::new();
    if store.feed_time().is_none() {
        resp.insert("realtime_age_sec".into(), Value::from("-"));
        return txn.finish("TRR", ERR_NO_FEED_TIME, resp);
    }
    resp.insert("realtime_age_sec".into(), realtime_age(&store, txn.now_utc));

    let mut routes = Vec::new();
    for route_id in &route_ids {
        let route = &schedule.routes[route_id];
        let mut entry = Map::new();
        entry.insert("route_id".into(), Value::from(route_id.clone()));
        entry.insert("route_short_name".into(), Value::from(route.short_name.clone()));
        entry.insert("route_long_name".into(), Value::from(route.long_name.clone()));
        entry.insert("color".into(), Value::from(route.color.clone()));
        entry.insert("text_color".into(), Value::from(route.text_color.clone()));

        let trips: Vec<Value> = store
            .active_trips_for_route(route_id, &schedule.trips)
            .iter()
            .map(|trip_id| Value::Object(trip_entry(ctx, txn, &store, trip_id)))
            .collect();
        entry.insert("trips".into(), Value::from(trips));
        routes.push(Value::Object(entry));
    }
    resp.insert("routes".into(), Value::from(routes));

    txn.finish("TRR", 0, resp)
}

fn trip_entry(ctx: &AppContext, txn: &Txn, store: &RealtimeStore, trip_id: &str) -> Map<String, Value> {
    let schedule = &ctx.schedule;
    let tz = schedule.meta.timezone;

    // The feed may omit the start date entirely; assume today and drop the
    // weekday from the rendered times
    let raw_start_date = store.trip_start_date(trip_id);
    let start_date_missing = raw_start_date.is_empty();
    let start_date: NaiveDate = parse_yyyymmdd(&raw_start_date).unwrap_or(txn.now_agency.date_naive());

    let mut entry = Map::new();
    entry.insert("trip_id".into(), Value::from(trip_id));
    entry.insert(
        "rt_start_date".into(),
        Value::from(if start_date_missing { "-".to_string() } else { fmt_date(start_date) }),
    );
    let start_time = store.trip_start_time(trip_id);
    entry.insert(
        "rt_start_time".into(),
        Value::from(if start_time.is_empty() { "-".to_string() } else { start_time }),
    );
    entry.insert("vehicle".into(), Value::from(store.vehicle_label(trip_id)));

    let is_supplemental = !schedule.trips.contains_key(trip_id);
    if let Some(trip) = schedule.trips.get(trip_id) {
        entry.insert("headsign".into(), Value::from(trip.headsign.clone()));
        entry.insert("short_name".into(), Value::from(trip.short_name.clone()));
    } else {
        // Added trips have nothing static; point at their last known stop
        let terminus = store
            .final_stop_of_added_trip(trip_id)
            .map(|stop_id| {
                schedule.stop(&stop_id).map(|s| s.name.clone()).unwrap_or_else(|| stop_id.clone())
            })
            .unwrap_or_else(|| "-".to_string());
        entry.insert("headsign".into(), Value::from(terminus));
        entry.insert("short_name".into(), Value::from("*SPLM*"));
    }

    entry.insert("skipped".into(), Value::from(false));
    entry.insert("arrive".into(), Value::from("-"));
    entry.insert("depart".into(), Value::from("-"));
    entry.insert("next_stop_id".into(), Value::from("-"));
    entry.insert("next_stop_name".into(), Value::from("-"));
    entry.insert("next_stop_parent".into(), Value::from("-"));

    let empty: Vec<StopTime> = Vec::new();
    let trip_times = schedule.stop_times.get(trip_id).unwrap_or(&empty);
    let rt_stops = store.fill_stop_times_for_trip(MatchMode::Reconcile, trip_id, tz, start_date, trip_times);

    for rtst in &rt_stops {
        if !next_stop_candidate(rtst, txn) {
            continue;
        }

        entry.insert("next_stop_id".into(), Value::from(rtst.stop_id.clone()));
        match schedule.stop(&rtst.stop_id) {
            Some(stop) => {
                entry.insert("next_stop_name".into(), Value::from(stop.name.clone()));
                entry.insert("next_stop_parent".into(), Value::from(stop.parent_station.clone()));
            }
            None => {
                entry.insert(
                    "next_stop_name".into(),
                    Value::from(format!("StopID: {}", rtst.stop_id)),
                );
            }
        }

        // Pull the pickup/drop-off flags and any stop-specific headsign off
        // the matching static stop time
        let mut drop_off: i64 = -1;
        let mut pickup: i64 = -1;
        let mut matched_sequence: Option<u32> = None;
        let mut stop_headsign = String::new();
        for st in trip_times {
            let matched = if store.loosened() {
                st.stop_id == rtst.stop_id
            } else {
                Some(st.stop_sequence) == rtst.stop_sequence
            };
            if matched {
                drop_off = i64::from(st.drop_off_type);
                pickup = i64::from(st.pickup_type);
                matched_sequence = Some(st.stop_sequence);
                if !st.stop_headsign.is_empty() {
                    stop_headsign = st.stop_headsign.clone();
                }
                break;
            }
        }
        if !store.loosened() && rtst.stop_sequence != matched_sequence && !is_supplemental {
            continue;
        }

        entry.insert("drop_off_type".into(), Value::from(drop_off));
        entry.insert("pickup_type".into(), Value::from(pickup));
        if !stop_headsign.is_empty() {
            entry.insert("headsign".into(), Value::from(stop_headsign));
        }
        entry.insert("skipped".into(), Value::from(rtst.skipped));

        let format = match (start_date_missing, txn.clock_12h) {
            (true, true) => "%-I:%M%P",
            (true, false) => "%H:%M",
            (false, true) => "%a %-I:%M%P",
            (false, false) => "%a %H:%M",
        };
        if let Some(arr) = rtst.arrival {
            entry.insert(
                "arrive".into(),
                Value::from(arr.with_timezone(&tz).format(format).to_string()),
            );
            entry.insert("arrive_based".into(), Value::from(rtst.arr_basis.as_char().to_string()));
        }
        if let Some(dep) = rtst.departure {
            entry.insert(
                "depart".into(),
                Value::from(dep.with_timezone(&tz).format(format).to_string()),
            );
            entry.insert("depart_based".into(), Value::from(rtst.dep_basis.as_char().to_string()));
        }
        break;
    }

    entry
}

/// A stop still ahead of the vehicle: not yet departed, or (for
/// arrival-only data) within half a minute of arriving.
fn next_stop_candidate(rtst: &RtStopTime, txn: &Txn) -> bool {
    match (rtst.arrival, rtst.departure) {
        (_, Some(dep)) => txn.now_utc <= dep,
        (Some(arr), None) => txn.now_utc <= arr + chrono::Duration::seconds(30),
        (None, None) => false,
    }
}
