//! EES / EER / ETS / ETR: multi-leg trip composition.
//!
//! Each leg reconciles its origin and destination stops, intersects on trip
//! id, and chains onto earlier legs under per-leg minimum/maximum transfer
//! windows. ETS/ETR seed from a trip already underway instead of an origin
//! stop.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use serde_json::{Map, Value};

use super::{
    fill_trip_data, fmt_static_modified, parse_minutes, realtime_age, split_ids, take_first_token,
    AppContext, Txn,
};
use crate::realtime::RealtimeStore;
use crate::reconcile::{Reconciler, TripRecord, TripStatus};
use crate::schedule::ScheduleStore;

const ERR_ARG_COUNT: i64 = 901;
const ERR_BAD_CONNECTION_TIME: i64 = 902;
const ERR_UNKNOWN_STOP: i64 = 903;
const ERR_CONNECTION_SHAPE: i64 = 904;
const ERR_MAX_BELOW_MIN: i64 = 905;
const ERR_CONNECTION_PARSE: i64 = 906;

/// `m` or `m-M` transfer window in minutes; `M == 0` leaves the window
/// open-ended above.
fn parse_connection(token: &str) -> Result<(u32, u32), i64> {
    let parts: Vec<&str> = token.split('-').collect();
    match parts.len() {
        1 => {
            let min: u32 = parts[0].parse().map_err(|_| ERR_BAD_CONNECTION_TIME)?;
            Ok((min, 0))
        }
        2 => {
            let min: u32 = parts[0].parse().map_err(|_| ERR_BAD_CONNECTION_TIME)?;
            let max: u32 = parts[1].parse().map_err(|_| ERR_BAD_CONNECTION_TIME)?;
            if max < min {
                return Err(ERR_MAX_BELOW_MIN);
            }
            Ok((min, max))
        }
        n if n > 2 => Err(ERR_CONNECTION_SHAPE),
        _ => Err(ERR_CONNECTION_PARSE),
    }
}

pub fn respond(ctx: &AppContext, txn: &Txn, verb: &str, args: &str) -> Value {
    let realtime_only = matches!(verb, "EER" | "ETR");
    let trip_mode = matches!(verb, "ETS" | "ETR");
    let schedule = &ctx.schedule;

    let (minutes_token, rest) = take_first_token(args);
    let Some(minutes) = parse_minutes(minutes_token) else {
        return txn.error(verb, ERR_BAD_CONNECTION_TIME);
    };
    let argv = split_ids(rest);
    let n = argv.len();
    if n != 2 && (n < 2 || (n - 2) % 3 != 0) {
        return txn.error(verb, ERR_ARG_COUNT);
    }
    for (i, arg) in argv.iter().enumerate() {
        if i >= 2 && (i - 2) % 3 == 0 {
            if let Err(code) = parse_connection(arg) {
                return txn.error(verb, code);
            }
        } else {
            if i == 0 && trip_mode {
                // The leading token is a trip id, not a stop
                continue;
            }
            if schedule.stop(arg).is_none() && !schedule.is_parent_station(arg) {
                return txn.error(verb, ERR_UNKNOWN_STOP);
            }
        }
    }

    ctx.gateway.request_entered();
    let snapshot = ctx.gateway.snapshot();
    let rt = snapshot.as_deref();

    let mut resp = Map::new();
    resp.insert("static_data_modif".into(), Value::from(fmt_static_modified(schedule)));
    if let Some(store) = &snapshot {
        resp.insert("realtime_age_sec".into(), realtime_age(store, txn.now_utc));
    }

    // ETS/ETR: locate the in-progress trip's record at its handoff stop
    let mut current_trip: Option<TripRecord> = None;
    if trip_mode {
        let routes = Reconciler::new(
            schedule.expand_stop_id(&argv[1]),
            rt,
            txn.now_agency.date_naive(),
            txn.now_agency,
            minutes,
            schedule,
        )
        .trips_by_route();
        'search: for route in routes.values() {
            for record in &route.trips {
                if record.trip_id == argv[0] {
                    current_trip = Some(record.clone());
                    break 'search;
                }
            }
        }
    }

    let mut candidates: Vec<Vec<TripRecord>> = Vec::new();
    let mut dead: HashSet<usize> = HashSet::new();

    // Leg table: (transfer window, origin, destination) per leg. The seed
    // leg of a trip-in-progress query constrains on the current trip's
    // arrival plus its transfer window.
    let base = if trip_mode { 3 } else { 0 };
    let mut seed_window: Option<(DateTime<Tz>, Option<DateTime<Tz>>)> = None;
    let mut legs: Vec<((u32, u32), String, String)> = Vec::new();
    if trip_mode {
        if n > 2 {
            let window = parse_connection(&argv[2]).unwrap_or((0, 0));
            if let Some(current) = &current_trip {
                if let Some(arrival) = current.rt_arrival.or(current.sched_arrival) {
                    let earliest = arrival + Duration::minutes(i64::from(window.0));
                    let latest = (window.1 != 0)
                        .then(|| arrival + Duration::minutes(i64::from(window.1)));
                    seed_window = Some((earliest, latest));
                }
            }
            legs.push((window, argv[3].clone(), argv[4].clone()));
        }
    } else {
        legs.push(((0, 0), argv[0].clone(), argv[1].clone()));
    }
    let mut next = base + 2;
    while next + 2 < n {
        match parse_connection(&argv[next]) {
            Ok(window) => legs.push((window, argv[next + 1].clone(), argv[next + 2].clone())),
            Err(code) => return txn.error(verb, code),
        }
        next += 3;
    }

    for (leg_num, (window, origin, destination)) in legs.iter().enumerate() {
        fill_leg(
            schedule,
            rt,
            txn,
            minutes,
            leg_num,
            if leg_num == 0 { seed_window } else { None },
            *window,
            origin,
            destination,
            realtime_only,
            &mut candidates,
            &mut dead,
        );
    }

    // Every stop a surviving journey touches, for client-side labeling
    let mut stop_ids: BTreeSet<String> = BTreeSet::new();
    if let Some(current) = &current_trip {
        stop_ids.insert(current.stop_id.clone());
    }
    for (idx, journey) in candidates.iter().enumerate() {
        if dead.contains(&idx) {
            continue;
        }
        for record in journey {
            stop_ids.insert(record.stop_id.clone());
        }
    }
    let mut stops = Map::new();
    for stop_id in stop_ids {
        let mut entry = Map::new();
        if let Some(stop) = schedule.stop(&stop_id) {
            entry.insert("stop_name".into(), Value::from(stop.name.clone()));
            entry.insert("stop_desc".into(), Value::from(stop.desc.clone()));
        }
        stops.insert(stop_id, Value::Object(entry));
    }
    resp.insert("stops".into(), Value::Object(stops));

    let render = |record: &TripRecord| -> Value {
        let short_name = schedule
            .trips
            .get(&record.trip_id)
            .map(|t| t.short_name.clone())
            .unwrap_or_default();
        let mut item = fill_trip_data(record, &short_name, txn.clock_12h);
        item.insert("stop_id".into(), Value::from(record.stop_id.clone()));
        item.insert(
            "route_id".into(),
            Value::from(
                schedule.trips.get(&record.trip_id).map(|t| t.route_id.clone()).unwrap_or_default(),
            ),
        );
        Value::Object(item)
    };

    let journeys: Vec<Value> = candidates
        .iter()
        .enumerate()
        .filter(|(idx, _)| !dead.contains(idx))
        .map(|(_, journey)| Value::from(journey.iter().map(render).collect::<Vec<Value>>()))
        .collect();
    resp.insert("trips".into(), Value::from(journeys));

    if trip_mode {
        match &current_trip {
            Some(current) => {
                resp.insert("current_trip".into(), render(current));
            }
            None => {
                resp.insert("current_trip".into(), Value::Null);
            }
        }
    }

    txn.finish(verb, 0, resp)
}

/// Reconcile one leg's endpoints and seed or extend the journeys.
#[allow(clippy::too_many_arguments)]
fn fill_leg(
    schedule: &ScheduleStore,
    rt: Option<&RealtimeStore>,
    txn: &Txn,
    minutes: i64,
    leg_num: usize,
    seed_window: Option<(DateTime<Tz>, Option<DateTime<Tz>>)>,
    window: (u32, u32),
    origin: &str,
    destination: &str,
    realtime_only: bool,
    candidates: &mut Vec<Vec<TripRecord>>,
    dead: &mut HashSet<usize>,
) {
    let date = txn.now_agency.date_naive();
    let ori_routes = Reconciler::new(
        schedule.expand_stop_id(origin),
        rt,
        date,
        txn.now_agency,
        minutes,
        schedule,
    )
    .trips_by_route();
    let des_routes = Reconciler::new(
        schedule.expand_stop_id(destination),
        rt,
        date,
        txn.now_agency,
        minutes,
        schedule,
    )
    .trips_by_route();

    // Pairs that ride one trip from origin to destination: same trip and
    // service date, boarding allowed, alighting allowed, origin strictly
    // before destination, and neither end skipped or cancelled
    let mut pairs: Vec<(&TripRecord, &TripRecord)> = Vec::new();
    let mut route_ids: Vec<&String> = ori_routes.keys().collect();
    route_ids.sort();
    for route_id in route_ids {
        let Some(des_route) = des_routes.get(route_id) else {
            continue;
        };
        for ori_rec in &ori_routes[route_id].trips {
            if realtime_only && ori_rec.status.is_static_only() {
                continue;
            }
            for des_rec in &des_route.trips {
                if des_rec.trip_id != ori_rec.trip_id
                    || des_rec.service_date != ori_rec.service_date
                {
                    continue;
                }
                if ori_rec.stop_sequence >= des_rec.stop_sequence {
                    continue;
                }
                if ori_rec.pickup_type == 1 || des_rec.drop_off_type == 1 {
                    continue;
                }
                if matches!(ori_rec.status, TripStatus::Skip | TripStatus::Cancel)
                    || matches!(des_rec.status, TripStatus::Skip | TripStatus::Cancel)
                {
                    continue;
                }
                pairs.push((ori_rec, des_rec));
                break;
            }
        }
    }

    if leg_num == 0 {
        for (ori_rec, des_rec) in &pairs {
            if let Some((earliest, latest)) = seed_window {
                let Some(dep) = ori_rec.rt_departure.or(ori_rec.sched_departure) else {
                    continue;
                };
                if dep < earliest || latest.is_some_and(|l| dep > l) {
                    continue;
                }
            }
            candidates.push(vec![(*ori_rec).clone(), (*des_rec).clone()]);
        }
        candidates.sort_by_key(|journey| journey[0].wait_time_sec);
    } else {
        let expected_len = 2 * leg_num;
        for idx in 0..candidates.len() {
            if dead.contains(&idx) || candidates[idx].len() != expected_len {
                continue;
            }
            let Some(prev_arrival) = candidates[idx]
                .last()
                .and_then(|last| last.rt_arrival.or(last.sched_arrival))
            else {
                continue;
            };
            let earliest = prev_arrival + Duration::minutes(i64::from(window.0));
            let latest = prev_arrival + Duration::minutes(i64::from(window.1));

            // First reachable ride wins
            for (ori_rec, des_rec) in &pairs {
                let Some(dep) = ori_rec.rt_departure.or(ori_rec.sched_departure) else {
                    continue;
                };
                if dep < earliest || (window.1 != 0 && dep > latest) {
                    continue;
                }
                candidates[idx].push((*ori_rec).clone());
                candidates[idx].push((*des_rec).clone());
                break;
            }
        }
    }

    // A journey that failed to pick up this leg is done for
    for (idx, journey) in candidates.iter().enumerate() {
        if journey.len() != 2 * (leg_num + 1) {
            dead.insert(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil;
    use crate::schedule::testutil as sched_testutil;
    use chrono_tz::America::New_York;

    fn clock(hhmmss: &str) -> i32 {
        crate::schedule::time::offset_from_hhmmss(hhmmss)
    }

    /// A at 08:00→B 08:20 (t-ab-1), B→C legs at 08:22 (too tight),
    /// 08:30 (fits 5-15) and 08:50 (too late for max 15).
    fn transfer_network() -> crate::schedule::ScheduleStore {
        let mut store = sched_testutil::empty_store(New_York);
        sched_testutil::add_route(&mut store, "R-AB", "AB");
        sched_testutil::add_route(&mut store, "R-BC", "BC");
        sched_testutil::add_daily_service(&mut store, "daily");
        for id in ["A", "B", "C"] {
            sched_testutil::add_stop(&mut store, id, &format!("Stop {id}"));
        }
        sched_testutil::add_trip(
            &mut store,
            "R-AB",
            "t-ab-1",
            "daily",
            &[("A", clock("08:00:00"), clock("08:00:00")), ("B", clock("08:20:00"), clock("08:20:00"))],
        );
        sched_testutil::add_trip(
            &mut store,
            "R-BC",
            "t-bc-early",
            "daily",
            &[("B", clock("08:22:00"), clock("08:22:00")), ("C", clock("08:40:00"), clock("08:40:00"))],
        );
        sched_testutil::add_trip(
            &mut store,
            "R-BC",
            "t-bc-good",
            "daily",
            &[("B", clock("08:30:00"), clock("08:30:00")), ("C", clock("08:50:00"), clock("08:50:00"))],
        );
        sched_testutil::add_trip(
            &mut store,
            "R-BC",
            "t-bc-late",
            "daily",
            &[("B", clock("08:50:00"), clock("08:50:00")), ("C", clock("09:10:00"), clock("09:10:00"))],
        );
        store
    }

    #[test]
    fn argument_shape_errors() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        // 3 arguments is neither 2 nor 2+3k
        assert_eq!(testutil::obj(&respond(&ctx, &txn, "EES", "60 A|B|C"))["error"], 901);
        assert_eq!(testutil::obj(&respond(&ctx, &txn, "EES", "60 A|B|x|A|nope"))["error"], 902);
        assert_eq!(testutil::obj(&respond(&ctx, &txn, "EES", "60 A|B|5|nope|B"))["error"], 903);
        assert_eq!(testutil::obj(&respond(&ctx, &txn, "EES", "60 A|B|1-2-3|A|B"))["error"], 904);
        assert_eq!(testutil::obj(&respond(&ctx, &txn, "EES", "60 A|B|15-5|A|B"))["error"], 905);
        // Negative connection times read as malformed ranges
        assert_eq!(testutil::obj(&respond(&ctx, &txn, "EES", "60 A|B|-5|A|B"))["error"], 902);
    }

    #[test]
    fn single_leg_journey() {
        let store = transfer_network();
        let ctx = testutil::app_context(store);
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, "EES", "120 A|B");
        let obj = testutil::obj(&value);
        assert_eq!(obj["message_type"], "EES");
        assert_eq!(obj["error"], 0);
        let journeys = obj["trips"].as_array().unwrap();
        assert_eq!(journeys.len(), 1);
        let legs = journeys[0].as_array().unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0]["trip_id"], "t-ab-1");
        assert_eq!(legs[0]["stop_id"], "A");
        assert_eq!(legs[1]["stop_id"], "B");
        // Stop labels for every touched stop
        assert!(obj["stops"]["A"]["stop_name"].as_str().is_some());
    }

    #[test]
    fn two_leg_journey_respects_transfer_window() {
        // 5-15 minute connection at B: the 08:22 ride misses the minimum,
        // the 08:50 ride exceeds the maximum, 08:30 fits
        let store = transfer_network();
        let ctx = testutil::app_context(store);
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, "EES", "120 A|B|5-15|B|C");
        let obj = testutil::obj(&value);
        assert_eq!(obj["error"], 0);
        let journeys = obj["trips"].as_array().unwrap();
        assert_eq!(journeys.len(), 1);
        let legs = journeys[0].as_array().unwrap();
        assert_eq!(legs.len(), 4);
        assert_eq!(legs[2]["trip_id"], "t-bc-good");
        assert_eq!(legs[3]["stop_id"], "C");
    }

    #[test]
    fn unbounded_max_accepts_late_connections() {
        let store = transfer_network();
        let ctx = testutil::app_context(store);
        let txn = ctx.begin_request();
        // Minimum 25 minutes with no maximum: only the 08:50 ride fits
        let value = respond(&ctx, &txn, "EES", "180 A|B|25|B|C");
        let obj = testutil::obj(&value);
        let journeys = obj["trips"].as_array().unwrap();
        assert_eq!(journeys.len(), 1);
        let legs = journeys[0].as_array().unwrap();
        assert_eq!(legs[2]["trip_id"], "t-bc-late");
    }

    #[test]
    fn unconnectable_journey_is_dropped() {
        let store = transfer_network();
        let ctx = testutil::app_context(store);
        let txn = ctx.begin_request();
        // A 40+ minute minimum transfer outruns every B→C ride in the window
        let value = respond(&ctx, &txn, "EES", "120 A|B|40|B|C");
        let obj = testutil::obj(&value);
        assert_eq!(obj["error"], 0);
        assert!(obj["trips"].as_array().unwrap().is_empty());
    }

    #[test]
    fn wrong_direction_leg_yields_nothing() {
        let store = transfer_network();
        let ctx = testutil::app_context(store);
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, "EES", "120 B|A");
        let obj = testutil::obj(&value);
        assert!(obj["trips"].as_array().unwrap().is_empty());
    }

    #[test]
    fn trip_in_progress_seeds_the_search() {
        let store = transfer_network();
        let ctx = testutil::app_context(store);
        let txn = ctx.begin_request();
        // Aboard t-ab-1 toward B, then a 5-15 connection to C
        let value = respond(&ctx, &txn, "ETS", "120 t-ab-1|B|5-15|B|C");
        let obj = testutil::obj(&value);
        assert_eq!(obj["message_type"], "ETS");
        assert_eq!(obj["error"], 0);
        assert_eq!(obj["current_trip"]["trip_id"], "t-ab-1");
        let journeys = obj["trips"].as_array().unwrap();
        assert_eq!(journeys.len(), 1);
        assert_eq!(journeys[0].as_array().unwrap()[0]["trip_id"], "t-bc-good");
    }

    #[test]
    fn trip_in_progress_alone_is_valid() {
        let store = transfer_network();
        let ctx = testutil::app_context(store);
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, "ETS", "120 t-ab-1|B");
        let obj = testutil::obj(&value);
        assert_eq!(obj["error"], 0);
        assert_eq!(obj["current_trip"]["trip_id"], "t-ab-1");
        assert!(obj["trips"].as_array().unwrap().is_empty());
    }

    #[test]
    fn unknown_current_trip_is_null() {
        let store = transfer_network();
        let ctx = testutil::app_context(store);
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, "ETS", "120 ghost-trip|B");
        let obj = testutil::obj(&value);
        assert_eq!(obj["error"], 0);
        assert!(obj["current_trip"].is_null());
    }
}
