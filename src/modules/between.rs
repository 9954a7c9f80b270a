//! SBS: direct scheduled service between two stops on one day.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde_json::{Map, Value};

use super::{
    fmt_opt_day_time, fmt_service_date, parse_day_token, split_ids, take_first_token, AppContext,
    Txn,
};
use crate::schedule::time::to_instant;
use crate::schedule::ScheduleStore;

const ERR_UNKNOWN_ORIGIN: i64 = 701;
const ERR_UNKNOWN_DESTINATION: i64 = 702;
const ERR_NO_DATE: i64 = 703;
const ERR_ARG_COUNT: i64 = 704;

/// Accumulated origin/destination schedule facts for one trip.
#[derive(Default, Clone)]
struct TripOd {
    route_id: String,
    headsign: String,
    ori_seq: Option<u32>,
    ori_arrival: Option<DateTime<Tz>>,
    ori_departure: Option<DateTime<Tz>>,
    ori_pickup: u8,
    des_seq: Option<u32>,
    des_arrival: Option<DateTime<Tz>>,
    des_departure: Option<DateTime<Tz>>,
    des_drop_off: u8,
}

pub fn respond(ctx: &AppContext, txn: &Txn, args: &str) -> Value {
    let schedule = &ctx.schedule;
    let (day_token, rest) = take_first_token(args);
    let ids = split_ids(rest);
    if ids.len() != 2 {
        return txn.error("SBS", ERR_ARG_COUNT);
    }
    let Some(date) = parse_day_token(day_token, txn.now_agency.date_naive()) else {
        return txn.error("SBS", ERR_NO_DATE);
    };

    let ori_id = &ids[0];
    let des_id = &ids[1];
    if schedule.stop(ori_id).is_none() && !schedule.is_parent_station(ori_id) {
        return txn.error("SBS", ERR_UNKNOWN_ORIGIN);
    }
    if schedule.stop(des_id).is_none() && !schedule.is_parent_station(des_id) {
        return txn.error("SBS", ERR_UNKNOWN_DESTINATION);
    }

    let mut resp = Map::new();
    resp.insert("ori_stop_id".into(), Value::from(ori_id.clone()));
    resp.insert(
        "ori_stop_name".into(),
        Value::from(schedule.stop(ori_id).map(|s| s.name.clone()).unwrap_or_default()),
    );
    resp.insert(
        "ori_stop_desc".into(),
        Value::from(schedule.stop(ori_id).map(|s| s.desc.clone()).unwrap_or_default()),
    );
    resp.insert("des_stop_id".into(), Value::from(des_id.clone()));
    resp.insert(
        "des_stop_name".into(),
        Value::from(schedule.stop(des_id).map(|s| s.name.clone()).unwrap_or_default()),
    );
    resp.insert(
        "des_stop_desc".into(),
        Value::from(schedule.stop(des_id).map(|s| s.desc.clone()).unwrap_or_default()),
    );
    resp.insert("service_date".into(), Value::from(fmt_service_date(date)));

    // Trips that pick up at the origin side and trips that drop off at the
    // destination side; the intersection rides both
    let mut ods: HashMap<String, TripOd> = HashMap::new();
    for child in schedule.expand_stop_id(ori_id) {
        collect_side(schedule, &child, date, true, &mut ods);
    }
    for child in schedule.expand_stop_id(des_id) {
        collect_side(schedule, &child, date, false, &mut ods);
    }

    let mut common: Vec<(String, TripOd)> = ods
        .into_iter()
        .filter(|(_, od)| od.ori_seq.is_some() && od.des_seq.is_some())
        // Wrong-direction rides (destination before origin) are excluded
        .filter(|(_, od)| od.ori_seq < od.des_seq)
        .collect();

    common.sort_by_key(|(_, od)| od.ori_arrival.or(od.ori_departure));

    let trips: Vec<Value> = common
        .into_iter()
        .map(|(trip_id, od)| {
            let mut entry = Map::new();
            entry.insert("trip_id".into(), Value::from(trip_id.clone()));
            entry.insert(
                "trip_short_name".into(),
                Value::from(
                    schedule.trips.get(&trip_id).map(|t| t.short_name.clone()).unwrap_or_default(),
                ),
            );
            entry.insert("route_id".into(), Value::from(od.route_id.clone()));
            if let Some(route) = schedule.routes.get(&od.route_id) {
                entry.insert("route_short_name".into(), Value::from(route.short_name.clone()));
                entry.insert("route_long_name".into(), Value::from(route.long_name.clone()));
            }
            let headsign = if od.headsign.is_empty() {
                schedule.trips.get(&trip_id).map(|t| t.headsign.clone()).unwrap_or_default()
            } else {
                od.headsign.clone()
            };
            entry.insert("headsign".into(), Value::from(headsign));
            entry.insert(
                "ori_arrival".into(),
                Value::from(fmt_opt_day_time(od.ori_arrival.as_ref(), txn.clock_12h)),
            );
            entry.insert(
                "ori_departure".into(),
                Value::from(fmt_opt_day_time(od.ori_departure.as_ref(), txn.clock_12h)),
            );
            entry.insert("ori_pick_up".into(), Value::from(od.ori_pickup));
            entry.insert(
                "des_arrival".into(),
                Value::from(fmt_opt_day_time(od.des_arrival.as_ref(), txn.clock_12h)),
            );
            entry.insert(
                "des_departure".into(),
                Value::from(fmt_opt_day_time(od.des_departure.as_ref(), txn.clock_12h)),
            );
            entry.insert("des_drop_off".into(), Value::from(od.des_drop_off));

            let duration = match (od.ori_departure, od.des_arrival) {
                (Some(dep), Some(arr)) => {
                    let secs = (arr - dep).num_seconds().max(0);
                    format!("{:02}:{:02}", secs / 3600, (secs / 60) % 60)
                }
                _ => "-".to_string(),
            };
            entry.insert("duration".into(), Value::from(duration));
            Value::Object(entry)
        })
        .collect();
    resp.insert("trips".into(), Value::from(trips));

    txn.finish("SBS", 0, resp)
}

fn collect_side(
    schedule: &ScheduleStore,
    stop_id: &str,
    date: NaiveDate,
    is_origin: bool,
    ods: &mut HashMap<String, TripOd>,
) {
    let Some(stop) = schedule.stop(stop_id) else {
        return;
    };
    let tz = schedule.meta.timezone;
    for (route_id, visits) in &stop.trips_by_route {
        for visit in visits {
            let Some(trip) = schedule.trips.get(&visit.trip_id) else {
                continue;
            };
            if !schedule.calendar.running(&trip.service_id, date) {
                continue;
            }
            let Some(st) = schedule
                .stop_times
                .get(&visit.trip_id)
                .and_then(|times| times.get(visit.stop_index))
            else {
                continue;
            };

            if is_origin {
                if st.pickup_type == 1 {
                    continue;
                }
                let od = ods.entry(visit.trip_id.clone()).or_default();
                od.route_id = route_id.clone();
                od.headsign = st.stop_headsign.clone();
                od.ori_seq = Some(st.stop_sequence);
                od.ori_pickup = st.pickup_type;
                od.ori_arrival = to_instant(date, st.arrival, tz);
                od.ori_departure = to_instant(date, st.departure, tz);
            } else {
                if st.drop_off_type == 1 {
                    continue;
                }
                let od = ods.entry(visit.trip_id.clone()).or_default();
                od.des_seq = Some(st.stop_sequence);
                od.des_drop_off = st.drop_off_type;
                od.des_arrival = to_instant(date, st.arrival, tz);
                od.des_departure = to_instant(date, st.departure, tz);
            }
        }
    }
}
