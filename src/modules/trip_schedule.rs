//! TRI: the full scheduled itinerary of one trip.

use serde_json::{Map, Value};

use super::{fmt_clock, fmt_opt_date, AppContext, Txn};

const ERR_UNKNOWN_TRIP: i64 = 101;

pub fn respond(ctx: &AppContext, txn: &Txn, trip_id: &str) -> Value {
    let schedule = &ctx.schedule;
    let Some(trip) = schedule.trips.get(trip_id) else {
        return txn.error("TRI", ERR_UNKNOWN_TRIP);
    };

    let mut resp = Map::new();
    resp.insert("real_time".into(), Value::from(false));
    resp.insert("trip_id".into(), Value::from(trip_id));
    resp.insert("route_id".into(), Value::from(trip.route_id.clone()));
    resp.insert("headsign".into(), Value::from(trip.headsign.clone()));
    resp.insert("short_name".into(), Value::from(trip.short_name.clone()));
    resp.insert("service_id".into(), Value::from(trip.service_id.clone()));

    let calendar = &schedule.calendar;
    resp.insert("operate_days".into(), Value::from(calendar.operating_days(&trip.service_id)));
    resp.insert("exception_dates".into(), Value::from(calendar.removed_dates(&trip.service_id)));
    resp.insert("added_dates".into(), Value::from(calendar.added_dates(&trip.service_id)));
    resp.insert(
        "svc_start_date".into(),
        Value::from(fmt_opt_date(calendar.start_date(&trip.service_id))),
    );
    resp.insert(
        "svc_end_date".into(),
        Value::from(fmt_opt_date(calendar.end_date(&trip.service_id))),
    );

    if let Some(route) = schedule.routes.get(&trip.route_id) {
        resp.insert("route_short_name".into(), Value::from(route.short_name.clone()));
        resp.insert("route_long_name".into(), Value::from(route.long_name.clone()));
    }

    let mut stops = Vec::new();
    if let Some(times) = schedule.stop_times.get(trip_id) {
        for st in times {
            let mut entry = Map::new();
            entry.insert("sequence".into(), Value::from(st.stop_sequence));
            entry.insert("stop_id".into(), Value::from(st.stop_id.clone()));
            entry.insert(
                "stop_name".into(),
                Value::from(
                    schedule.stop(&st.stop_id).map(|s| s.name.clone()).unwrap_or_default(),
                ),
            );
            entry.insert("arr_time".into(), Value::from(fmt_clock(st.arrival)));
            entry.insert("dep_time".into(), Value::from(fmt_clock(st.departure)));
            entry.insert("drop_off_type".into(), Value::from(st.drop_off_type));
            entry.insert("pickup_type".into(), Value::from(st.pickup_type));
            entry.insert("interpolated".into(), Value::from(st.interpolated));
            stops.push(Value::Object(entry));
        }
    }
    resp.insert("stops".into(), Value::from(stops));

    txn.finish("TRI", 0, resp)
}
