//! TSR / TRD: every trip of a route, optionally filtered to one day.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use super::{fmt_clock, fmt_date_compact, fmt_service_date, AppContext, Txn};
use crate::schedule::time::to_instant;

const ERR_UNKNOWN_ROUTE: i64 = 201;

pub fn respond(ctx: &AppContext, txn: &Txn, route_id: &str, only_date: Option<NaiveDate>) -> Value {
    let schedule = &ctx.schedule;
    let Some(route) = schedule.routes.get(route_id) else {
        return txn.error("TSR", ERR_UNKNOWN_ROUTE);
    };

    let mut resp = Map::new();
    resp.insert("route_id".into(), Value::from(route_id));
    resp.insert("route_short_name".into(), Value::from(route.short_name.clone()));
    resp.insert("route_long_name".into(), Value::from(route.long_name.clone()));
    resp.insert(
        "service_date".into(),
        Value::from(only_date.map(fmt_service_date).unwrap_or_default()),
    );

    let calendar = &schedule.calendar;
    let tz = schedule.meta.timezone;
    let mut trips = Vec::new();
    for (trip_id, first_time) in &route.trips {
        let Some(trip) = schedule.trips.get(trip_id) else {
            continue;
        };
        if let Some(date) = only_date {
            if !calendar.running(&trip.service_id, date) {
                continue;
            }
        }

        let mut entry = Map::new();
        entry.insert("trip_id".into(), Value::from(trip_id.clone()));
        entry.insert("headsign".into(), Value::from(trip.headsign.clone()));
        entry.insert("service_id".into(), Value::from(trip.service_id.clone()));
        entry.insert(
            "svc_start_date".into(),
            Value::from(fmt_date_compact(calendar.start_date(&trip.service_id))),
        );
        entry.insert(
            "svc_end_date".into(),
            Value::from(fmt_date_compact(calendar.end_date(&trip.service_id))),
        );
        entry.insert(
            "operate_days_condensed".into(),
            Value::from(calendar.condensed_days(&trip.service_id)),
        );
        entry.insert(
            "supplements_other_days".into(),
            Value::from(calendar.has_added_dates(&trip.service_id)),
        );
        entry.insert(
            "exceptions_present".into(),
            Value::from(calendar.has_removed_dates(&trip.service_id)),
        );

        match only_date {
            None => {
                entry.insert("first_stop_departure".into(), Value::from(fmt_clock(*first_time)));
            }
            Some(date) => {
                // Anchored to the real day so DST is reflected
                match to_instant(date, *first_time, tz) {
                    Some(dep) => {
                        entry.insert(
                            "first_stop_departure".into(),
                            Value::from(dep.format("%H:%M").to_string()),
                        );
                        entry.insert("dst_on".into(), Value::from(is_dst(&dep)));
                    }
                    None => {
                        entry.insert("first_stop_departure".into(), Value::from("-"));
                    }
                }
            }
        }
        trips.push(Value::Object(entry));
    }
    resp.insert("trips".into(), Value::from(trips));

    txn.finish("TSR", 0, resp)
}

/// Whether a local instant falls in daylight-saving time.
pub fn is_dst(dt: &chrono::DateTime<chrono_tz::Tz>) -> bool {
    use chrono_tz::OffsetComponents;
    !dt.offset().dst_offset().is_zero()
}
