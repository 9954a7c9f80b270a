//! NEX / NCF: reconciled upcoming service at one or more stops.
//!
//! NEX groups trips under their routes; NCF flattens everything into one
//! wait-ordered list.

use serde_json::{Map, Value};

use super::{
    fill_trip_data, fmt_static_modified, parse_minutes, realtime_age, split_ids, take_first_token,
    AppContext, Txn,
};
use crate::reconcile::Reconciler;

const ERR_UNKNOWN_STOP: i64 = 601;
const ERR_BAD_MINUTES: i64 = 602;

pub fn respond(ctx: &AppContext, txn: &Txn, combined: bool, args: &str) -> Value {
    let verb = if combined { "NCF" } else { "NEX" };
    let (minutes_token, rest) = take_first_token(args);
    let Some(minutes) = parse_minutes(minutes_token) else {
        return txn.error(verb, ERR_BAD_MINUTES);
    };

    let schedule = &ctx.schedule;
    let mut stop_ids = split_ids(rest);

    // A single parent-station id expands to its platforms
    let mut parent_station = None;
    if stop_ids.len() == 1 && schedule.is_parent_station(&stop_ids[0]) {
        parent_station = Some(stop_ids[0].clone());
        stop_ids = schedule.expand_stop_id(&stop_ids[0]);
    }

    ctx.gateway.request_entered();
    let snapshot = ctx.gateway.snapshot();

    let reconciler = Reconciler::new(
        stop_ids.clone(),
        snapshot.as_deref(),
        txn.now_agency.date_naive(),
        txn.now_agency,
        minutes,
        schedule,
    );
    if !reconciler.stops_exist() {
        return txn.error(verb, ERR_UNKNOWN_STOP);
    }

    let mut resp = Map::new();
    resp.insert("static_data_modif".into(), Value::from(fmt_static_modified(schedule)));
    if let Some(store) = &snapshot {
        resp.insert("realtime_age_sec".into(), realtime_age(store, txn.now_utc));
    }

    match &parent_station {
        Some(parent) => {
            resp.insert("stop_id".into(), Value::from(parent.clone()));
            resp.insert(
                "stop_name".into(),
                Value::from(schedule.stop(parent).map(|s| s.name.clone()).unwrap_or_default()),
            );
            resp.insert("stop_desc".into(), Value::from("Parent Station"));
        }
        None => {
            let stop_id = if stop_ids.len() == 1 {
                stop_ids[0].clone()
            } else {
                stop_ids
                    .iter()
                    .map(|id| format!("{id} | "))
                    .collect::<String>()
            };
            resp.insert("stop_id".into(), Value::from(stop_id));
            resp.insert("stop_name".into(), Value::from(reconciler.stop_name()));
            resp.insert("stop_desc".into(), Value::from(reconciler.stop_desc()));
        }
    }

    let routes = reconciler.trips_by_route();
    let mut route_ids: Vec<&String> = routes.keys().collect();
    route_ids.sort();

    let short_name_of = |trip_id: &str| -> String {
        schedule.trips.get(trip_id).map(|t| t.short_name.clone()).unwrap_or_default()
    };

    if !combined {
        let mut route_array = Vec::new();
        for route_id in route_ids {
            let route = &routes[route_id];
            let mut entry = Map::new();
            entry.insert("route_id".into(), Value::from(route_id.clone()));

            let mut trips = Vec::new();
            for record in &route.trips {
                if ctx.hide_terminating && record.trip_terminates {
                    continue;
                }
                trips.push(Value::Object(fill_trip_data(
                    record,
                    &short_name_of(&record.trip_id),
                    txn.clock_12h,
                )));
                if ctx.nex_trips_per_route != 0 && trips.len() as u32 == ctx.nex_trips_per_route {
                    break;
                }
            }
            entry.insert("trips".into(), Value::from(trips));
            route_array.push(Value::Object(entry));
        }
        resp.insert("routes".into(), Value::from(route_array));
    } else {
        let mut flattened: Vec<(&String, &crate::reconcile::TripRecord)> = Vec::new();
        for route_id in route_ids {
            for record in &routes[route_id].trips {
                if ctx.hide_terminating && record.trip_terminates {
                    continue;
                }
                flattened.push((route_id, record));
            }
        }
        flattened.sort_by_key(|(_, record)| record.wait_time_sec);

        let trips: Vec<Value> = flattened
            .into_iter()
            .map(|(route_id, record)| {
                let mut item = fill_trip_data(record, &short_name_of(&record.trip_id), txn.clock_12h);
                item.insert("route_id".into(), Value::from(route_id.clone()));
                Value::Object(item)
            })
            .collect();
        resp.insert("trips".into(), Value::from(trips));
    }

    txn.finish(verb, 0, resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil;
    use crate::modules::AppContext;
    use std::sync::Arc;

    #[test]
    fn bad_minutes_are_rejected() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        assert_eq!(testutil::obj(&respond(&ctx, &txn, false, "-5 B"))["error"], 602);
        assert_eq!(testutil::obj(&respond(&ctx, &txn, false, "abc B"))["error"], 602);
    }

    #[test]
    fn unknown_stop_is_601() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, false, "30 nope");
        let obj = testutil::obj(&value);
        assert_eq!(obj["message_type"], "NEX");
        assert_eq!(obj["error"], 601);
    }

    #[test]
    fn upcoming_trips_for_one_stop() {
        // Frozen at 07:55 with trips at 08:00 and 08:10
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, false, "30 B");
        let obj = testutil::obj(&value);

        assert_eq!(obj["message_type"], "NEX");
        assert_eq!(obj["error"], 0);
        assert_eq!(obj["stop_id"], "B");
        assert_eq!(obj["stop_name"], "Stop B");
        let routes = obj["routes"].as_array().unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0]["route_id"], "R1");
        let trips = routes[0]["trips"].as_array().unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0]["trip_id"], "T1");
        assert_eq!(trips[0]["wait_time_sec"], 300);
        assert_eq!(trips[0]["arr_time"], "Mon 08:00");
        assert!(trips[0].get("realtime_data").is_none());
        assert_eq!(trips[1]["trip_id"], "T2");
        assert_eq!(trips[1]["wait_time_sec"], 900);
    }

    #[test]
    fn combined_format_flattens_and_sorts() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, true, "30 B");
        let obj = testutil::obj(&value);
        assert_eq!(obj["message_type"], "NCF");
        let trips = obj["trips"].as_array().unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0]["route_id"], "R1");
        assert_eq!(trips[0]["trip_id"], "T1");
        assert_eq!(trips[1]["trip_id"], "T2");
    }

    #[test]
    fn per_route_cap_truncates() {
        let base = testutil::context_with_stores();
        let ctx = AppContext::new(
            Arc::clone(&base.schedule),
            Arc::clone(&base.gateway),
            false,
            1,
            false,
            4,
            base.frozen_now,
        );
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, false, "30 B");
        let obj = testutil::obj(&value);
        let trips = obj["routes"][0]["trips"].as_array().unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0]["trip_id"], "T1");
    }

    #[test]
    fn terminating_trips_can_be_hidden() {
        let base = testutil::context_with_stores();
        let ctx = AppContext::new(
            Arc::clone(&base.schedule),
            Arc::clone(&base.gateway),
            false,
            0,
            true,
            4,
            base.frozen_now,
        );
        let txn = ctx.begin_request();
        // C is the terminus of both trips
        let value = respond(&ctx, &txn, false, "60 C");
        let obj = testutil::obj(&value);
        assert!(obj["routes"][0]["trips"].as_array().unwrap().is_empty());
    }

    #[test]
    fn multi_stop_query_concatenates_ids() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, false, "60 A|B");
        let obj = testutil::obj(&value);
        assert_eq!(obj["error"], 0);
        assert_eq!(obj["stop_id"], "A | B | ");
        // Both stops contribute records; T1's 07:50 call at A is already past
        let trips = obj["routes"][0]["trips"].as_array().unwrap();
        assert_eq!(trips.len(), 3);
    }

    #[test]
    fn parent_station_expands_to_platforms() {
        let mut store = crate::schedule::testutil::empty_store(chrono_tz::America::New_York);
        crate::schedule::testutil::add_route(&mut store, "R1", "1");
        crate::schedule::testutil::add_daily_service(&mut store, "daily");
        crate::schedule::testutil::add_stop(&mut store, "HUB", "Main Hub");
        crate::schedule::testutil::add_stop(&mut store, "HUB-1", "Main Hub Track 1");
        crate::schedule::testutil::add_stop(&mut store, "HUB-2", "Main Hub Track 2");
        store.stops.parents.insert("HUB".into(), vec!["HUB-1".into(), "HUB-2".into()]);
        // 08:00 at track 1, 08:05 at track 2
        crate::schedule::testutil::add_trip(&mut store, "R1", "t1", "daily", &[("HUB-1", -14_400, -14_400)]);
        crate::schedule::testutil::add_trip(&mut store, "R1", "t2", "daily", &[("HUB-2", -14_100, -14_100)]);
        let ctx = testutil::app_context(store);

        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, false, "30 HUB");
        let obj = testutil::obj(&value);
        assert_eq!(obj["error"], 0);
        assert_eq!(obj["stop_id"], "HUB");
        assert_eq!(obj["stop_name"], "Main Hub");
        assert_eq!(obj["stop_desc"], "Parent Station");
        let trips = obj["routes"][0]["trips"].as_array().unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0]["trip_id"], "t1");
    }

    #[test]
    fn zero_minutes_means_unbounded() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, false, "0 B");
        let obj = testutil::obj(&value);
        assert_eq!(obj["error"], 0);
        // No upper bound: today's two calls plus tomorrow's two
        assert_eq!(obj["routes"][0]["trips"].as_array().unwrap().len(), 4);
    }
}
