//! SNT: stops no trip ever visits (feed hygiene check).

use serde_json::{Map, Value};

use super::{AppContext, Txn};

pub fn respond(ctx: &AppContext, txn: &Txn) -> Value {
    let schedule = &ctx.schedule;
    let mut stop_ids: Vec<&String> = schedule.stops.stops.keys().collect();
    stop_ids.sort();

    let mut stops = Vec::new();
    for stop_id in stop_ids {
        // Parent stations never carry trips themselves; their childless
        // children are listed instead
        if schedule.is_parent_station(stop_id) {
            continue;
        }
        let stop = &schedule.stops.stops[stop_id];
        if !stop.trips_by_route.is_empty() {
            continue;
        }
        let mut entry = Map::new();
        entry.insert("stop_id".into(), Value::from(stop_id.clone()));
        entry.insert("stop_name".into(), Value::from(stop.name.clone()));
        entry.insert("stop_desc".into(), Value::from(stop.desc.clone()));
        entry.insert("loc_lat".into(), Value::from(stop.lat));
        entry.insert("loc_lon".into(), Value::from(stop.lon));
        entry.insert("parent_sta".into(), Value::from(stop.parent_station.clone()));
        stops.push(Value::Object(entry));
    }

    let mut resp = Map::new();
    resp.insert("stops".into(), Value::from(stops));
    txn.finish("SNT", 0, resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil;
    use crate::schedule::testutil as sched_testutil;
    use chrono_tz::America::New_York;

    #[test]
    fn lists_only_unvisited_non_parent_stops() {
        let mut store = sched_testutil::empty_store(New_York);
        sched_testutil::add_route(&mut store, "R1", "1");
        sched_testutil::add_daily_service(&mut store, "daily");
        sched_testutil::add_stop(&mut store, "served", "Served");
        sched_testutil::add_stop(&mut store, "lonely", "Lonely");
        sched_testutil::add_stop(&mut store, "P1", "Parent");
        store.stops.parents.insert("P1".into(), vec!["lonely".into()]);
        sched_testutil::add_trip(&mut store, "R1", "t1", "daily", &[("served", 0, 0)]);
        let ctx = testutil::app_context(store);

        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn);
        let obj = testutil::obj(&value);
        let stops = obj["stops"].as_array().unwrap();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0]["stop_id"], "lonely");
    }
}
