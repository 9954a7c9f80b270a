//! RTI: full rosters of added / active / cancelled realtime trips,
//! plus the feed's problem children (orphans, mismatches, duplicates).

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::{fmt_static_modified, realtime_age, AppContext, Txn};

fn route_trip_lists(map: &HashMap<String, Vec<String>>) -> Value {
    let mut route_ids: Vec<&String> = map.keys().collect();
    route_ids.sort();
    let mut out = Map::new();
    for route_id in route_ids {
        let mut trips = map[route_id].clone();
        trips.sort();
        out.insert(route_id.clone(), Value::from(trips));
    }
    Value::Object(out)
}

pub fn respond(ctx: &AppContext, txn: &Txn) -> Value {
    ctx.gateway.request_entered();

    let mut resp = Map::new();
    resp.insert("static_data_modif".into(), Value::from(fmt_static_modified(&ctx.schedule)));

    let Some(store) = ctx.gateway.snapshot() else {
        return txn.finish("RTI", 0, resp);
    };
    resp.insert("realtime_age_sec".into(), realtime_age(&store, txn.now_utc));

    let summary = store.summary(&ctx.schedule.trips);
    resp.insert("canceled_trips".into(), route_trip_lists(&summary.cancelled));
    resp.insert("added_trips".into(), route_trip_lists(&summary.added));
    resp.insert("active_trips".into(), route_trip_lists(&summary.active));

    let mut orphans = summary.orphans.clone();
    orphans.sort();
    resp.insert("orphaned_trips".into(), Value::from(orphans));

    resp.insert("mismatch_trips".into(), route_trip_lists(&summary.mismatches));

    let mut duplicate_routes: Vec<&String> = summary.duplicates.keys().collect();
    duplicate_routes.sort();
    let mut duplicates = Map::new();
    for route_id in duplicate_routes {
        let mut trips = Map::new();
        let mut trip_ids: Vec<&String> = summary.duplicates[route_id].keys().collect();
        trip_ids.sort();
        for trip_id in trip_ids {
            trips.insert(
                trip_id.clone(),
                Value::from(summary.duplicates[route_id][trip_id].clone()),
            );
        }
        duplicates.insert(route_id.clone(), Value::Object(trips));
    }
    resp.insert("duplicate_trips".into(), Value::Object(duplicates));

    txn.finish("RTI", 0, resp)
}
