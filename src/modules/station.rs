//! STA: one stop or parent station with its routes and sibling platforms.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::{AppContext, Txn};

const ERR_UNKNOWN_STOP: i64 = 401;

pub fn respond(ctx: &AppContext, txn: &Txn, stop_id: &str) -> Value {
    let schedule = &ctx.schedule;

    let is_parent = schedule.is_parent_station(stop_id);
    let stop = schedule.stop(stop_id);
    if !is_parent && stop.is_none() {
        return txn.error("STA", ERR_UNKNOWN_STOP);
    }

    // A parent aggregates the routes of every child platform
    let mut routes_served: BTreeSet<String> = BTreeSet::new();
    if is_parent {
        for child in schedule.expand_stop_id(stop_id) {
            if let Some(child_stop) = schedule.stop(&child) {
                routes_served.extend(child_stop.trips_by_route.keys().cloned());
            }
        }
    } else if let Some(stop) = stop {
        routes_served.extend(stop.trips_by_route.keys().cloned());
    }

    let mut resp = Map::new();
    if let Some(stop) = stop {
        resp.insert("stop_id".into(), Value::from(stop_id));
        resp.insert("stop_name".into(), Value::from(stop.name.clone()));
        resp.insert("stop_desc".into(), Value::from(stop.desc.clone()));
        resp.insert("parent_sta".into(), Value::from(stop.parent_station.clone()));
        resp.insert("loc_lat".into(), Value::from(stop.lat));
        resp.insert("loc_lon".into(), Value::from(stop.lon));
    } else {
        resp.insert("stop_id".into(), Value::from(stop_id));
    }

    let routes: Vec<Value> = routes_served
        .iter()
        .map(|route_id| {
            let mut entry = Map::new();
            entry.insert("route_id".into(), Value::from(route_id.clone()));
            if let Some(route) = schedule.routes.get(route_id) {
                entry.insert("route_short_name".into(), Value::from(route.short_name.clone()));
                entry.insert("route_long_name".into(), Value::from(route.long_name.clone()));
            }
            Value::Object(entry)
        })
        .collect();
    resp.insert("routes".into(), Value::from(routes));

    // Other platforms hanging off the same parent
    let parent = if is_parent {
        stop_id.to_string()
    } else {
        stop.map(|s| s.parent_station.clone()).unwrap_or_default()
    };
    let mut siblings = Vec::new();
    if !parent.is_empty() {
        if let Some(children) = schedule.stops.parents.get(&parent) {
            for child_id in children {
                let mut entry = Map::new();
                entry.insert("stop_id".into(), Value::from(child_id.clone()));
                if let Some(child) = schedule.stop(child_id) {
                    entry.insert("stop_name".into(), Value::from(child.name.clone()));
                    entry.insert("stop_desc".into(), Value::from(child.desc.clone()));
                }
                siblings.push(Value::Object(entry));
            }
        }
    }
    resp.insert("stops_sharing_parent".into(), Value::from(siblings));

    txn.finish("STA", 0, resp)
}
