//! RTE: every route in the static dataset.

use serde_json::{Map, Value};

use super::{AppContext, Txn};

pub fn respond(ctx: &AppContext, txn: &Txn) -> Value {
    let mut route_ids: Vec<&String> = ctx.schedule.routes.keys().collect();
    route_ids.sort();

    let routes: Vec<Value> = route_ids
        .into_iter()
        .map(|route_id| {
            let route = &ctx.schedule.routes[route_id];
            let mut entry = Map::new();
            entry.insert("id".into(), Value::from(route_id.clone()));
            entry.insert("agency_id".into(), Value::from(route.agency_id.clone()));
            entry.insert("short_name".into(), Value::from(route.short_name.clone()));
            entry.insert("long_name".into(), Value::from(route.long_name.clone()));
            entry.insert("desc".into(), Value::from(route.desc.clone()));
            entry.insert("type".into(), Value::from(route.route_type.clone()));
            entry.insert("url".into(), Value::from(route.url.clone()));
            entry.insert("color".into(), Value::from(route.color.clone()));
            entry.insert("text_color".into(), Value::from(route.text_color.clone()));
            entry.insert("nb_trips".into(), Value::from(route.trips.len()));
            Value::Object(entry)
        })
        .collect();

    let mut resp = Map::new();
    resp.insert("routes".into(), Value::from(routes));
    txn.finish("RTE", 0, resp)
}
