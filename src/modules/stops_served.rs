//! SSR: every stop a route serves, with trip counts.

use serde_json::{Map, Value};

use super::{AppContext, Txn};

const ERR_UNKNOWN_ROUTE: i64 = 501;

pub fn respond(ctx: &AppContext, txn: &Txn, route_id: &str) -> Value {
    let schedule = &ctx.schedule;
    let Some(route) = schedule.routes.get(route_id) else {
        return txn.error("SSR", ERR_UNKNOWN_ROUTE);
    };

    let mut resp = Map::new();
    resp.insert("route_id".into(), Value::from(route_id));
    resp.insert("route_short_name".into(), Value::from(route.short_name.clone()));
    resp.insert("route_long_name".into(), Value::from(route.long_name.clone()));
    resp.insert("route_desc".into(), Value::from(route.desc.clone()));
    resp.insert("route_type".into(), Value::from(route.route_type.clone()));
    resp.insert("route_url".into(), Value::from(route.url.clone()));
    resp.insert("route_color".into(), Value::from(route.color.clone()));
    resp.insert("route_text_color".into(), Value::from(route.text_color.clone()));

    let mut stop_ids: Vec<&String> = route.stop_service.keys().collect();
    stop_ids.sort();
    let stops: Vec<Value> = stop_ids
        .into_iter()
        .map(|stop_id| {
            let mut entry = Map::new();
            entry.insert("stop_id".into(), Value::from(stop_id.clone()));
            if let Some(stop) = schedule.stop(stop_id) {
                entry.insert("stop_name".into(), Value::from(stop.name.clone()));
                entry.insert("stop_desc".into(), Value::from(stop.desc.clone()));
                entry.insert("stop_lat".into(), Value::from(stop.lat));
                entry.insert("stop_lon".into(), Value::from(stop.lon));
            }
            entry.insert("trip_count".into(), Value::from(route.stop_service[stop_id]));
            Value::Object(entry)
        })
        .collect();
    resp.insert("stops".into(), Value::from(stops));

    txn.finish("SSR", 0, resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil;

    #[test]
    fn unknown_route_is_501() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, "nope");
        assert_eq!(testutil::obj(&value)["error"], 501);
    }

    #[test]
    fn stops_carry_trip_counts() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn, "R1");
        let obj = testutil::obj(&value);
        assert_eq!(obj["error"], 0);
        let stops = obj["stops"].as_array().unwrap();
        assert_eq!(stops.len(), 3);
        assert_eq!(stops[0]["stop_id"], "A");
        // Both trips call at every stop
        assert_eq!(stops[0]["trip_count"], 2);
        assert_eq!(stops[1]["stop_name"], "Stop B");
    }
}
