//! RPS: per-route realtime feed quality tallies.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::{fmt_static_modified, fmt_timestamp_clocked, AppContext, Txn};

#[derive(Default)]
struct RouteTally {
    scheduled: usize,
    added: usize,
    cancelled: usize,
    duplicated: usize,
    mismatched: usize,
}

pub fn respond(ctx: &AppContext, txn: &Txn) -> Value {
    let gateway = &ctx.gateway;
    let tz = ctx.schedule.meta.timezone;

    let mut resp = Map::new();
    resp.insert(
        "uptm_ms".into(),
        Value::from((txn.now_utc - ctx.server_started).num_milliseconds()),
    );
    resp.insert("statdat".into(), Value::from(fmt_static_modified(&ctx.schedule)));
    resp.insert("nb_reqs".into(), Value::from(ctx.handled_requests()));
    resp.insert(
        "ltst_rt".into(),
        Value::from(fmt_timestamp_clocked(
            &gateway.most_recent_transaction().with_timezone(&tz),
            txn.clock_12h,
        )),
    );
    resp.insert("rt_buff".into(), Value::from(gateway.active_side().label()));

    if let Some(store) = gateway.snapshot() {
        match store.feed_time() {
            Some(feed_time) => {
                resp.insert(
                    "datagen".into(),
                    Value::from(fmt_timestamp_clocked(&feed_time.with_timezone(&tz), txn.clock_12h)),
                );
                resp.insert("age_sec".into(), Value::from((txn.now_utc - feed_time).num_seconds()));
            }
            None => {
                resp.insert("datagen".into(), Value::from("-"));
                resp.insert("age_sec".into(), Value::from("-"));
            }
        }
        resp.insert("gtfsrtv".into(), Value::from(store.feed_version()));
        resp.insert("dwnldms".into(), Value::from(store.download_ms));
        resp.insert("integms".into(), Value::from(store.integration_ms));

        let summary = store.summary(&ctx.schedule.trips);
        let count = |map: &HashMap<String, Vec<String>>| -> usize {
            map.values().map(|v| v.len()).sum()
        };
        resp.insert("sch".into(), Value::from(count(&summary.active)));
        resp.insert("add".into(), Value::from(count(&summary.added)));
        resp.insert("can".into(), Value::from(count(&summary.cancelled)));
        let duplicate_count: usize = summary
            .duplicates
            .values()
            .flat_map(|trips| trips.values())
            .map(|indexes| indexes.len())
            .sum();
        resp.insert("dup".into(), Value::from(duplicate_count));
        resp.insert("mis".into(), Value::from(count(&summary.mismatches)));
        resp.insert("nrt".into(), Value::from(summary.orphans.len()));

        let mut tallies: HashMap<&String, RouteTally> = HashMap::new();
        for (route_id, trips) in &summary.active {
            tallies.entry(route_id).or_default().scheduled = trips.len();
        }
        for (route_id, trips) in &summary.added {
            tallies.entry(route_id).or_default().added = trips.len();
        }
        for (route_id, trips) in &summary.cancelled {
            tallies.entry(route_id).or_default().cancelled = trips.len();
        }
        for (route_id, trips) in &summary.duplicates {
            tallies.entry(route_id).or_default().duplicated =
                trips.values().map(|indexes| indexes.len()).sum();
        }
        for (route_id, trips) in &summary.mismatches {
            tallies.entry(route_id).or_default().mismatched = trips.len();
        }

        let mut route_ids: Vec<&&String> = tallies.keys().collect();
        route_ids.sort();
        let mut routes = Map::new();
        for route_id in route_ids {
            let tally = &tallies[*route_id];
            let mut entry = Map::new();
            entry.insert("sch".into(), Value::from(tally.scheduled));
            entry.insert("add".into(), Value::from(tally.added));
            entry.insert("can".into(), Value::from(tally.cancelled));
            entry.insert("dup".into(), Value::from(tally.duplicated));
            entry.insert("mis".into(), Value::from(tally.mismatched));
            routes.insert((*route_id).clone(), Value::Object(entry));
        }
        resp.insert("routes".into(), Value::Object(routes));
    }

    txn.finish("RPS", 0, resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil;

    #[test]
    fn reports_buffer_state_without_realtime() {
        let ctx = testutil::context_with_stores();
        let txn = ctx.begin_request();
        let value = respond(&ctx, &txn);
        let obj = testutil::obj(&value);
        assert_eq!(obj["message_type"], "RPS");
        assert_eq!(obj["error"], 0);
        assert_eq!(obj["rt_buff"], "NONE");
        assert_eq!(obj["nb_reqs"], 1);
        assert!(!obj.contains_key("sch"));
    }
}
