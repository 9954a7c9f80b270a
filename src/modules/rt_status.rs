//! RDS: refresh-loop diagnostics for the realtime feed.

use serde_json::{Map, Value};

use super::{fmt_timestamp_clocked, AppContext, Txn};

pub fn respond(ctx: &AppContext, txn: &Txn) -> Value {
    let gateway = &ctx.gateway;
    let tz = ctx.schedule.meta.timezone;

    let mut resp = Map::new();
    resp.insert("seconds_to_next_fetch".into(), Value::from(gateway.seconds_to_next_fetch()));
    resp.insert(
        "last_realtime_query".into(),
        Value::from(fmt_timestamp_clocked(
            &gateway.most_recent_transaction().with_timezone(&tz),
            txn.clock_12h,
        )),
    );
    resp.insert("active_side".into(), Value::from(gateway.active_side().label()));

    if let Some(store) = gateway.snapshot() {
        resp.insert("active_rt_version".into(), Value::from(store.feed_version()));
        resp.insert("active_download_ms".into(), Value::from(store.download_ms));
        resp.insert("active_integration_ms".into(), Value::from(store.integration_ms));
        match store.feed_time() {
            Some(feed_time) => {
                resp.insert(
                    "active_feed_time".into(),
                    Value::from(fmt_timestamp_clocked(&feed_time.with_timezone(&tz), txn.clock_12h)),
                );
                resp.insert(
                    "active_age_sec".into(),
                    Value::from((txn.now_utc - feed_time).num_seconds()),
                );
            }
            None => {
                resp.insert("active_feed_time".into(), Value::from("-"));
                resp.insert("active_age_sec".into(), Value::from("-"));
            }
        }
    }

    txn.finish("RDS", 0, resp)
}
