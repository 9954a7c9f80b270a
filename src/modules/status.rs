//! SDS: server and static-dataset status.

use serde_json::{Map, Value};

use super::{fmt_opt_date, AppContext, Txn};

pub fn respond(ctx: &AppContext, txn: &Txn) -> Value {
    let meta = &ctx.schedule.meta;
    let mut resp = Map::new();

    resp.insert(
        "application".into(),
        Value::from(format!("{} version {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
    );
    resp.insert("records".into(), Value::from(ctx.schedule.records_loaded));
    resp.insert(
        "appuptime_ms".into(),
        Value::from((txn.now_utc - ctx.server_started).num_milliseconds()),
    );
    resp.insert(
        "dataloadtime_ms".into(),
        Value::from((ctx.schedule.load_finished - ctx.schedule.load_started).num_milliseconds()),
    );
    resp.insert("threadpool_count".into(), Value::from(ctx.worker_limit));
    resp.insert("processed_reqs".into(), Value::from(ctx.handled_requests()));
    resp.insert("feed_publisher".into(), Value::from(meta.publisher.clone()));
    resp.insert("feed_url".into(), Value::from(meta.url.clone()));
    resp.insert("feed_lang".into(), Value::from(meta.language.clone()));
    resp.insert("feed_valid_start".into(), Value::from(fmt_opt_date(meta.start_date)));
    resp.insert("feed_valid_end".into(), Value::from(fmt_opt_date(meta.end_date)));
    resp.insert("feed_version".into(), Value::from(meta.version.clone()));

    let agencies: Vec<Value> = meta
        .agencies
        .iter()
        .map(|agency| {
            let mut entry = Map::new();
            entry.insert("id".into(), Value::from(agency.id.clone()));
            entry.insert("name".into(), Value::from(agency.name.clone()));
            entry.insert("url".into(), Value::from(agency.url.clone()));
            entry.insert("tz".into(), Value::from(agency.timezone.clone()));
            entry.insert("lang".into(), Value::from(agency.lang.clone()));
            entry.insert("phone".into(), Value::from(agency.phone.clone()));
            Value::Object(entry)
        })
        .collect();
    resp.insert("agencies".into(), Value::from(agencies));

    txn.finish("SDS", 0, resp)
}
