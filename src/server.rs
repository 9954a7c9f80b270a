//! Line-delimited TCP front end.
//!
//! One request is a 3-letter verb plus arguments on a single line; one
//! response is a compact JSON object plus a newline. Requests fan out onto
//! a bounded pool of blocking workers; nothing a module does can tear a
//! worker down.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::modules::{
    between, end_to_end, parse_day_token, route_rt, routes, rt_product, rt_status, rt_trips,
    station, status, stops_no_trips, stops_served, take_first_token, trip_schedule,
    trips_serving_route, trips_serving_stop, upcoming, AppContext,
};

pub async fn run(listener: TcpListener, ctx: Arc<AppContext>, log_transactions: bool) {
    let limiter = Arc::new(Semaphore::new(ctx.worker_limit.max(1)));
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "Accepted connection");
                let ctx = Arc::clone(&ctx);
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    handle_connection(stream, ctx, limiter, log_transactions).await;
                });
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    ctx: Arc<AppContext>,
    limiter: Arc<Semaphore>,
    log_transactions: bool,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let request = line.trim().to_string();
        if request.is_empty() {
            continue;
        }
        if log_transactions {
            info!(request = %request, "Transaction");
        }

        let Ok(permit) = limiter.acquire().await else {
            break;
        };
        let response = {
            let ctx = Arc::clone(&ctx);
            let request_for_error = request.clone();
            let request = request.clone();
            match tokio::task::spawn_blocking(move || dispatch(&ctx, &request)).await {
                Ok(value) => value,
                // A worker panic must never reach the client as silence
                Err(_) => json!({ "error": 2, "user_string": request_for_error }),
            }
        };
        drop(permit);

        let mut payload = response.to_string();
        payload.push('\n');
        // A disconnected client just ends the session
        if write_half.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Decode the verb and hand off to its module. Every outcome, including an
/// unknown verb, comes back as a response object.
pub fn dispatch(ctx: &AppContext, request: &str) -> Value {
    let txn = ctx.begin_request();
    let verb: String = request.chars().take(3).collect::<String>().to_ascii_uppercase();
    let args = request.get(3..).unwrap_or("").trim();

    match verb.as_str() {
        "SDS" => status::respond(ctx, &txn),
        "RTE" => routes::respond(ctx, &txn),
        "TRI" => trip_schedule::respond(ctx, &txn, args),
        "TSR" => trips_serving_route::respond(ctx, &txn, args, None),
        "TRD" => {
            let (day_token, rest) = take_first_token(args);
            let date = parse_day_token(day_token, txn.now_agency.date_naive());
            trips_serving_route::respond(ctx, &txn, rest, date)
        }
        "TSS" => trips_serving_stop::respond(ctx, &txn, args, None),
        "TSD" => {
            let (day_token, rest) = take_first_token(args);
            let date = parse_day_token(day_token, txn.now_agency.date_naive());
            trips_serving_stop::respond(ctx, &txn, rest, date)
        }
        "STA" => station::respond(ctx, &txn, args),
        "SSR" => stops_served::respond(ctx, &txn, args),
        "SNT" => stops_no_trips::respond(ctx, &txn),
        "NEX" => upcoming::respond(ctx, &txn, false, args),
        "NCF" => upcoming::respond(ctx, &txn, true, args),
        "SBS" => between::respond(ctx, &txn, args),
        "EES" | "EER" | "ETS" | "ETR" => end_to_end::respond(ctx, &txn, &verb, args),
        "RDS" => rt_status::respond(ctx, &txn),
        "RPS" => rt_product::respond(ctx, &txn),
        "RTI" => rt_trips::respond(ctx, &txn),
        "TRR" => route_rt::respond(ctx, &txn, args),
        _ => json!({ "error": 1, "user_string": request }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil;

    #[test]
    fn unknown_verb_is_error_1() {
        let ctx = testutil::context_with_stores();
        let value = dispatch(&ctx, "XYZ whatever");
        let obj = value.as_object().unwrap();
        assert_eq!(obj["error"], 1);
        assert_eq!(obj["user_string"], "XYZ whatever");
    }

    #[test]
    fn verbs_are_case_insensitive() {
        let ctx = testutil::context_with_stores();
        let value = dispatch(&ctx, "sds");
        assert_eq!(value["message_type"], "SDS");
        assert_eq!(value["error"], 0);
    }

    #[test]
    fn nex_round_trip_through_dispatch() {
        let ctx = testutil::context_with_stores();
        let value = dispatch(&ctx, "NEX 30 B");
        assert_eq!(value["message_type"], "NEX");
        assert_eq!(value["error"], 0);
        let trips = value["routes"][0]["trips"].as_array().unwrap();
        assert_eq!(trips.len(), 2);
    }

    #[test]
    fn dated_verbs_consume_the_day_token() {
        let ctx = testutil::context_with_stores();
        let value = dispatch(&ctx, "TRD D R1");
        assert_eq!(value["message_type"], "TSR");
        assert_eq!(value["error"], 0);
        assert_eq!(value["trips"].as_array().unwrap().len(), 2);

        let value = dispatch(&ctx, "TSD D B");
        assert_eq!(value["message_type"], "TSS");
        assert_eq!(value["error"], 0);
    }

    #[test]
    fn every_success_response_carries_protocol_fields() {
        let ctx = testutil::context_with_stores();
        for request in [
            "SDS", "RTE", "TRI T1", "TSR R1", "TSS B", "STA B", "SSR R1", "SNT", "NEX 30 B",
            "NCF 30 B", "SBS D A|C", "EES 60 A|B", "RDS", "RPS", "RTI",
        ] {
            let value = dispatch(&ctx, request);
            let obj = value.as_object().unwrap();
            assert!(obj.contains_key("message_type"), "{request} missing message_type");
            assert!(obj.contains_key("error"), "{request} missing error");
            assert!(obj.contains_key("message_time"), "{request} missing message_time");
            assert!(obj.contains_key("proc_time_ms"), "{request} missing proc_time_ms");
            assert_eq!(obj["error"], 0, "{request} should succeed");
        }
    }
}
