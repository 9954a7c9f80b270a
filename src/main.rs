mod config;
mod modules;
mod realtime;
mod reconcile;
mod schedule;
mod server;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Cli, Config};
use modules::AppContext;
use realtime::gateway::{RealtimeGateway, RealtimeOptions};
use realtime::DateMatch;
use schedule::ScheduleStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).expect("Failed to load config");
    tracing::info!(config = %cli.config.display(), data = %config.data_path.display(), "Loaded configuration");

    // The static bundle loads exactly once; everything downstream shares it
    // by reference
    let data_path = config.data_path.clone();
    let schedule = tokio::task::spawn_blocking(move || ScheduleStore::load(&data_path))
        .await
        .expect("Schedule load task failed")
        .expect("Failed to load static schedule");
    let schedule = Arc::new(schedule);

    let frozen_now = cli.frozen_time.as_deref().and_then(|spec| {
        let parsed = config::parse_frozen_time(spec, schedule.meta.timezone);
        if parsed.is_none() {
            tracing::warn!(spec, "Ignoring malformed frozen-time specification");
        }
        parsed
    });
    if let Some(frozen) = frozen_now {
        tracing::warn!(%frozen, "All transactions will be answered as of a fixed instant");
    }

    let gateway = Arc::new(RealtimeGateway::new(RealtimeOptions {
        feed_location: config.realtime_feed_location.clone(),
        update_interval_secs: config.update_interval_secs,
        date_match: DateMatch::from_config(config.service_date_match),
        loosen_stop_seq: config.skip_stop_seq_match,
        all_skipped_cancelled: config.has_z_option("ALL_SKIPPED_IS_CANCELED"),
    }));
    if gateway.enabled() {
        // Prime the first buffer before serving, then refresh in the
        // background for the life of the process
        gateway.refresh(&schedule).await;
        tokio::spawn(Arc::clone(&gateway).run(Arc::clone(&schedule)));
    }

    let ctx = Arc::new(AppContext::new(
        Arc::clone(&schedule),
        gateway,
        config.clock_12h,
        config.nex_trips_per_route,
        config.hide_terminating,
        config.number_threads,
        frozen_now,
    ));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server_port))
        .await
        .unwrap_or_else(|err| panic!("Failed to bind port {}: {err}", config.server_port));
    tracing::info!(port = config.server_port, "Server started, accepting connections");

    server::run(listener, ctx, cli.log_transactions).await;
}
