//! Routes from routes.txt plus the derived trip list and stop tally.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use super::error::ScheduleError;
use super::time::NO_TIME;

#[derive(Debug, Clone, Default)]
pub struct Route {
    pub agency_id: String,
    pub short_name: String,
    pub long_name: String,
    pub desc: String,
    pub route_type: String,
    pub url: String,
    pub color: String,
    pub text_color: String,
    /// (trip_id, first departure-or-arrival offset), sorted ascending once
    /// the store is linked. Ties break on trip id so output order is stable.
    pub trips: Vec<(String, i32)>,
    /// stop_id -> number of trips on this route that serve the stop
    pub stop_service: HashMap<String, u32>,
}

pub type RouteDb = HashMap<String, Route>;

pub fn load(data_root: &Path) -> Result<RouteDb, ScheduleError> {
    let path = data_root.join("routes.txt");
    if !path.exists() {
        return Err(ScheduleError::MissingFile(path));
    }
    let mut rdr = csv::Reader::from_reader(std::fs::File::open(path)?);
    let headers = rdr.headers()?.clone();

    let idx_id = headers
        .iter()
        .position(|h| h == "route_id")
        .ok_or(ScheduleError::MissingColumn { file: "routes.txt", column: "route_id" })?;
    let idx_agency = headers.iter().position(|h| h == "agency_id");
    let idx_short = headers.iter().position(|h| h == "route_short_name");
    let idx_long = headers.iter().position(|h| h == "route_long_name");
    let idx_desc = headers.iter().position(|h| h == "route_desc");
    let idx_type = headers.iter().position(|h| h == "route_type");
    let idx_url = headers.iter().position(|h| h == "route_url");
    let idx_color = headers.iter().position(|h| h == "route_color");
    let idx_text = headers.iter().position(|h| h == "route_text_color");

    let mut routes = RouteDb::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let route_id = record.get(idx_id).unwrap_or("").to_string();
        if route_id.is_empty() {
            skipped += 1;
            continue;
        }
        let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("").to_string();
        routes.insert(
            route_id,
            Route {
                agency_id: field(idx_agency),
                short_name: field(idx_short),
                long_name: field(idx_long),
                desc: field(idx_desc),
                route_type: field(idx_type),
                url: field(idx_url),
                color: field(idx_color),
                text_color: field(idx_text),
                trips: Vec::new(),
                stop_service: HashMap::new(),
            },
        );
    }
    if skipped > 0 {
        warn!(skipped, "Skipped routes.txt records with empty route_id");
    }
    info!(count = routes.len(), "Parsed routes");
    Ok(routes)
}

/// Register a trip under its route with the trip's first timed stop.
/// The first stop of a trip nearly always carries a departure; arrival is
/// the fallback for feeds that omit it.
pub fn connect_trip(routes: &mut RouteDb, route_id: &str, trip_id: &str, first_dep: i32, first_arr: i32) {
    let Some(route) = routes.get_mut(route_id) else {
        return;
    };
    let time = if first_dep != NO_TIME { first_dep } else { first_arr };
    route.trips.push((trip_id.to_string(), time));
}

pub fn connect_stop(routes: &mut RouteDb, route_id: &str, stop_id: &str) {
    let Some(route) = routes.get_mut(route_id) else {
        return;
    };
    *route.stop_service.entry(stop_id.to_string()).or_insert(0) += 1;
}

pub fn sort_route_trips(routes: &mut RouteDb) {
    for route in routes.values_mut() {
        route.trips.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    }
}
