//! Trips from trips.txt.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use super::error::ScheduleError;

#[derive(Debug, Clone, Default)]
pub struct Trip {
    pub route_id: String,
    pub service_id: String,
    pub headsign: String,
    pub short_name: String,
}

pub type TripDb = HashMap<String, Trip>;

pub fn load(data_root: &Path) -> Result<TripDb, ScheduleError> {
    let path = data_root.join("trips.txt");
    if !path.exists() {
        return Err(ScheduleError::MissingFile(path));
    }
    let mut rdr = csv::Reader::from_reader(std::fs::File::open(path)?);
    let headers = rdr.headers()?.clone();

    let idx_trip = headers
        .iter()
        .position(|h| h == "trip_id")
        .ok_or(ScheduleError::MissingColumn { file: "trips.txt", column: "trip_id" })?;
    let idx_route = headers
        .iter()
        .position(|h| h == "route_id")
        .ok_or(ScheduleError::MissingColumn { file: "trips.txt", column: "route_id" })?;
    let idx_service = headers
        .iter()
        .position(|h| h == "service_id")
        .ok_or(ScheduleError::MissingColumn { file: "trips.txt", column: "service_id" })?;
    let idx_headsign = headers.iter().position(|h| h == "trip_headsign");
    let idx_short = headers.iter().position(|h| h == "trip_short_name");

    let mut trips = TripDb::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let trip_id = record.get(idx_trip).unwrap_or("").to_string();
        if trip_id.is_empty() {
            skipped += 1;
            continue;
        }
        trips.insert(
            trip_id,
            Trip {
                route_id: record.get(idx_route).unwrap_or("").to_string(),
                service_id: record.get(idx_service).unwrap_or("").to_string(),
                headsign: idx_headsign.and_then(|i| record.get(i)).unwrap_or("").to_string(),
                short_name: idx_short.and_then(|i| record.get(i)).unwrap_or("").to_string(),
            },
        );
    }
    if skipped > 0 {
        warn!(skipped, "Skipped trips.txt records with empty trip_id");
    }
    info!(count = trips.len(), "Parsed trips");
    Ok(trips)
}
