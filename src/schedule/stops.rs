//! Stops from stops.txt, parent-station grouping, and the per-stop
//! route -> trip-visit cross-link built after all tables are loaded.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use super::error::ScheduleError;

/// One visit of a trip to a stop: where in the trip it happens and the
/// time the visit sorts by.
#[derive(Debug, Clone)]
pub struct StopVisit {
    pub trip_id: String,
    /// Index into the trip's stop-time vector (not the GTFS sequence value).
    pub stop_index: usize,
    /// First non-absent arrival-else-departure at this index or later in the
    /// trip, as a local-noon offset. Untimed tails keep NO_TIME.
    pub sort_time: i32,
}

#[derive(Debug, Clone, Default)]
pub struct Stop {
    pub name: String,
    pub desc: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub parent_station: String,
    /// route_id -> visits, sorted by (sort_time, trip_id) after linking
    pub trips_by_route: HashMap<String, Vec<StopVisit>>,
}

#[derive(Debug, Default)]
pub struct StopDb {
    pub stops: HashMap<String, Stop>,
    /// parent station id -> child stop ids
    pub parents: HashMap<String, Vec<String>>,
}

impl StopDb {
    pub fn load(data_root: &Path) -> Result<Self, ScheduleError> {
        let path = data_root.join("stops.txt");
        if !path.exists() {
            return Err(ScheduleError::MissingFile(path));
        }
        let mut rdr = csv::Reader::from_reader(std::fs::File::open(path)?);
        let headers = rdr.headers()?.clone();

        let idx_id = headers
            .iter()
            .position(|h| h == "stop_id")
            .ok_or(ScheduleError::MissingColumn { file: "stops.txt", column: "stop_id" })?;
        let idx_name = headers.iter().position(|h| h == "stop_name");
        let idx_desc = headers.iter().position(|h| h == "stop_desc");
        let idx_lat = headers.iter().position(|h| h == "stop_lat");
        let idx_lon = headers.iter().position(|h| h == "stop_lon");
        let idx_parent = headers.iter().position(|h| h == "parent_station");

        let mut db = Self::default();
        let mut skipped = 0usize;
        for result in rdr.records() {
            let Ok(record) = result else {
                skipped += 1;
                continue;
            };
            let stop_id = record.get(idx_id).unwrap_or("").to_string();
            if stop_id.is_empty() {
                skipped += 1;
                continue;
            }
            let parent_station = idx_parent
                .and_then(|i| record.get(i))
                .unwrap_or("")
                .to_string();
            if !parent_station.is_empty() {
                db.parents
                    .entry(parent_station.clone())
                    .or_default()
                    .push(stop_id.clone());
            }
            db.stops.insert(
                stop_id,
                Stop {
                    name: idx_name.and_then(|i| record.get(i)).unwrap_or("").to_string(),
                    desc: idx_desc.and_then(|i| record.get(i)).unwrap_or("").to_string(),
                    lat: idx_lat.and_then(|i| record.get(i)).and_then(|s| s.parse().ok()),
                    lon: idx_lon.and_then(|i| record.get(i)).and_then(|s| s.parse().ok()),
                    parent_station,
                    trips_by_route: HashMap::new(),
                },
            );
        }
        if skipped > 0 {
            warn!(skipped, "Skipped stops.txt records with empty stop_id");
        }
        info!(stops = db.stops.len(), parent_stations = db.parents.len(), "Parsed stops");
        Ok(db)
    }

    pub fn connect_visit(&mut self, stop_id: &str, route_id: &str, visit: StopVisit) {
        let Some(stop) = self.stops.get_mut(stop_id) else {
            return;
        };
        stop.trips_by_route
            .entry(route_id.to_string())
            .or_default()
            .push(visit);
    }

    pub fn sort_visits(&mut self) {
        for stop in self.stops.values_mut() {
            for visits in stop.trips_by_route.values_mut() {
                visits.sort_by(|a, b| {
                    a.sort_time
                        .cmp(&b.sort_time)
                        .then_with(|| a.trip_id.cmp(&b.trip_id))
                });
            }
        }
    }

    pub fn record_count(&self) -> usize {
        self.stops.len() + self.parents.values().map(|v| v.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visits_sort_by_time_then_trip_id() {
        let mut db = StopDb::default();
        db.stops.insert("S1".into(), Stop::default());
        db.connect_visit("S1", "R1", StopVisit { trip_id: "t2".into(), stop_index: 0, sort_time: 600 });
        db.connect_visit("S1", "R1", StopVisit { trip_id: "t1".into(), stop_index: 0, sort_time: 600 });
        db.connect_visit("S1", "R1", StopVisit { trip_id: "t0".into(), stop_index: 0, sort_time: 0 });
        db.sort_visits();

        let order: Vec<&str> = db.stops["S1"].trips_by_route["R1"]
            .iter()
            .map(|v| v.trip_id.as_str())
            .collect();
        assert_eq!(order, vec!["t0", "t1", "t2"]);
    }

    #[test]
    fn unknown_stop_visit_is_dropped() {
        let mut db = StopDb::default();
        db.connect_visit("ghost", "R1", StopVisit { trip_id: "t1".into(), stop_index: 0, sort_time: 0 });
        assert!(db.stops.is_empty());
    }
}
