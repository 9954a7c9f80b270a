//! Immutable in-memory index of the static GTFS bundle.
//!
//! Built once at startup from the unpacked .txt files, then shared by
//! reference for the life of the process. All cross-links are indices into
//! the owning tables, never back-pointers.

pub mod calendar;
pub mod error;
pub mod feed_info;
pub mod routes;
pub mod stop_times;
pub mod stops;
pub mod time;
pub mod trips;

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::info;

pub use calendar::CalendarDb;
pub use error::ScheduleError;
pub use feed_info::FeedMeta;
pub use routes::{Route, RouteDb};
pub use stop_times::{StopTime, StopTimeDb};
pub use stops::{Stop, StopDb, StopVisit};
pub use time::NO_TIME;
pub use trips::{Trip, TripDb};

#[derive(Debug)]
pub struct ScheduleStore {
    pub meta: FeedMeta,
    pub routes: RouteDb,
    pub trips: TripDb,
    pub stop_times: StopTimeDb,
    pub stops: StopDb,
    pub calendar: CalendarDb,
    pub records_loaded: u64,
    pub load_started: DateTime<Utc>,
    pub load_finished: DateTime<Utc>,
}

impl ScheduleStore {
    /// Load and cross-link the whole bundle. Blocking; run on a blocking
    /// thread when called from async context.
    pub fn load(data_root: &Path) -> Result<Self, ScheduleError> {
        let load_started = Utc::now();

        let meta = FeedMeta::load(data_root)?;
        let mut routes = routes::load(data_root)?;
        let calendar = CalendarDb::load(data_root)?;
        let trips = trips::load(data_root)?;
        let stop_times = stop_times::load(data_root)?;
        let mut stops = StopDb::load(data_root)?;

        link_trips_to_routes(&mut routes, &trips, &stop_times);
        link_stops_to_trips(&mut stops, &mut routes, &trips, &stop_times);

        let records_loaded = (meta.record_count()
            + routes.len()
            + calendar.record_count()
            + trips.len()
            + stop_times.values().map(|v| v.len()).sum::<usize>()
            + stops.record_count()) as u64;

        let load_finished = Utc::now();
        info!(
            records = records_loaded,
            elapsed_ms = (load_finished - load_started).num_milliseconds(),
            "Static schedule loaded"
        );

        Ok(Self {
            meta,
            routes,
            trips,
            stop_times,
            stops,
            calendar,
            records_loaded,
            load_started,
            load_finished,
        })
    }

    pub fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.stops.get(stop_id)
    }

    pub fn is_parent_station(&self, stop_id: &str) -> bool {
        self.stops.parents.contains_key(stop_id)
    }

    /// A parent station expands to its children; any other id stands alone.
    pub fn expand_stop_id(&self, stop_id: &str) -> Vec<String> {
        match self.stops.parents.get(stop_id) {
            Some(children) => children.clone(),
            None => vec![stop_id.to_string()],
        }
    }

    /// Headsign shown for a trip at a specific stop: the stop-specific
    /// headsign when published, else the trip's.
    pub fn headsign_at(&self, trip_id: &str, stop_index: usize) -> String {
        let stop_headsign = self
            .stop_times
            .get(trip_id)
            .and_then(|times| times.get(stop_index))
            .map(|st| st.stop_headsign.as_str())
            .unwrap_or("");
        if !stop_headsign.is_empty() {
            return stop_headsign.to_string();
        }
        self.trips
            .get(trip_id)
            .map(|t| t.headsign.clone())
            .unwrap_or_default()
    }
}

/// Register every trip under its route with its first timed stop, then sort
/// each route's trip list chronologically.
fn link_trips_to_routes(routes: &mut RouteDb, trips: &TripDb, stop_times: &StopTimeDb) {
    for (trip_id, trip) in trips {
        let (first_dep, first_arr) = stop_times
            .get(trip_id)
            .and_then(|times| times.first())
            .map(|st| (st.departure, st.arrival))
            .unwrap_or((NO_TIME, NO_TIME));
        routes::connect_trip(routes, &trip.route_id, trip_id, first_dep, first_arr);
    }
    routes::sort_route_trips(routes);
}

/// Cross-link every stop time to its stop, computing the visit sort time,
/// then sort the per-route visit vectors and tally route stop service.
fn link_stops_to_trips(
    stops: &mut StopDb,
    routes: &mut RouteDb,
    trips: &TripDb,
    stop_times: &StopTimeDb,
) {
    for (trip_id, times) in stop_times {
        let Some(trip) = trips.get(trip_id) else {
            continue;
        };
        for (index, st) in times.iter().enumerate() {
            // Untimed stops sort by the next available time along the trip
            let mut sort_time = NO_TIME;
            for later in &times[index..] {
                if later.arrival != NO_TIME {
                    sort_time = later.arrival;
                    break;
                }
                if later.departure != NO_TIME {
                    sort_time = later.departure;
                    break;
                }
            }
            stops.connect_visit(
                &st.stop_id,
                &trip.route_id,
                StopVisit { trip_id: trip_id.clone(), stop_index: index, sort_time },
            );
            routes::connect_stop(routes, &trip.route_id, &st.stop_id);
        }
    }
    stops.sort_visits();
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;
    use std::io::Write;

    fn write_bundle(dir: &std::path::Path) {
        std::fs::create_dir_all(dir).unwrap();
        let write = |name: &str, content: &str| {
            let mut f = std::fs::File::create(dir.join(name)).unwrap();
            f.write_all(content.as_bytes()).unwrap();
        };
        write(
            "agency.txt",
            "agency_id,agency_name,agency_url,agency_timezone\n\
             MT,Metro Transit,https://metro.test,America/New_York\n",
        );
        write(
            "routes.txt",
            "route_id,route_short_name,route_long_name,route_type,route_color\n\
             R1,1,First Street,3,FF0000\n",
        );
        // Columns deliberately reordered; positions come from the header
        write(
            "trips.txt",
            "service_id,trip_id,trip_headsign,route_id\n\
             daily,t1,Downtown,R1\n\
             daily,t2,Downtown,R1\n",
        );
        write(
            "stop_times.txt",
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             t1,08:00:00,08:00:30,S1,1\n\
             t1,,,S2,2\n\
             t1,08:20:00,08:20:00,S3,3\n\
             t2,25:10:00,25:10:00,S1,1\n\
             t2,25:30:00,25:30:00,S3,2\n",
        );
        write(
            "stops.txt",
            "stop_id,stop_name,stop_lat,stop_lon,parent_station\n\
             S1,First & Main,40.0,-75.0,\n\
             S2,Second & Main,40.1,-75.1,HUB\n\
             S3,Third & Main,40.2,-75.2,HUB\n\
             HUB,Main Hub,40.15,-75.15,\n",
        );
        write(
            "calendar.txt",
            "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
             daily,1,1,1,1,1,1,1,20260101,20261231\n",
        );
        write(
            "calendar_dates.txt",
            "service_id,date,exception_type\ndaily,20260704,2\n",
        );
    }

    #[test]
    fn bundle_load_builds_all_cross_links() {
        let dir = std::env::temp_dir().join("stopcast-bundle-load");
        write_bundle(&dir);
        let store = ScheduleStore::load(&dir).unwrap();

        assert_eq!(store.meta.timezone, New_York);
        assert_eq!(store.routes.len(), 1);
        assert_eq!(store.trips.len(), 2);
        assert_eq!(store.stops.stops.len(), 4);
        assert!(store.records_loaded > 0);

        // Reordered columns still land in the right fields
        assert_eq!(store.trips["t1"].route_id, "R1");
        assert_eq!(store.trips["t1"].headsign, "Downtown");

        // Route trip list: t1 (08:00) before t2 (25:10)
        let order: Vec<&str> = store.routes["R1"].trips.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["t1", "t2"]);

        // After-midnight times parse past 24 hours
        assert_eq!(store.stop_times["t2"][0].arrival, 46_800 + 600);

        // Untimed S2 sorts by the next timed stop on the trip
        let visits = &store.stops.stops["S2"].trips_by_route["R1"];
        assert_eq!(visits[0].sort_time, time::offset_from_hhmmss("08:20:00"));

        // Parent station HUB gathers its platforms
        assert_eq!(store.expand_stop_id("HUB").len(), 2);

        // Calendar override removes the holiday
        assert!(store.calendar.running("daily", chrono::NaiveDate::from_ymd_opt(2026, 7, 3).unwrap()));
        assert!(!store.calendar.running("daily", chrono::NaiveDate::from_ymd_opt(2026, 7, 4).unwrap()));

        // Stop tallies: S1 twice, S2 once
        assert_eq!(store.routes["R1"].stop_service["S1"], 2);
        assert_eq!(store.routes["R1"].stop_service["S2"], 1);
    }

    #[test]
    fn missing_required_file_aborts_load() {
        let dir = std::env::temp_dir().join("stopcast-bundle-broken");
        write_bundle(&dir);
        std::fs::remove_file(dir.join("stop_times.txt")).unwrap();
        let err = ScheduleStore::load(&dir).unwrap_err();
        assert!(matches!(err, ScheduleError::MissingFile(_)));
    }

    #[test]
    fn visit_sort_times_fall_forward_to_next_timed_stop() {
        let mut store = testutil::empty_store(New_York);
        testutil::add_route(&mut store, "R1", "1");
        testutil::add_daily_service(&mut store, "daily");
        for id in ["A", "B", "C"] {
            testutil::add_stop(&mut store, id, id);
        }
        testutil::add_trip(
            &mut store,
            "R1",
            "t1",
            "daily",
            &[("A", 0, 0), ("B", NO_TIME, NO_TIME), ("C", 600, 600)],
        );

        let visits = &store.stops.stops["B"].trips_by_route["R1"];
        assert_eq!(visits.len(), 1);
        // Untimed stop B sorts by C's arrival
        assert_eq!(visits[0].sort_time, 600);
        assert_eq!(visits[0].stop_index, 1);
    }

    #[test]
    fn per_stop_visits_are_time_ordered() {
        let mut store = testutil::empty_store(New_York);
        testutil::add_route(&mut store, "R1", "1");
        testutil::add_daily_service(&mut store, "daily");
        testutil::add_stop(&mut store, "A", "A");
        testutil::add_trip(&mut store, "R1", "late", "daily", &[("A", 1200, 1200)]);
        testutil::add_trip(&mut store, "R1", "early", "daily", &[("A", 300, 300)]);

        let visits = &store.stops.stops["A"].trips_by_route["R1"];
        let order: Vec<&str> = visits.iter().map(|v| v.trip_id.as_str()).collect();
        assert_eq!(order, vec!["early", "late"]);

        // Route trip list sorts by first departure as well
        let route_order: Vec<&str> = store.routes["R1"].trips.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(route_order, vec!["early", "late"]);
    }

    #[test]
    fn route_stop_tally_reflects_trip_count() {
        let mut store = testutil::empty_store(New_York);
        testutil::add_route(&mut store, "R1", "1");
        testutil::add_daily_service(&mut store, "daily");
        testutil::add_stop(&mut store, "A", "A");
        testutil::add_stop(&mut store, "B", "B");
        testutil::add_trip(&mut store, "R1", "t1", "daily", &[("A", 0, 0), ("B", 300, 300)]);
        testutil::add_trip(&mut store, "R1", "t2", "daily", &[("A", 600, 600)]);

        assert_eq!(store.routes["R1"].stop_service["A"], 2);
        assert_eq!(store.routes["R1"].stop_service["B"], 1);
    }

    #[test]
    fn parent_station_expansion() {
        let mut store = testutil::empty_store(New_York);
        testutil::add_stop(&mut store, "P1-a", "Platform A");
        testutil::add_stop(&mut store, "P1-b", "Platform B");
        store.stops.parents.insert("P1".into(), vec!["P1-a".into(), "P1-b".into()]);

        assert_eq!(store.expand_stop_id("P1"), vec!["P1-a".to_string(), "P1-b".to_string()]);
        assert_eq!(store.expand_stop_id("P1-a"), vec!["P1-a".to_string()]);
        assert!(store.is_parent_station("P1"));
        assert!(!store.is_parent_station("P1-a"));
    }
}
