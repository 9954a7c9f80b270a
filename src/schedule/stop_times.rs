//! Per-trip stop times from stop_times.txt, including distance-based
//! interpolation of untimed stops.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use super::error::ScheduleError;
use super::time::{offset_from_hhmmss, NO_TIME};

/// Sentinel for an absent shape_dist_traveled value.
pub const NO_DISTANCE: f64 = -10_000.0;

#[derive(Debug, Clone)]
pub struct StopTime {
    pub stop_sequence: u32,
    pub stop_id: String,
    /// Local-noon offsets; NO_TIME when the stop is untimed.
    pub arrival: i32,
    pub departure: i32,
    /// 0=regular, 1=none, 2=phone agency, 3=coordinate with driver
    pub drop_off_type: u8,
    pub pickup_type: u8,
    pub stop_headsign: String,
    pub distance: f64,
    /// Times were filled in by interpolation rather than published.
    pub interpolated: bool,
}

/// trip_id -> stop times ordered by stop_sequence
pub type StopTimeDb = HashMap<String, Vec<StopTime>>;

pub fn load(data_root: &Path) -> Result<StopTimeDb, ScheduleError> {
    let path = data_root.join("stop_times.txt");
    if !path.exists() {
        return Err(ScheduleError::MissingFile(path));
    }
    let mut rdr = csv::Reader::from_reader(std::fs::File::open(path)?);
    let headers = rdr.headers()?.clone();

    let idx_trip = headers
        .iter()
        .position(|h| h == "trip_id")
        .ok_or(ScheduleError::MissingColumn { file: "stop_times.txt", column: "trip_id" })?;
    let idx_seq = headers
        .iter()
        .position(|h| h == "stop_sequence")
        .ok_or(ScheduleError::MissingColumn { file: "stop_times.txt", column: "stop_sequence" })?;
    let idx_stop = headers
        .iter()
        .position(|h| h == "stop_id")
        .ok_or(ScheduleError::MissingColumn { file: "stop_times.txt", column: "stop_id" })?;
    let idx_arr = headers.iter().position(|h| h == "arrival_time");
    let idx_dep = headers.iter().position(|h| h == "departure_time");
    let idx_drop = headers.iter().position(|h| h == "drop_off_type");
    let idx_pickup = headers.iter().position(|h| h == "pickup_type");
    let idx_headsign = headers.iter().position(|h| h == "stop_headsign");
    let idx_dist = headers.iter().position(|h| h == "shape_dist_traveled");

    let mut stop_times = StopTimeDb::new();
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
        let Some(stop_sequence) = record.get(idx_seq).and_then(|s| s.parse().ok()) else {
            skipped += 1;
            continue;
        };
        stop_times.entry(trip_id).or_default().push(StopTime {
            stop_sequence,
            stop_id: record.get(idx_stop).unwrap_or("").to_string(),
            arrival: idx_arr
                .and_then(|i| record.get(i))
                .map(offset_from_hhmmss)
                .unwrap_or(NO_TIME),
            departure: idx_dep
                .and_then(|i| record.get(i))
                .map(offset_from_hhmmss)
                .unwrap_or(NO_TIME),
            drop_off_type: idx_drop
                .and_then(|i| record.get(i))
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            pickup_type: idx_pickup
                .and_then(|i| record.get(i))
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            stop_headsign: idx_headsign.and_then(|i| record.get(i)).unwrap_or("").to_string(),
            distance: idx_dist
                .and_then(|i| record.get(i))
                .and_then(|s| s.parse().ok())
                .unwrap_or(NO_DISTANCE),
            interpolated: false,
        });
    }
    if skipped > 0 {
        warn!(skipped, "Skipped stop_times.txt records (empty/unparseable keys)");
    }

    // Feeds do not always publish rows in sequence order
    for times in stop_times.values_mut() {
        times.sort_by_key(|st| st.stop_sequence);
    }

    let interpolated = interpolate_untimed_stops(&mut stop_times);
    let total: usize = stop_times.values().map(|v| v.len()).sum();
    info!(trips = stop_times.len(), stop_times = total, interpolated, "Parsed stop_times");

    Ok(stop_times)
}

/// Fill contiguous runs of untimed stops by linear interpolation over
/// shape distance. Only trips with a distance at every stop qualify; the
/// run must be bracketed by timed stops on both sides.
fn interpolate_untimed_stops(stop_times: &mut StopTimeDb) -> usize {
    let mut filled = 0usize;
    for times in stop_times.values_mut() {
        let untimed = times
            .iter()
            .filter(|st| st.arrival == NO_TIME && st.departure == NO_TIME)
            .count();
        let all_have_distance = times.iter().all(|st| st.distance != NO_DISTANCE);
        if untimed == 0 || !all_have_distance {
            continue;
        }

        let mut start = 0usize;
        loop {
            let Some(run_start) = times[start..]
                .iter()
                .position(|st| st.arrival == NO_TIME && st.departure == NO_TIME)
                .map(|p| p + start)
            else {
                break;
            };
            if run_start == 0 {
                // Untimed first stop has no left bracket; nothing to anchor on
                break;
            }
            let Some(run_end) = times[run_start..]
                .iter()
                .position(|st| !(st.arrival == NO_TIME && st.departure == NO_TIME))
                .map(|p| p + run_start)
            else {
                break;
            };

            let before = run_start - 1;
            let beg_dist = times[before].distance;
            let beg_time = if times[before].departure != NO_TIME {
                times[before].departure
            } else {
                times[before].arrival
            };
            let end_time = if times[run_end].arrival != NO_TIME {
                times[run_end].arrival
            } else {
                times[run_end].departure
            };
            let time_span = f64::from(end_time - beg_time);
            let dist_span = times[run_end].distance - beg_dist;
            if dist_span <= 0.0 || time_span <= 0.0 {
                start = run_end;
                continue;
            }

            for idx in run_start..run_end {
                let fraction = (times[idx].distance - beg_dist) / dist_span;
                let time = beg_time + (fraction * time_span).round() as i32;
                times[idx].arrival = time;
                times[idx].departure = time;
                times[idx].interpolated = true;
                filled += 1;
            }
            start = run_end;
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn st(seq: u32, stop: &str, arr: i32, dep: i32, dist: f64) -> StopTime {
        StopTime {
            stop_sequence: seq,
            stop_id: stop.into(),
            arrival: arr,
            departure: dep,
            drop_off_type: 0,
            pickup_type: 0,
            stop_headsign: String::new(),
            distance: dist,
            interpolated: false,
        }
    }

    #[test]
    fn interpolates_bracketed_run_by_distance() {
        let mut db = StopTimeDb::new();
        db.insert(
            "t1".into(),
            vec![
                st(1, "A", 0, 0, 0.0),
                st(2, "B", NO_TIME, NO_TIME, 250.0),
                st(3, "C", NO_TIME, NO_TIME, 750.0),
                st(4, "D", 1000, 1000, 1000.0),
            ],
        );
        let filled = interpolate_untimed_stops(&mut db);
        assert_eq!(filled, 2);
        let times = &db["t1"];
        assert_eq!(times[1].arrival, 250);
        assert_eq!(times[1].departure, 250);
        assert!(times[1].interpolated);
        assert_eq!(times[2].arrival, 750);
        assert!(times[2].interpolated);
        // Bracketing stops are untouched
        assert!(!times[0].interpolated);
        assert!(!times[3].interpolated);
    }

    #[test]
    fn no_interpolation_without_full_distance_coverage() {
        let mut db = StopTimeDb::new();
        db.insert(
            "t1".into(),
            vec![
                st(1, "A", 0, 0, 0.0),
                st(2, "B", NO_TIME, NO_TIME, NO_DISTANCE),
                st(3, "C", 1000, 1000, 1000.0),
            ],
        );
        assert_eq!(interpolate_untimed_stops(&mut db), 0);
        assert_eq!(db["t1"][1].arrival, NO_TIME);
        assert!(!db["t1"][1].interpolated);
    }

    #[test]
    fn unbracketed_tail_stays_untimed() {
        let mut db = StopTimeDb::new();
        db.insert(
            "t1".into(),
            vec![
                st(1, "A", 0, 0, 0.0),
                st(2, "B", NO_TIME, NO_TIME, 500.0),
                st(3, "C", NO_TIME, NO_TIME, 1000.0),
            ],
        );
        assert_eq!(interpolate_untimed_stops(&mut db), 0);
        assert_eq!(db["t1"][1].arrival, NO_TIME);
        assert_eq!(db["t1"][2].arrival, NO_TIME);
    }

    #[test]
    fn multiple_runs_fill_independently() {
        let mut db = StopTimeDb::new();
        db.insert(
            "t1".into(),
            vec![
                st(1, "A", 0, 0, 0.0),
                st(2, "B", NO_TIME, NO_TIME, 100.0),
                st(3, "C", 200, 200, 200.0),
                st(4, "D", NO_TIME, NO_TIME, 300.0),
                st(5, "E", 400, 400, 400.0),
            ],
        );
        assert_eq!(interpolate_untimed_stops(&mut db), 2);
        assert_eq!(db["t1"][1].arrival, 100);
        assert_eq!(db["t1"][3].arrival, 300);
    }
}
