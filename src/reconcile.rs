//! Trip–stop reconciliation: the upcoming-service view at a stop.
//!
//! Candidates come from three service days (after-midnight trips belong to
//! yesterday, long look-aheads reach into tomorrow), get realtime status
//! layered on when an active buffer exists, then pass time-window
//! invalidation and sort by wait time within each route.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate};
use chrono_tz::Tz;

use crate::realtime::RealtimeStore;
use crate::schedule::time::{service_window, to_instant};
use crate::schedule::ScheduleStore;

/// Lifecycle label of a single (trip, stop) observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripStatus {
    /// Static schedule only, no realtime data
    Schedule,
    /// In the static schedule but without a published time at this stop
    NoSchedule,
    /// Outside the requested window; never rendered
    Irrelevant,
    /// Predicted arrival within 30 seconds
    Arrive,
    /// At the stop between arrival and departure
    Board,
    /// Departed within the last 30 seconds but still in the feed
    Depart,
    /// Running with realtime data, not yet near the stop
    Running,
    /// The trip runs but skips this stop
    Skip,
    /// The whole trip is cancelled
    Cancel,
}

impl TripStatus {
    /// Four-letter wire code for the realtime block.
    pub fn code(self) -> &'static str {
        match self {
            Self::Arrive => "ARRV",
            Self::Board => "BRDG",
            Self::Depart => "DPRT",
            Self::Running => "RNNG",
            Self::Skip => "SKIP",
            Self::Cancel => "CNCL",
            Self::Schedule | Self::NoSchedule | Self::Irrelevant => "",
        }
    }

    pub fn is_static_only(self) -> bool {
        matches!(self, Self::Schedule | Self::NoSchedule)
    }
}

/// Evidentiary basis of the displayed time at a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopStatus {
    /// Schedule data only
    #[default]
    Schd,
    /// Prediction without a comparable scheduled time
    Pred,
    /// Prediction with a scheduled counterpart (offset is meaningful)
    Full,
    /// Stop of an added trip; nothing scheduled to compare against
    Splm,
}

impl StopStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schd => "SCHD",
            Self::Pred => "PRED",
            Self::Full => "FULL",
            Self::Splm => "SPLM",
        }
    }
}

/// One reconciled (trip, stop) observation. Flat value, built fresh per
/// request; nothing here is shared.
#[derive(Debug, Clone)]
pub struct TripRecord {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub stop_index: usize,
    pub service_date: NaiveDate,
    pub status: TripStatus,
    pub stop_status: StopStatus,
    pub realtime: bool,
    pub rt_arrival: Option<DateTime<Tz>>,
    pub rt_departure: Option<DateTime<Tz>>,
    pub sched_arrival: Option<DateTime<Tz>>,
    pub sched_departure: Option<DateTime<Tz>>,
    /// Stand-in instant for untimed stops, from the visit sort time
    pub sort_time: Option<DateTime<Tz>>,
    pub wait_time_sec: i64,
    pub offset_seconds: i64,
    pub headsign: String,
    pub pickup_type: u8,
    pub drop_off_type: u8,
    pub trip_begins: bool,
    pub trip_terminates: bool,
    pub vehicle: String,
    pub first_departure: Option<DateTime<Tz>>,
}

/// Route metadata plus its surviving records, wait-time ordered.
#[derive(Debug, Clone, Default)]
pub struct RouteRecon {
    pub short_name: String,
    pub long_name: String,
    pub color: String,
    pub text_color: String,
    pub trips: Vec<TripRecord>,
}

pub struct Reconciler<'a> {
    schedule: &'a ScheduleStore,
    realtime: Option<&'a RealtimeStore>,
    stop_ids: Vec<String>,
    service_date: NaiveDate,
    now: DateTime<Tz>,
    lookahead_mins: i64,
    lookahead_until: DateTime<Tz>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        stop_ids: Vec<String>,
        realtime: Option<&'a RealtimeStore>,
        service_date: NaiveDate,
        agency_now: DateTime<Tz>,
        lookahead_mins: i64,
        schedule: &'a ScheduleStore,
    ) -> Self {
        Self {
            schedule,
            realtime,
            stop_ids,
            service_date,
            now: agency_now,
            lookahead_mins,
            lookahead_until: agency_now + Duration::minutes(lookahead_mins),
        }
    }

    pub fn stops_exist(&self) -> bool {
        self.stop_ids.iter().all(|id| self.schedule.stop(id).is_some())
    }

    pub fn stop_name(&self) -> String {
        if self.stop_ids.len() == 1 {
            return self
                .schedule
                .stop(&self.stop_ids[0])
                .map(|s| s.name.clone())
                .unwrap_or_default();
        }
        let mut joined = String::new();
        for stop_id in &self.stop_ids {
            if let Some(stop) = self.schedule.stop(stop_id) {
                joined.push_str(&stop.name);
                joined.push_str(" | ");
            }
        }
        joined
    }

    pub fn stop_desc(&self) -> String {
        if self.stop_ids.len() == 1 {
            return self
                .schedule
                .stop(&self.stop_ids[0])
                .map(|s| s.desc.clone())
                .unwrap_or_default();
        }
        "Multiple Stops".to_string()
    }

    /// The reconciled view: route_id -> metadata + surviving records.
    pub fn trips_by_route(&self) -> HashMap<String, RouteRecon> {
        let mut routes: HashMap<String, RouteRecon> = HashMap::new();
        let mut candidates: HashMap<String, Vec<TripRecord>> = HashMap::new();
        let window = service_window(self.service_date);

        for stop_id in &self.stop_ids {
            let Some(stop) = self.schedule.stop(stop_id) else {
                continue;
            };
            for (route_id, visits) in &stop.trips_by_route {
                routes
                    .entry(route_id.clone())
                    .or_insert_with(|| self.route_meta(route_id));
                let records = candidates.entry(route_id.clone()).or_default();
                for day in window {
                    self.add_records_for_day(day, visits, records);
                }
            }

            if let Some(rt) = self.realtime {
                for (route_id, added) in rt.added_trips_serving_stop(stop_id, &self.schedule.trips) {
                    routes
                        .entry(route_id.clone())
                        .or_insert_with(|| self.route_meta(&route_id));
                    let records = candidates.entry(route_id).or_default();
                    for (trip_id, stop_sequence) in added {
                        records.push(self.build_supplemental(&trip_id, stop_sequence, stop_id, rt));
                    }
                }
            }
        }

        if let Some(rt) = self.realtime {
            for records in candidates.values_mut() {
                for record in records.iter_mut() {
                    if record.stop_status != StopStatus::Splm {
                        self.apply_realtime(record, rt);
                    }
                }
            }
        }

        for (route_id, mut records) in candidates {
            records.retain(|record| !self.invalidated(record));
            records.sort_by(|a, b| a.wait_time_sec.cmp(&b.wait_time_sec));
            if let Some(route) = routes.get_mut(&route_id) {
                route.trips = records;
            }
        }
        routes
    }

    fn route_meta(&self, route_id: &str) -> RouteRecon {
        self.schedule
            .routes
            .get(route_id)
            .map(|route| RouteRecon {
                short_name: route.short_name.clone(),
                long_name: route.long_name.clone(),
                color: route.color.clone(),
                text_color: route.text_color.clone(),
                trips: Vec::new(),
            })
            .unwrap_or_default()
    }

    fn add_records_for_day(
        &self,
        day: NaiveDate,
        visits: &[crate::schedule::StopVisit],
        records: &mut Vec<TripRecord>,
    ) {
        let tz = self.schedule.meta.timezone;
        for visit in visits {
            let Some(trip) = self.schedule.trips.get(&visit.trip_id) else {
                continue;
            };
            if !self.schedule.calendar.running(&trip.service_id, day) {
                continue;
            }
            let Some(times) = self.schedule.stop_times.get(&visit.trip_id) else {
                continue;
            };
            let Some(st) = times.get(visit.stop_index) else {
                continue;
            };

            let sched_arrival = to_instant(day, st.arrival, tz);
            let sched_departure = to_instant(day, st.departure, tz);

            // Arrival is preferred for the countdown, so it is applied last
            let mut wait_time_sec = 0i64;
            let mut timed = false;
            if let Some(dep) = sched_departure {
                wait_time_sec = (dep - self.now).num_seconds();
                timed = true;
            }
            if let Some(arr) = sched_arrival {
                wait_time_sec = (arr - self.now).num_seconds();
                timed = true;
            }

            let mut sort_time = None;
            if !timed {
                sort_time = to_instant(day, visit.sort_time, tz);
                if let Some(sort) = sort_time {
                    wait_time_sec = (sort - self.now).num_seconds();
                }
            }

            // The trip's first departure pins the actual civil date the run
            // began, for feeds matched on actual rather than service date
            let first_offset = times
                .first()
                .map(|first| {
                    if first.departure != crate::schedule::NO_TIME {
                        first.departure
                    } else {
                        first.arrival
                    }
                })
                .unwrap_or(crate::schedule::NO_TIME);
            let first_departure = to_instant(day, first_offset, tz);

            records.push(TripRecord {
                trip_id: visit.trip_id.clone(),
                stop_id: st.stop_id.clone(),
                stop_sequence: st.stop_sequence,
                stop_index: visit.stop_index,
                service_date: day,
                status: if timed { TripStatus::Schedule } else { TripStatus::NoSchedule },
                stop_status: StopStatus::Schd,
                realtime: false,
                rt_arrival: None,
                rt_departure: None,
                sched_arrival,
                sched_departure,
                sort_time,
                wait_time_sec,
                offset_seconds: 0,
                headsign: self.schedule.headsign_at(&visit.trip_id, visit.stop_index),
                pickup_type: st.pickup_type,
                drop_off_type: st.drop_off_type,
                trip_begins: visit.stop_index == 0,
                trip_terminates: visit.stop_index == times.len() - 1,
                vehicle: String::new(),
                first_departure,
            });
        }
    }

    fn apply_realtime(&self, record: &mut TripRecord, rt: &RealtimeStore) {
        let actual_date = record
            .first_departure
            .map(|dt| dt.date_naive())
            .unwrap_or(record.service_date);

        if rt.is_cancelled(&record.trip_id, record.service_date, actual_date) {
            record.status = TripStatus::Cancel;
            record.realtime = true;
        }
        if rt.skips_stop(
            &record.stop_id,
            &record.trip_id,
            record.stop_sequence,
            record.service_date,
            actual_date,
        ) {
            record.status = TripStatus::Skip;
            record.realtime = true;
        }

        if !rt.is_scheduled_running(&record.trip_id, record.service_date, actual_date) {
            return;
        }
        if record.status == TripStatus::Skip || record.status == TripStatus::Cancel {
            return;
        }

        record.status = TripStatus::Running;

        // A trip may have left this stop early and dropped it from the
        // update; strict sequence matching can tell without any time math
        if rt.already_passed(&record.trip_id, record.stop_sequence) {
            record.status = TripStatus::Irrelevant;
            return;
        }

        let tz = self.schedule.meta.timezone;
        let empty: Vec<crate::schedule::StopTime> = Vec::new();
        let trip_times = self.schedule.stop_times.get(&record.trip_id).unwrap_or(&empty);
        let (pred_arr, pred_dep) = rt.stop_actual_time(
            &record.trip_id,
            record.stop_sequence,
            &record.stop_id,
            tz,
            trip_times,
            record.service_date,
        );

        self.fill_wait_and_status(record, pred_arr, pred_dep);

        if let Some(arr) = pred_arr {
            if (arr.with_timezone(&tz) - self.now).num_seconds() < 30 {
                record.status = TripStatus::Arrive;
            }
        }
        if let Some(dep) = pred_dep {
            let until_departure = (dep.with_timezone(&tz) - self.now).num_seconds();
            if until_departure <= 0 {
                record.status = if until_departure >= -30 {
                    TripStatus::Depart
                } else {
                    TripStatus::Irrelevant
                };
            }
        }
        if let (Some(arr), Some(dep)) = (pred_arr, pred_dep) {
            let arr = arr.with_timezone(&tz);
            let dep = dep.with_timezone(&tz);
            if self.now >= arr && self.now < dep {
                record.status = TripStatus::Board;
            }
        }

        record.vehicle = rt.vehicle_label(&record.trip_id);
        record.realtime = true;

        // Nothing predicted for this stop at all: a schedule time purely in
        // the past cannot be shown as upcoming
        if pred_arr.is_none() && pred_dep.is_none() {
            if let Some(dep) = record.sched_departure {
                if self.now > dep {
                    record.status = TripStatus::Irrelevant;
                }
            }
            if let Some(arr) = record.sched_arrival {
                if self.now > arr {
                    record.status = TripStatus::Irrelevant;
                }
            }
        }
    }

    /// Wait reference, stop status and schedule offset for a stop with
    /// (possibly partial) schedule and prediction data.
    ///
    /// The wait countdown prefers a predicted arrival, except that a stop
    /// scheduled with a departure only counts down to the predicted
    /// departure. Without any prediction the schedule-derived wait stands.
    fn fill_wait_and_status(
        &self,
        record: &mut TripRecord,
        pred_arr: Option<DateTime<chrono::Utc>>,
        pred_dep: Option<DateTime<chrono::Utc>>,
    ) {
        let tz = self.schedule.meta.timezone;
        let rt_arrival = pred_arr.map(|t| t.with_timezone(&tz));
        let rt_departure = pred_dep.map(|t| t.with_timezone(&tz));
        record.rt_arrival = rt_arrival;
        record.rt_departure = rt_departure;

        let has_sched_arr = record.sched_arrival.is_some();
        let has_sched_dep = record.sched_departure.is_some();

        record.stop_status = match (rt_arrival.is_some(), rt_departure.is_some()) {
            (false, false) => StopStatus::Schd,
            (has_pa, has_pd) => {
                let crossed_only = (!has_sched_arr && has_sched_dep && has_pa && !has_pd)
                    || (has_sched_arr && !has_sched_dep && !has_pa && has_pd);
                if (!has_sched_arr && !has_sched_dep) || crossed_only {
                    StopStatus::Pred
                } else {
                    StopStatus::Full
                }
            }
        };

        let wait_reference = match (rt_arrival, rt_departure) {
            (None, None) => None,
            (Some(arr), None) => Some(arr),
            (None, Some(dep)) => Some(dep),
            (Some(arr), Some(dep)) => {
                // A departure-only schedule counts down to departing
                if !has_sched_arr && has_sched_dep {
                    Some(dep)
                } else {
                    Some(arr)
                }
            }
        };
        if let Some(reference) = wait_reference {
            record.wait_time_sec = (reference - self.now).num_seconds();
        }

        record.offset_seconds = match (record.sched_arrival, rt_arrival) {
            (Some(sched), Some(pred)) => (pred - sched).num_seconds(),
            _ => match (record.sched_departure, rt_departure) {
                (Some(sched), Some(pred)) => (pred - sched).num_seconds(),
                _ => 0,
            },
        };
    }

    fn build_supplemental(
        &self,
        trip_id: &str,
        stop_sequence: u32,
        stop_id: &str,
        rt: &RealtimeStore,
    ) -> TripRecord {
        let tz = self.schedule.meta.timezone;
        // Added trips have no static schedule to reconcile against; their
        // updates carry absolute times or nothing
        let (pred_arr, pred_dep) =
            rt.stop_actual_time(trip_id, stop_sequence, stop_id, tz, &[], self.service_date);

        let headsign = rt
            .final_stop_of_added_trip(trip_id)
            .map(|final_stop| {
                self.schedule
                    .stop(&final_stop)
                    .map(|s| s.name.clone())
                    .unwrap_or(final_stop)
            })
            .unwrap_or_default();

        let mut record = TripRecord {
            trip_id: trip_id.to_string(),
            stop_id: stop_id.to_string(),
            stop_sequence,
            stop_index: 0,
            service_date: self.service_date,
            status: TripStatus::Running,
            stop_status: StopStatus::Splm,
            realtime: true,
            rt_arrival: None,
            rt_departure: None,
            sched_arrival: None,
            sched_departure: None,
            sort_time: None,
            wait_time_sec: 0,
            offset_seconds: 0,
            headsign,
            pickup_type: 0,
            drop_off_type: 0,
            trip_begins: false,
            trip_terminates: false,
            vehicle: rt.vehicle_label(trip_id),
            first_departure: None,
        };

        if let Some(dep) = pred_dep {
            let dep = dep.with_timezone(&tz);
            record.rt_departure = Some(dep);
            record.wait_time_sec = (dep - self.now).num_seconds();
        }
        if let Some(arr) = pred_arr {
            // The countdown always prefers time-until-arrival when known
            let arr = arr.with_timezone(&tz);
            record.rt_arrival = Some(arr);
            record.wait_time_sec = (arr - self.now).num_seconds();
        }

        if let Some(arr) = record.rt_arrival {
            if (arr - self.now).num_seconds() < 30 {
                record.status = TripStatus::Arrive;
            }
        }
        if let Some(dep) = record.rt_departure {
            let until_departure = (dep - self.now).num_seconds();
            if until_departure <= 0 {
                record.status = if until_departure >= -30 {
                    TripStatus::Depart
                } else {
                    TripStatus::Irrelevant
                };
            }
        }
        if let (Some(arr), Some(dep)) = (record.rt_arrival, record.rt_departure) {
            if self.now >= arr && self.now < dep {
                record.status = TripStatus::Board;
            }
        }
        record
    }

    /// Window rules: look-ahead 0 disables every upper bound; a scheduled
    /// time equal to now is kept; realtime-tracked trips linger 60 seconds,
    /// cancellations and skips two minutes past their scheduled time.
    fn invalidated(&self, record: &TripRecord) -> bool {
        if record.status == TripStatus::Irrelevant {
            return true;
        }
        let bounded = self.lookahead_mins != 0;

        let reference = if record.realtime && record.stop_status != StopStatus::Schd {
            record.rt_arrival.or(record.rt_departure)
        } else {
            record.sched_arrival.or(record.sched_departure)
        };

        if bounded {
            let schedule_like =
                record.status == TripStatus::Schedule || record.stop_status == StopStatus::Schd;
            if schedule_like {
                if let Some(t) = reference {
                    if t > self.lookahead_until {
                        return true;
                    }
                }
            }
            if record.status == TripStatus::NoSchedule {
                if let Some(sort) = record.sort_time {
                    if sort > self.lookahead_until {
                        return true;
                    }
                }
            }
        }

        match record.status {
            TripStatus::Schedule => {
                if let Some(t) = reference {
                    if (t - self.now).num_seconds() < 0 {
                        return true;
                    }
                }
            }
            TripStatus::NoSchedule => {
                if let Some(sort) = record.sort_time {
                    if self.now > sort {
                        return true;
                    }
                }
            }
            TripStatus::Running | TripStatus::Depart | TripStatus::Board | TripStatus::Arrive
                if record.realtime =>
            {
                let tracked = record.rt_arrival.or(record.rt_departure);
                if let Some(t) = tracked {
                    if (t - self.now).num_seconds() < -60 || (bounded && t > self.lookahead_until) {
                        return true;
                    }
                }
            }
            TripStatus::Cancel | TripStatus::Skip if record.realtime => {
                let scheduled = record.sched_arrival.or(record.sched_departure);
                if let Some(t) = scheduled {
                    let seconds = (t - self.now).num_seconds();
                    if seconds < -120 || (bounded && seconds > self.lookahead_mins * 60) {
                        return true;
                    }
                }
            }
            _ => {}
        }
        false
    }
}
