//! Service calendars from calendar.txt and calendar_dates.txt.

use std::collections::HashMap;
use std::path::Path;

use chrono::{Datelike, NaiveDate, Weekday};
use tracing::{info, warn};

use super::error::ScheduleError;

/// A regular weekly service pattern (one calendar.txt row).
#[derive(Debug, Clone)]
pub struct Calendar {
    /// mon..sun
    pub days: [bool; 7],
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// One calendar_dates.txt exception.
#[derive(Debug, Clone)]
pub struct CalendarDate {
    pub date: NaiveDate,
    /// 1 = service added, 2 = service removed
    pub exception_type: i32,
}

/// Operating-day database: weekly patterns plus per-date overrides.
/// At least one of the two source files must exist.
#[derive(Debug, Default)]
pub struct CalendarDb {
    pub services: HashMap<String, Calendar>,
    pub overrides: HashMap<String, Vec<CalendarDate>>,
}

impl CalendarDb {
    pub fn load(data_root: &Path) -> Result<Self, ScheduleError> {
        let mut db = Self::default();

        let calendar_path = data_root.join("calendar.txt");
        if calendar_path.exists() {
            db.load_calendar(&calendar_path)?;
            info!(services = db.services.len(), "Parsed calendar");
        }

        let dates_path = data_root.join("calendar_dates.txt");
        if dates_path.exists() {
            db.load_calendar_dates(&dates_path)?;
            let total: usize = db.overrides.values().map(|v| v.len()).sum();
            info!(services = db.overrides.len(), exceptions = total, "Parsed calendar_dates");
        }

        if !calendar_path.exists() && !dates_path.exists() {
            return Err(ScheduleError::MissingFile(calendar_path));
        }

        Ok(db)
    }

    fn load_calendar(&mut self, path: &Path) -> Result<(), ScheduleError> {
        let mut rdr = csv::Reader::from_reader(std::fs::File::open(path)?);
        let headers = rdr.headers()?.clone();

        let idx_service = headers
            .iter()
            .position(|h| h == "service_id")
            .ok_or(ScheduleError::MissingColumn { file: "calendar.txt", column: "service_id" })?;
        let day_columns = ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"];
        let idx_days: Vec<Option<usize>> = day_columns
            .iter()
            .map(|name| headers.iter().position(|h| h == *name))
            .collect();
        let idx_start = headers
            .iter()
            .position(|h| h == "start_date")
            .ok_or(ScheduleError::MissingColumn { file: "calendar.txt", column: "start_date" })?;
        let idx_end = headers
            .iter()
            .position(|h| h == "end_date")
            .ok_or(ScheduleError::MissingColumn { file: "calendar.txt", column: "end_date" })?;

        let mut skipped = 0usize;
        for result in rdr.records() {
            let Ok(record) = result else {
                skipped += 1;
                continue;
            };
            let service_id = record.get(idx_service).unwrap_or("").to_string();
            let start_date = record.get(idx_start).and_then(parse_yyyymmdd);
            let end_date = record.get(idx_end).and_then(parse_yyyymmdd);
            let (Some(start_date), Some(end_date)) = (start_date, end_date) else {
                skipped += 1;
                continue;
            };
            if service_id.is_empty() {
                skipped += 1;
                continue;
            }

            let mut days = [false; 7];
            for (day, idx) in days.iter_mut().zip(&idx_days) {
                *day = idx
                    .and_then(|i| record.get(i))
                    .and_then(|s| s.parse::<i32>().ok())
                    .map(|v| v == 1)
                    .unwrap_or(false);
            }

            self.services.insert(service_id, Calendar { days, start_date, end_date });
        }
        if skipped > 0 {
            warn!(skipped, "Skipped calendar.txt records (empty/unparseable)");
        }
        Ok(())
    }

    fn load_calendar_dates(&mut self, path: &Path) -> Result<(), ScheduleError> {
        let mut rdr = csv::Reader::from_reader(std::fs::File::open(path)?);
        let headers = rdr.headers()?.clone();

        let idx_service = headers
            .iter()
            .position(|h| h == "service_id")
            .ok_or(ScheduleError::MissingColumn { file: "calendar_dates.txt", column: "service_id" })?;
        let idx_date = headers
            .iter()
            .position(|h| h == "date")
            .ok_or(ScheduleError::MissingColumn { file: "calendar_dates.txt", column: "date" })?;
        let idx_type = headers
            .iter()
            .position(|h| h == "exception_type")
            .ok_or(ScheduleError::MissingColumn { file: "calendar_dates.txt", column: "exception_type" })?;

        let mut skipped = 0usize;
        for result in rdr.records() {
            let Ok(record) = result else {
                skipped += 1;
                continue;
            };
            let service_id = record.get(idx_service).unwrap_or("").to_string();
            let Some(date) = record.get(idx_date).and_then(parse_yyyymmdd) else {
                skipped += 1;
                continue;
            };
            let exception_type = record
                .get(idx_type)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if service_id.is_empty() {
                skipped += 1;
                continue;
            }

            self.overrides
                .entry(service_id)
                .or_default()
                .push(CalendarDate { date, exception_type });
        }
        if skipped > 0 {
            warn!(skipped, "Skipped calendar_dates.txt records (empty/unparseable)");
        }
        Ok(())
    }

    /// Does a service operate on a date? A per-date override wins outright;
    /// otherwise the date must fall inside the (inclusive) range and on an
    /// operating weekday. A service known only through added dates is off on
    /// every other day.
    pub fn running(&self, service_id: &str, date: NaiveDate) -> bool {
        if let Some(exceptions) = self.overrides.get(service_id) {
            for exc in exceptions {
                if exc.date == date {
                    return exc.exception_type == 1;
                }
            }
        }

        let Some(cal) = self.services.get(service_id) else {
            return false;
        };
        if date < cal.start_date || date > cal.end_date {
            return false;
        }
        cal.days[weekday_index(date.weekday())]
    }

    /// Long-form operating days, e.g. `"MON TUE FRI "`.
    pub fn operating_days(&self, service_id: &str) -> String {
        let names = ["MON ", "TUE ", "WED ", "THU ", "FRI ", "SAT ", "SUN "];
        let mut out = String::new();
        if let Some(cal) = self.services.get(service_id) {
            for (on, name) in cal.days.iter().zip(names) {
                if *on {
                    out.push_str(name);
                }
            }
        }
        out
    }

    /// Fixed-width weekly grid, e.g. `"MoTuWeThFr    "`.
    pub fn condensed_days(&self, service_id: &str) -> String {
        let names = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];
        let mut out = String::new();
        let days = self
            .services
            .get(service_id)
            .map(|cal| cal.days)
            .unwrap_or([false; 7]);
        for (on, name) in days.iter().zip(names) {
            out.push_str(if *on { name } else { "  " });
        }
        out
    }

    pub fn added_dates(&self, service_id: &str) -> String {
        self.override_dates(service_id, 1)
    }

    pub fn removed_dates(&self, service_id: &str) -> String {
        self.override_dates(service_id, 2)
    }

    pub fn has_added_dates(&self, service_id: &str) -> bool {
        self.count_overrides(service_id, 1) != 0
    }

    pub fn has_removed_dates(&self, service_id: &str) -> bool {
        self.count_overrides(service_id, 2) != 0
    }

    pub fn start_date(&self, service_id: &str) -> Option<NaiveDate> {
        self.services.get(service_id).map(|cal| cal.start_date)
    }

    pub fn end_date(&self, service_id: &str) -> Option<NaiveDate> {
        self.services.get(service_id).map(|cal| cal.end_date)
    }

    pub fn record_count(&self) -> usize {
        self.services.len() + self.overrides.values().map(|v| v.len()).sum::<usize>()
    }

    fn override_dates(&self, service_id: &str, exception_type: i32) -> String {
        let mut out = String::new();
        if let Some(exceptions) = self.overrides.get(service_id) {
            for exc in exceptions {
                if exc.exception_type == exception_type {
                    out.push_str(&exc.date.format("%d%b%Y").to_string());
                    out.push(' ');
                }
            }
        }
        out
    }

    fn count_overrides(&self, service_id: &str, exception_type: i32) -> usize {
        self.overrides
            .get(service_id)
            .map(|excs| excs.iter().filter(|e| e.exception_type == exception_type).count())
            .unwrap_or(0)
    }
}

fn weekday_index(weekday: Weekday) -> usize {
    match weekday {
        Weekday::Mon => 0,
        Weekday::Tue => 1,
        Weekday::Wed => 2,
        Weekday::Thu => 3,
        Weekday::Fri => 4,
        Weekday::Sat => 5,
        Weekday::Sun => 6,
    }
}

/// Parse a GTFS `YYYYMMDD` date.
pub fn parse_yyyymmdd(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[4..6].parse().ok()?;
    let day: u32 = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}
