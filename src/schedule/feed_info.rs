//! Feed-level metadata from feed_info.txt and agency.txt.
//!
//! The first agency's timezone governs every time conversion the server
//! performs, so agency.txt is the one file that must parse cleanly.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

use super::calendar::parse_yyyymmdd;
use super::error::ScheduleError;

#[derive(Debug, Clone)]
pub struct Agency {
    pub id: String,
    pub name: String,
    pub url: String,
    pub timezone: String,
    pub lang: String,
    pub phone: String,
}

#[derive(Debug, Clone)]
pub struct FeedMeta {
    pub publisher: String,
    pub url: String,
    pub language: String,
    pub version: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub agencies: Vec<Agency>,
    pub timezone: Tz,
    /// Modification time of agency.txt, reported to clients as the revision
    /// of the whole static dataset.
    pub static_modified: Option<DateTime<Utc>>,
}

impl FeedMeta {
    pub fn load(data_root: &Path) -> Result<Self, ScheduleError> {
        let (publisher, url, language, version, start_date, end_date) =
            match load_feed_info(&data_root.join("feed_info.txt"))? {
                Some(info) => info,
                None => {
                    info!("No feed_info.txt present, using defaults");
                    let not_provided = "Not Provided".to_string();
                    (not_provided.clone(), not_provided.clone(), not_provided.clone(), not_provided, None, None)
                }
            };

        let agency_path = data_root.join("agency.txt");
        if !agency_path.exists() {
            return Err(ScheduleError::MissingFile(agency_path));
        }
        let agencies = load_agencies(&agency_path)?;
        let Some(first) = agencies.first() else {
            return Err(ScheduleError::ParseError("agency.txt contains no agencies".into()));
        };
        let timezone: Tz = first
            .timezone
            .parse()
            .map_err(|_| ScheduleError::BadTimezone(first.timezone.clone()))?;
        info!(agencies = agencies.len(), timezone = %timezone, "Parsed agency");

        let static_modified = std::fs::metadata(&agency_path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .ok();

        Ok(Self {
            publisher,
            url,
            language,
            version,
            start_date,
            end_date,
            agencies,
            timezone,
            static_modified,
        })
    }

    pub fn record_count(&self) -> usize {
        // feed_info contributes one logical record
        self.agencies.len() + 1
    }
}

type FeedInfoFields = (String, String, String, String, Option<NaiveDate>, Option<NaiveDate>);

fn load_feed_info(path: &Path) -> Result<Option<FeedInfoFields>, ScheduleError> {
    if !path.exists() {
        return Ok(None);
    }
    let mut rdr = csv::Reader::from_reader(std::fs::File::open(path)?);
    let headers = rdr.headers()?.clone();

    let idx_pub = headers.iter().position(|h| h == "feed_publisher_name");
    let idx_url = headers.iter().position(|h| h == "feed_publisher_url");
    let idx_lang = headers.iter().position(|h| h == "feed_lang");
    let idx_ver = headers.iter().position(|h| h == "feed_version");
    let idx_start = headers.iter().position(|h| h == "feed_start_date");
    let idx_end = headers.iter().position(|h| h == "feed_end_date");

    let Some(record) = rdr.records().next().transpose()? else {
        warn!("feed_info.txt has no data row");
        return Ok(None);
    };

    let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("").to_string();
    Ok(Some((
        field(idx_pub),
        field(idx_url),
        field(idx_lang).to_uppercase(),
        field(idx_ver),
        idx_start.and_then(|i| record.get(i)).and_then(parse_yyyymmdd),
        idx_end.and_then(|i| record.get(i)).and_then(parse_yyyymmdd),
    )))
}

fn load_agencies(path: &Path) -> Result<Vec<Agency>, ScheduleError> {
    let mut rdr = csv::Reader::from_reader(std::fs::File::open(path)?);
    let headers = rdr.headers()?.clone();

    let idx_id = headers.iter().position(|h| h == "agency_id");
    let idx_name = headers.iter().position(|h| h == "agency_name");
    let idx_url = headers.iter().position(|h| h == "agency_url");
    let idx_tz = headers
        .iter()
        .position(|h| h == "agency_timezone")
        .ok_or(ScheduleError::MissingColumn { file: "agency.txt", column: "agency_timezone" })?;
    let idx_lang = headers.iter().position(|h| h == "agency_lang");
    // Some feeds publish an email address in place of a phone number
    let idx_phone = headers
        .iter()
        .position(|h| h == "agency_phone" || h == "agency_email");

    let mut agencies = Vec::new();
    for result in rdr.records() {
        let Ok(record) = result else {
            warn!("Skipped unparseable agency.txt record");
            continue;
        };
        let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("").to_string();
        agencies.push(Agency {
            id: field(idx_id),
            name: field(idx_name),
            url: field(idx_url),
            timezone: record.get(idx_tz).unwrap_or("").to_string(),
            lang: field(idx_lang),
            phone: field(idx_phone),
        });
    }
    Ok(agencies)
}
