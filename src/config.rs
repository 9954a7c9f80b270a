//! Server configuration: an INI file named on the command line, plus a
//! handful of debugging switches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "stopcast", version, about = "GTFS schedule and realtime reconciliation server")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', value_name = "path")]
    pub config: PathBuf,

    /// Show every transaction and realtime update
    #[arg(short = 'i')]
    pub log_transactions: bool,

    /// Freeze the server on this local time for all requests
    #[arg(short = 'f', value_name = "y,m,d,h,m,s")]
    pub frozen_time: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_path: PathBuf,
    pub server_port: u16,
    pub clock_12h: bool,
    pub number_threads: usize,
    /// 0 = unbounded
    pub nex_trips_per_route: u32,
    pub hide_terminating: bool,
    pub z_options: Vec<String>,
    pub realtime_feed_location: String,
    pub skip_stop_seq_match: bool,
    /// 0 = service date, 1 = actual date, 2 = no matching
    pub service_date_match: u32,
    pub update_interval_secs: u64,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;
        Self::from_ini(&content)
    }

    pub fn from_ini(content: &str) -> Result<Self, ConfigError> {
        let values = parse_ini(content);
        let get = |key: &str| values.get(key).map(String::as_str);

        let data_path = get("static/dataPath")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::ParseError("static/dataPath is required".into()))?;
        let server_port = get("static/serverPort")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ConfigError::ParseError("static/serverPort is required".into()))?;

        Ok(Self {
            data_path,
            server_port,
            clock_12h: get("static/clock12hFormat").map(parse_bool).unwrap_or(false),
            number_threads: get("static/numberThreads")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(4),
            nex_trips_per_route: get("static/nexTripsPerRoute")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            hide_terminating: get("static/hideTerminating").map(parse_bool).unwrap_or(false),
            z_options: get("static/zOptions")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            realtime_feed_location: get("realtime/feedLocation").unwrap_or("").to_string(),
            skip_stop_seq_match: get("realtime/skipStopSeqMatch").map(parse_bool).unwrap_or(false),
            service_date_match: get("realtime/serviceDateMatch")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            update_interval_secs: get("realtime/updateInterval")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(60),
        })
    }

    pub fn has_z_option(&self, option: &str) -> bool {
        self.z_options.iter().any(|o| o == option)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Minimal INI reader: `[section]` headers, `key = value` pairs, `;`/`#`
/// comments. Keys come out as `section/key`.
fn parse_ini(content: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let mut section = String::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_string();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(
                format!("{}/{}", section, key.trim()),
                value.trim().to_string(),
            );
        }
    }
    values
}

/// `-f y,m,d,h,m,s` into an agency-local instant.
pub fn parse_frozen_time(
    spec: &str,
    tz: chrono_tz::Tz,
) -> Option<chrono::DateTime<chrono_tz::Tz>> {
    use chrono::TimeZone;
    let parts: Vec<i32> = spec.split(',').filter_map(|p| p.trim().parse().ok()).collect();
    if parts.len() != 6 {
        return None;
    }
    tz.with_ymd_and_hms(
        parts[0],
        parts[1] as u32,
        parts[2] as u32,
        parts[3] as u32,
        parts[4] as u32,
        parts[5] as u32,
    )
    .single()
}
