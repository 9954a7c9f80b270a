use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("required file missing: {0}")]
    MissingFile(PathBuf),
    #[error("{file} missing required column {column}")]
    MissingColumn { file: &'static str, column: &'static str },
    #[error("unrecognized agency timezone: {0}")]
    BadTimezone(String),
    #[error("schedule parse error: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_display() {
        let err = ScheduleError::MissingColumn {
            file: "stop_times.txt",
            column: "trip_id",
        };
        assert_eq!(err.to_string(), "stop_times.txt missing required column trip_id");
    }

    #[test]
    fn bad_timezone_display() {
        let err = ScheduleError::BadTimezone("Mars/Olympus".into());
        assert_eq!(err.to_string(), "unrecognized agency timezone: Mars/Olympus");
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: ScheduleError = io_err.into();
        assert!(matches!(err, ScheduleError::IoError(_)));
        assert!(err.to_string().contains("no such file"));
    }
}
