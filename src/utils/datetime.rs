//! Centralized datetime parsing and formatting.
//!
//! Timestamps are stored as RFC3339 TEXT; rows written by other tooling may
//! carry the bare SQLite format, so parsing stays flexible. All values are
//! normalized to UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DateTimeError {
    #[error("Invalid datetime format: '{input}' - expected RFC3339 (2023-01-01T12:00:00Z) or SQLite (2023-01-01 12:00:00)")]
    InvalidFormat { input: String },
}

pub struct DateTimeParser;

impl DateTimeParser {
    /// Parse a datetime from the formats used in the application.
    ///
    /// Supports RFC3339 with timezone or offset, and naive SQLite-style
    /// formats (assumed UTC).
    pub fn parse_flexible(datetime_str: &str) -> Result<DateTime<Utc>, DateTimeError> {
        let trimmed = datetime_str.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(dt.with_timezone(&Utc));
        }

        let naive_formats = [
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%dT%H:%M:%S%.f",
        ];

        for format in &naive_formats {
            if let Ok(naive_dt) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
            }
        }

        Err(DateTimeError::InvalidFormat {
            input: datetime_str.to_string(),
        })
    }

    /// Format a datetime for database storage (RFC3339).
    ///
    /// RFC3339 in UTC sorts lexicographically in timestamp order, which the
    /// due-schedule selection relies on.
    pub fn format_for_storage(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }
}
