use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;

pub const PORTAL_DATE_FORMAT: &str = "%d/%m/%Y";

/// Report window: first day of the current month up to tomorrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn month_to_tomorrow(now: DateTime<FixedOffset>) -> Self {
        let today = now.date_naive();
        let start = today.with_day(1).unwrap_or(today);
        let end = today + Duration::days(1);
        Self { start, end }
    }

    pub fn start_str(&self) -> String {
        self.start.format(PORTAL_DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(PORTAL_DATE_FORMAT).to_string()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start_str(), self.end_str())
    }
}

pub fn fixed_offset(hours: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
        .ok_or_else(|| anyhow::anyhow!("Invalid UTC offset: {} hours", hours))
}

pub fn now_in(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset)
}

/// Folder name for the run's month, e.g. `October 2026`.
pub fn month_folder_name(now: DateTime<FixedOffset>) -> String {
    now.format("%B %Y").to_string()
}

pub fn log_file_name(now: DateTime<FixedOffset>) -> String {
    format!(
        "Tracking Networks Downloaded and Skipped [{}].txt",
        now.format("%Y-%m-%d")
    )
}
