use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dates::DateRange;
use crate::downloads::WorkbookSummary;

pub const SUMMARY_FILE_NAME: &str = "run-summary.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadResult {
    Downloaded { path: PathBuf },
    Skipped { reason: String },
    TimedOut,
}

impl fmt::Display for DownloadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downloaded { path } => write!(f, "Downloaded ({})", path.display()),
            Self::Skipped { reason } => write!(f, "Skipped ({})", reason),
            Self::TimedOut => write!(f, "Timed out"),
        }
    }
}

/// Outcome of one (network, measurement point) pair.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub network: String,
    pub measurement_point: Option<String>,
    pub result: DownloadResult,
    pub attempts: u32,
    pub page_load_timed_out: bool,
    pub workbook: Option<WorkbookSummary>,
    /// Earlier item of this run whose file the download replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<String>,
}

impl ItemReport {
    pub fn new(network: &str, measurement_point: Option<&str>, result: DownloadResult) -> Self {
        Self {
            network: network.to_string(),
            measurement_point: measurement_point.map(str::to_string),
            result,
            attempts: 1,
            page_load_timed_out: false,
            workbook: None,
            replaced: None,
        }
    }

    pub fn label(&self) -> String {
        match &self.measurement_point {
            Some(point) => format!("{} - {}", self.network, point),
            None => self.network.clone(),
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self.result, DownloadResult::Downloaded { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.result, DownloadResult::Skipped { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        self.page_load_timed_out || self.result == DownloadResult::TimedOut
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: chrono::DateTime<chrono::FixedOffset>,
    pub date_range: DateRange,
    pub networks: Vec<String>,
    pub items: Vec<ItemReport>,
}

impl RunReport {
    pub fn new(started_at: chrono::DateTime<chrono::FixedOffset>, date_range: DateRange) -> Self {
        Self {
            started_at,
            date_range,
            networks: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn record(&mut self, item: ItemReport) {
        info!("{}: {}", item.label(), item.result);
        self.items.push(item);
    }

    pub fn downloaded(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.is_downloaded())
            .map(ItemReport::label)
            .collect()
    }

    pub fn skipped(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.is_skipped())
            .map(ItemReport::label)
            .collect()
    }

    pub fn timed_out(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.is_timed_out())
            .map(ItemReport::label)
            .collect()
    }

    pub fn log_summary(&self) {
        let downloaded = self.downloaded();
        let skipped = self.skipped();
        let timed_out = self.timed_out();

        info!("=== Summary ===");
        info!("Total networks processed: {}", self.networks.len());
        info!("Downloaded items count: {}", downloaded.len());
        info!("Skipped items count: {}", skipped.len());
        info!("Items that timed out: {}", timed_out.len());

        if downloaded.is_empty() {
            info!("No items were downloaded.");
        } else {
            info!("Downloaded items:");
            for item in &downloaded {
                info!(" - {}", item);
            }
        }

        if skipped.is_empty() {
            info!("No items were skipped.");
        } else {
            info!("Skipped items:");
            for item in &skipped {
                info!(" - {}", item);
            }
        }

        if timed_out.is_empty() {
            info!("No items timed out.");
        } else {
            info!("Items that timed out:");
            for item in &timed_out {
                info!(" - {}", item);
            }
        }
    }

    pub fn save_json(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(SUMMARY_FILE_NAME);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report() -> RunReport {
        let offset = chrono::FixedOffset::east_opt(8 * 3600).unwrap();
        let now = offset.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap();
        RunReport::new(now, DateRange::month_to_tomorrow(now))
    }

    #[test]
    fn test_buckets() {
        let mut report = report();
        report.networks = vec!["North".to_string(), "South".to_string()];

        report.record(ItemReport::new(
            "North",
            Some("ABC-1"),
            DownloadResult::Downloaded {
                path: PathBuf::from("PGB Daily Gas Movement - ABC-1.xlsx"),
            },
        ));
        let mut slow = ItemReport::new(
            "North",
            Some("ABC-2"),
            DownloadResult::Skipped {
                reason: "no export button".to_string(),
            },
        );
        slow.page_load_timed_out = true;
        report.record(slow);
        report.record(ItemReport::new("South", None, DownloadResult::TimedOut));

        assert_eq!(report.downloaded(), vec!["North - ABC-1"]);
        assert_eq!(report.skipped(), vec!["North - ABC-2"]);
        assert_eq!(report.timed_out(), vec!["North - ABC-2", "South"]);
    }

    #[test]
    fn test_save_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = report();
        report.record(ItemReport::new("South", None, DownloadResult::TimedOut));

        let path = report.save_json(dir.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(value["date_range"]["start"], "2024-03-01");
        assert_eq!(value["items"][0]["result"]["status"], "timed_out");
        assert_eq!(value["items"][0]["measurement_point"], serde_json::Value::Null);
    }
}
