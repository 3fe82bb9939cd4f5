use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Reader};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::retry::poll_until;

/// Creates `root/month_folder` and returns both as absolute paths.
pub fn prepare_month_dir(root: &Path, month_folder: &str) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(root).with_context(|| format!("Failed to create {:?}", root))?;
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {:?}", root))?;
    let month_dir = root.join(month_folder);
    fs::create_dir_all(&month_dir)
        .with_context(|| format!("Failed to create {:?}", month_dir))?;
    Ok((root, month_dir))
}

/// File names present in a directory at one point in time.
pub type Snapshot = BTreeSet<String>;

pub fn snapshot(dir: &Path) -> Result<Snapshot> {
    let mut names = Snapshot::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Names in `after` that were not in `before` and carry `extension`, sorted.
pub fn new_files(before: &Snapshot, after: &Snapshot, extension: &str) -> Vec<String> {
    after
        .difference(before)
        .filter(|name| has_extension(name, extension))
        .cloned()
        .collect()
}

/// Waits for a new `extension` file to land in `dir` that was not in `before`.
pub async fn wait_for_download(
    dir: &Path,
    before: &Snapshot,
    extension: &str,
    timeout: Duration,
    interval: Duration,
) -> Option<PathBuf> {
    let found = poll_until(timeout, interval, move || async move {
        let after = snapshot(dir).ok()?;
        new_files(before, &after, extension).into_iter().next()
    })
    .await;

    match found {
        Some(name) => {
            let path = dir.join(name);
            info!("Detected downloaded file: {}", path.display());
            Some(path)
        }
        None => {
            info!("No downloaded file detected.");
            None
        }
    }
}

fn unsafe_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("valid file name pattern"))
}

pub fn sanitize_file_component(label: &str) -> String {
    unsafe_chars().replace_all(label.trim(), "_").into_owned()
}

/// `"{prefix} - {label}.{extension}"`, with characters that cannot appear in
/// a file name replaced by `_`.
pub fn report_file_name(prefix: &str, label: &str, extension: &str) -> String {
    format!("{} - {}.{}", prefix, sanitize_file_component(label), extension)
}

/// Moves `downloaded` to `dir/file_name`, replacing any previous file.
pub fn move_into_place(downloaded: &Path, dir: &Path, file_name: &str) -> Result<PathBuf> {
    let target = dir.join(file_name);
    if target != downloaded && target.exists() {
        fs::remove_file(&target)
            .with_context(|| format!("Failed to replace existing {:?}", target))?;
    }
    fs::rename(downloaded, &target)
        .with_context(|| format!("Failed to rename {:?} to {:?}", downloaded, target))?;
    info!("Renamed '{}' to '{}'", downloaded.display(), target.display());
    Ok(target)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetSummary {
    pub name: String,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkbookSummary {
    pub sheets: Vec<SheetSummary>,
}

impl WorkbookSummary {
    pub fn total_rows(&self) -> usize {
        self.sheets.iter().map(|s| s.rows).sum()
    }
}

/// Reads sheet names and row counts back from a downloaded workbook.
pub fn inspect_workbook(path: &Path) -> Result<WorkbookSummary> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook {:?}", path))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let rows = match workbook.worksheet_range(&name) {
            Ok(range) => range.height(),
            Err(e) => {
                warn!("Could not read sheet '{}' of {}: {}", name, path.display(), e);
                0
            }
        };
        sheets.push(SheetSummary { name, rows });
    }

    Ok(WorkbookSummary { sheets })
}
