pub mod actions;
pub mod browser;
pub mod page;
pub mod selectors;

#[cfg(test)]
pub mod testing;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, Credentials, ReadyStrategy};
use crate::dates::DateRange;
use crate::downloads;
use crate::models::{DownloadResult, ItemReport, RunReport};
use crate::retry::RetryPolicy;
use actions::{select_dropdown, wait_for_page_ready, SelectionOutcome};
use page::{DateField, Dropdown, ExportOutcome, PageError, PageLauncher, ReportPage};

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub download_dir: PathBuf,
    pub file_prefix: String,
    pub file_extension: String,
    pub ready_strategy: ReadyStrategy,
    pub page_ready_timeout: Duration,
    pub page_ready_poll: Duration,
    pub download_timeout: Duration,
    pub download_poll: Duration,
    pub selection_policy: RetryPolicy,
    pub item_policy: RetryPolicy,
    pub settle_delay: Duration,
    pub item_cooldown: Duration,
    pub inspect_workbooks: bool,
}

impl RunSettings {
    pub fn from_config(config: &AppConfig, download_dir: PathBuf) -> Self {
        let timeouts = &config.timeouts;
        Self {
            download_dir,
            file_prefix: config.portal.file_prefix.clone(),
            file_extension: config.portal.file_extension.clone(),
            ready_strategy: config.ready_strategy,
            page_ready_timeout: timeouts.page_ready(),
            page_ready_poll: timeouts.page_ready_poll(),
            download_timeout: timeouts.download(),
            download_poll: timeouts.download_poll(),
            selection_policy: RetryPolicy::fixed(
                config.max_selection_attempts,
                timeouts.selection_retry_delay(),
            ),
            item_policy: RetryPolicy::fixed(config.max_item_attempts, Duration::ZERO),
            settle_delay: timeouts.settle_delay(),
            item_cooldown: timeouts.item_cooldown(),
            inspect_workbooks: config.inspect_workbooks,
        }
    }
}

/// Drives one browser session through every network / measurement point pair.
pub struct ScraperEngine<L: PageLauncher> {
    launcher: L,
    page: L::Page,
    credentials: Credentials,
    settings: RunSettings,
    date_range: DateRange,
    /// Set after a relaunch: the new page has no network selected yet.
    network_stale: bool,
    /// The session is gone and no working replacement exists yet.
    needs_relaunch: bool,
    /// Files written this run, by the label of the item that wrote them.
    written: HashMap<PathBuf, String>,
}

fn item_label(network: &str, point: Option<&str>) -> String {
    match point {
        Some(point) => format!("{} - {}", network, point),
        None => network.to_string(),
    }
}

fn exhausted_reason(attempts: u32, last_error: Option<&PageError>) -> String {
    match last_error {
        Some(e) => format!("browser session lost on all {} attempts: {}", attempts, e),
        None => format!("browser session lost on all {} attempts", attempts),
    }
}

impl<L: PageLauncher> ScraperEngine<L> {
    /// Launches the first session and logs in. Any failure here is fatal.
    pub async fn start(
        launcher: L,
        credentials: Credentials,
        settings: RunSettings,
        date_range: DateRange,
    ) -> Result<Self, PageError> {
        let page = launcher.launch().await?;
        if let Err(e) = page.login_and_navigate(&credentials).await {
            error!("Initial login and navigation failed: {}", e);
            if let Err(close_err) = page.close().await {
                debug!("Closing browser after failed login: {}", close_err);
            }
            return Err(e);
        }

        Ok(Self {
            launcher,
            page,
            credentials,
            settings,
            date_range,
            network_stale: false,
            needs_relaunch: false,
            written: HashMap::new(),
        })
    }

    pub async fn run(&mut self, report: &mut RunReport) -> Result<(), PageError> {
        info!(
            "Date range - Start: {}, End: {}",
            self.date_range.start_str(),
            self.date_range.end_str()
        );

        let networks = self.page.list_options(Dropdown::Network).await.map_err(|e| {
            error!("Could not read the network list: {}", e);
            e
        })?;
        info!("Found {} networks: {:?}", networks.len(), networks);
        report.networks = networks.clone();

        for network in &networks {
            self.process_network(network, report).await;
        }
        Ok(())
    }

    pub async fn shutdown(self) {
        match self.page.close().await {
            Ok(()) => info!("Driver quit."),
            Err(e) => warn!("Failed to quit browser cleanly: {}", e),
        }
    }

    /// Closes the current session and replaces it with a fresh, logged-in one.
    /// On failure the engine stays marked for relaunch.
    async fn reinitialize(&mut self) -> Result<(), PageError> {
        info!("Browser session lost. Reinitializing driver...");
        self.needs_relaunch = true;
        self.network_stale = true;
        if let Err(e) = self.page.close().await {
            debug!("Ignoring error while closing the old session: {}", e);
        }

        self.page = self.launcher.launch().await.map_err(|e| {
            error!("Failed to reinitialize driver: {}", e);
            e
        })?;
        if let Err(e) = self.page.login_and_navigate(&self.credentials).await {
            error!("Failed to log in after reinitializing: {}", e);
            return Err(PageError::session_lost("log in after relaunch", e.to_string()));
        }

        self.needs_relaunch = false;
        info!("Driver reinitialized and navigated back successfully");
        Ok(())
    }

    /// Relaunches first when an earlier failure left no usable session.
    async fn ensure_session(&mut self) -> Result<(), PageError> {
        if self.needs_relaunch {
            self.reinitialize().await?;
        }
        Ok(())
    }

    async fn select(&self, dropdown: Dropdown, text: &str) -> Result<SelectionOutcome, PageError> {
        let outcome = select_dropdown(
            &self.page,
            dropdown,
            text,
            &self.settings.selection_policy,
            self.settings.settle_delay,
        )
        .await?;
        sleep(self.settings.settle_delay).await;
        Ok(outcome)
    }

    async fn measurement_points(&mut self, network: &str) -> Result<Vec<String>, PageError> {
        if self.select(Dropdown::Network, network).await? == SelectionOutcome::Failed {
            return Err(PageError::interaction(
                "select network",
                format!("'{}' could not be selected", network),
            ));
        }
        self.network_stale = false;

        match self.page.list_options(Dropdown::MeasurementPoint).await {
            Ok(points) => Ok(points),
            Err(e) if e.is_session_lost() => Err(e),
            Err(e) => {
                error!("Error retrieving measurement points: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn process_network(&mut self, network: &str, report: &mut RunReport) {
        let policy = self.settings.item_policy;
        let mut points = None;
        let mut last_error = None;

        for attempt in policy.attempts() {
            if let Err(e) = self.ensure_session().await {
                last_error = Some(e);
                continue;
            }
            match self.measurement_points(network).await {
                Ok(found) => {
                    points = Some(found);
                    break;
                }
                Err(e) if e.is_session_lost() => {
                    warn!("{} while preparing network '{}'", e, network);
                    self.needs_relaunch = true;
                    last_error = Some(e);
                }
                Err(e) => {
                    error!("Skipping network '{}': {}", network, e);
                    let mut item = ItemReport::new(
                        network,
                        None,
                        DownloadResult::Skipped {
                            reason: e.to_string(),
                        },
                    );
                    item.attempts = attempt;
                    report.record(item);
                    return;
                }
            }
        }

        let Some(points) = points else {
            error!("Skipping network '{}': no working browser session", network);
            let mut item = ItemReport::new(
                network,
                None,
                DownloadResult::Skipped {
                    reason: exhausted_reason(policy.max_attempts, last_error.as_ref()),
                },
            );
            item.attempts = policy.max_attempts;
            report.record(item);
            return;
        };
        info!(
            "For network '{}', found {} measurement points: {:?}",
            network,
            points.len(),
            points
        );

        if points.is_empty() {
            info!("No measurement points for network '{}'; processing the network alone.", network);
            self.process_item(network, None, report).await;
            return;
        }

        for point in &points {
            self.process_item(network, Some(point), report).await;
        }
    }

    async fn process_item(&mut self, network: &str, point: Option<&str>, report: &mut RunReport) {
        let label = item_label(network, point);
        let policy = self.settings.item_policy;
        let mut last_error = None;

        for attempt in policy.attempts() {
            info!(
                "Processing '{}' (Attempt {}/{})",
                label, attempt, policy.max_attempts
            );
            if let Err(e) = self.ensure_session().await {
                last_error = Some(e);
                continue;
            }
            match self.attempt_item(network, point).await {
                Ok(mut item) => {
                    item.attempts = attempt;
                    report.record(item);
                    return;
                }
                Err(e) if e.is_session_lost() => {
                    warn!("{} for '{}'. Reinitializing driver and retrying...", e, label);
                    self.needs_relaunch = true;
                    last_error = Some(e);
                }
                Err(e) => {
                    error!("Error for '{}': {}. Skipping this combination.", label, e);
                    let mut item = ItemReport::new(
                        network,
                        point,
                        DownloadResult::Skipped {
                            reason: e.to_string(),
                        },
                    );
                    item.attempts = attempt;
                    report.record(item);
                    return;
                }
            }
        }

        let mut item = ItemReport::new(
            network,
            point,
            DownloadResult::Skipped {
                reason: exhausted_reason(policy.max_attempts, last_error.as_ref()),
            },
        );
        item.attempts = policy.max_attempts;
        report.record(item);
    }

    async fn set_date(&self, field: DateField, value: &str) -> Result<(), PageError> {
        match self.page.set_date(field, value).await {
            Ok(()) => {
                info!("Set {:?} date to {}", field, value);
                Ok(())
            }
            Err(e) if e.is_session_lost() => Err(e),
            Err(e) => {
                error!("Failed to set {:?} date: {}", field, e);
                Ok(())
            }
        }
    }

    async fn attempt_item(
        &mut self,
        network: &str,
        point: Option<&str>,
    ) -> Result<ItemReport, PageError> {
        let dir = &self.settings.download_dir;
        let before = downloads::snapshot(dir)
            .map_err(|e| PageError::interaction("list download directory", e.to_string()))?;

        let skipped = |reason: &str| {
            ItemReport::new(
                network,
                point,
                DownloadResult::Skipped {
                    reason: reason.to_string(),
                },
            )
        };

        if self.network_stale {
            if self.select(Dropdown::Network, network).await? == SelectionOutcome::Failed {
                return Ok(skipped("network could not be selected"));
            }
            self.network_stale = false;
        }
        if let Some(point) = point {
            if self.select(Dropdown::MeasurementPoint, point).await? == SelectionOutcome::Failed {
                return Ok(skipped("measurement point could not be selected"));
            }
        }

        self.set_date(DateField::Start, &self.date_range.start_str()).await?;
        self.set_date(DateField::End, &self.date_range.end_str()).await?;
        self.page.submit_search().await?;

        let label = item_label(network, point);
        let ready = wait_for_page_ready(
            &self.page,
            self.settings.ready_strategy,
            self.settings.page_ready_timeout,
            self.settings.page_ready_poll,
            &label,
        )
        .await;

        if self.page.trigger_export().await? == ExportOutcome::NotAvailable {
            info!("Skipping '{}' due to no export button.", label);
            let mut item = skipped("no export button");
            item.page_load_timed_out = !ready;
            return Ok(item);
        }

        let downloaded = downloads::wait_for_download(
            dir,
            &before,
            &self.settings.file_extension,
            self.settings.download_timeout,
            self.settings.download_poll,
        )
        .await;

        let mut item = match downloaded {
            Some(path) => {
                let file_name = downloads::report_file_name(
                    &self.settings.file_prefix,
                    point.unwrap_or(network),
                    &self.settings.file_extension,
                );
                let target = downloads::move_into_place(&path, dir, &file_name)
                    .map_err(|e| PageError::interaction("rename download", format!("{:#}", e)))?;

                let mut item =
                    ItemReport::new(network, point, DownloadResult::Downloaded { path: target.clone() });
                item.replaced = self
                    .written
                    .insert(target.clone(), label.clone())
                    .filter(|earlier| *earlier != label);
                if let Some(earlier) = &item.replaced {
                    warn!(
                        "'{}' overwrote the file downloaded earlier for '{}': {}",
                        label,
                        earlier,
                        target.display()
                    );
                }
                if self.settings.inspect_workbooks {
                    match downloads::inspect_workbook(&target) {
                        Ok(summary) => {
                            info!(
                                "Workbook has {} sheet(s), {} row(s)",
                                summary.sheets.len(),
                                summary.total_rows()
                            );
                            item.workbook = Some(summary);
                        }
                        Err(e) => warn!("Could not inspect {}: {:#}", target.display(), e),
                    }
                }
                item
            }
            None => {
                info!("No file downloaded for '{}'.", label);
                ItemReport::new(network, point, DownloadResult::TimedOut)
            }
        };
        item.page_load_timed_out = !ready;

        sleep(self.settings.item_cooldown).await;
        Ok(item)
    }
}
