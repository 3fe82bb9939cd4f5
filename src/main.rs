use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

mod archive;
mod chromedriver_manager;
mod config;
mod dates;
mod downloads;
mod logging;
mod models;
mod retry;
mod scraper;

use chromedriver_manager::ChromeDriverManager;
use config::{AppConfig, Credentials};
use dates::DateRange;
use models::RunReport;
use scraper::browser::ChromeLauncher;
use scraper::{RunSettings, ScraperEngine};

/// Downloads the PGB Daily Gas Movement report for every network and
/// measurement point, then archives the month's folder.
#[derive(Parser, Debug)]
#[command(name = "gms_report_fetcher", version, about)]
struct Cli {
    /// JSON config file (defaults to the per-user config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder for the monthly download folders
    #[arg(long)]
    downloads_root: Option<PathBuf>,

    /// Use an already running WebDriver instead of a managed chromedriver
    #[arg(long)]
    webdriver_url: Option<String>,

    /// Port for the managed chromedriver
    #[arg(long)]
    port: Option<u16>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Skip zipping the month folder
    #[arg(long)]
    no_archive: bool,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    init_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(root) = &self.downloads_root {
            config.downloads_root = root.clone();
        }
        if let Some(url) = &self.webdriver_url {
            config.webdriver_url = Some(url.clone());
        }
        if let Some(port) = self.port {
            config.webdriver_port = port;
        }
        if self.headed {
            config.headless = false;
        }
        if self.no_archive {
            config.create_archive = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.ensure_valid()?;

    if cli.init_config {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => AppConfig::config_path()?,
        };
        config.save(&path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let offset = dates::fixed_offset(config.utc_offset_hours)?;
    let now = dates::now_in(offset);
    let month_folder = dates::month_folder_name(now);

    let (downloads_root, download_dir) =
        downloads::prepare_month_dir(&config.downloads_root, &month_folder)?;

    logging::init(&download_dir.join(dates::log_file_name(now)))?;
    info!("Starting gms_report_fetcher...");
    info!("Downloads go to {}", download_dir.display());

    let credentials = Credentials::from_env()?;

    let chromedriver = match &config.webdriver_url {
        Some(url) => {
            info!("Using WebDriver at {}", url);
            None
        }
        None => {
            let manager = Arc::new(ChromeDriverManager::new()?);
            info!("Using chromedriver at {}", manager.driver_path().display());
            manager.start_driver(config.webdriver_port).await?;
            Some(manager)
        }
    };

    let date_range = DateRange::month_to_tomorrow(now);
    let mut report = RunReport::new(now, date_range);
    let run = fetch_reports(
        &config,
        credentials,
        download_dir.clone(),
        chromedriver.clone(),
        &mut report,
    )
    .await;

    if let Some(manager) = &chromedriver {
        manager.stop_driver().await;
    }
    run?;

    report.log_summary();
    match report.save_json(&download_dir) {
        Ok(path) => info!("Run summary written to {}", path.display()),
        Err(e) => warn!("Could not write run summary: {:#}", e),
    }
    info!("Script finished.");

    if config.create_archive {
        let zip_path = downloads_root.join(format!("{}.zip", month_folder));
        archive::compress_dir(&download_dir, &zip_path)?;
        info!("Artifact is ready: {}", zip_path.display());
    }

    Ok(())
}

async fn fetch_reports(
    config: &AppConfig,
    credentials: Credentials,
    download_dir: PathBuf,
    chromedriver: Option<Arc<ChromeDriverManager>>,
    report: &mut RunReport,
) -> Result<()> {
    let mut launcher =
        ChromeLauncher::new(config, config.webdriver_endpoint(), download_dir.clone());
    if let Some(manager) = chromedriver {
        launcher = launcher.with_managed_driver(manager, config.webdriver_port);
    }
    let settings = RunSettings::from_config(config, download_dir);

    let mut engine = ScraperEngine::start(launcher, credentials, settings, report.date_range)
        .await
        .context("Initial login failed. Exiting.")?;

    let result = engine.run(report).await;
    engine.shutdown().await;

    result.map_err(|e| {
        error!("Run aborted: {}", e);
        anyhow::Error::new(e).context("Failed to retrieve the network list")
    })
}
