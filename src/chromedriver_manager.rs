use anyhow::{Context, Result};
use async_trait::async_trait;
use directories::ProjectDirs;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const CFT_BASE: &str = "https://storage.googleapis.com/chrome-for-testing-public";
const LATEST_RELEASE_URL: &str =
    "https://googlechromelabs.github.io/chrome-for-testing/LATEST_RELEASE";
const READY_TIMEOUT_SECS: u64 = 15;

/// Chrome-for-Testing platform tag for the host, if one exists.
pub fn platform_tag(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("linux", "x86_64") => Some("linux64"),
        ("macos", "x86_64") => Some("mac-x64"),
        ("macos", "aarch64") => Some("mac-arm64"),
        ("windows", "x86_64") => Some("win64"),
        ("windows", "x86") => Some("win32"),
        _ => None,
    }
}

pub fn driver_file_name(os: &str) -> &'static str {
    if os == "windows" {
        "chromedriver.exe"
    } else {
        "chromedriver"
    }
}

pub fn download_url(version: &str, platform: &str) -> String {
    format!(
        "{}/{}/{}/chromedriver-{}.zip",
        CFT_BASE, version, platform, platform
    )
}

/// Endpoint naming the newest driver for a Chrome major version, or the
/// current stable one when the installed Chrome is unknown.
pub fn version_url(chrome_major: Option<u32>) -> String {
    match chrome_major {
        Some(major) => format!("{}_{}", LATEST_RELEASE_URL, major),
        None => format!("{}_STABLE", LATEST_RELEASE_URL),
    }
}

/// Drivers are cached per Chrome major version so a browser update picks up
/// a matching driver.
pub fn driver_cache_path(cache_dir: &Path, chrome_major: Option<u32>, os: &str) -> PathBuf {
    let channel = chrome_major
        .map(|major| major.to_string())
        .unwrap_or_else(|| "stable".to_string());
    cache_dir.join(channel).join(driver_file_name(os))
}

/// Pulls `major.minor.build.patch` out of `chrome --version` or `reg query` output.
pub fn parse_chrome_version(output: &str) -> Option<String> {
    let pattern = Regex::new(r"\b(\d+)\.(\d+)\.(\d+)\.(\d+)\b").ok()?;
    pattern.find(output).map(|m| m.as_str().to_string())
}

pub fn major_version(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

fn chrome_version_commands(os: &str) -> Vec<(&'static str, Vec<&'static str>)> {
    match os {
        "windows" => vec![
            (
                "reg",
                vec!["query", r"HKEY_CURRENT_USER\Software\Google\Chrome\BLBeacon", "/v", "version"],
            ),
            (
                "reg",
                vec!["query", r"HKEY_LOCAL_MACHINE\SOFTWARE\Google\Chrome\BLBeacon", "/v", "version"],
            ),
        ],
        "macos" => vec![(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            vec!["--version"],
        )],
        _ => ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
            .into_iter()
            .map(|program| (program, vec!["--version"]))
            .collect(),
    }
}

/// Version of the locally installed Chrome, if it can be found.
pub fn detect_chrome_version() -> Option<String> {
    for (program, args) in chrome_version_commands(std::env::consts::OS) {
        let Ok(output) = Command::new(program).args(&args).output() else {
            continue;
        };
        if !output.status.success() {
            continue;
        }
        if let Some(version) = parse_chrome_version(&String::from_utf8_lossy(&output.stdout)) {
            debug!("Chrome version {} reported by {}", version, program);
            return Some(version);
        }
    }
    None
}

/// A local driver process that can be brought back when it stops answering.
#[async_trait]
pub trait DriverService: Send + Sync {
    async fn restart(&self, port: u16) -> Result<()>;
}

/// Finds and extracts the driver binary from a Chrome-for-Testing archive,
/// whose entries look like `chromedriver-linux64/chromedriver`.
fn extract_driver(archive_path: &Path, file_name: &str, target: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if name.ends_with(&format!("/{}", file_name)) || name == file_name {
            debug!("Extracting: {}", name);
            let mut outfile = fs::File::create(target)?;
            std::io::copy(&mut entry, &mut outfile)?;
            make_executable(target)?;
            return Ok(());
        }
    }

    anyhow::bail!("{} not found in {:?}", file_name, archive_path)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Downloads (once) and runs a local chromedriver for the session.
pub struct ChromeDriverManager {
    driver_path: PathBuf,
    chrome_major: Option<u32>,
    process: Arc<Mutex<Option<Child>>>,
}

impl ChromeDriverManager {
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "gms", "gms-report-fetcher")
            .ok_or_else(|| anyhow::anyhow!("Could not determine cache directory"))?;

        let chrome_version = detect_chrome_version();
        match &chrome_version {
            Some(version) => info!("Detected Chrome {}", version),
            None => warn!("Could not detect the installed Chrome; using the latest stable ChromeDriver"),
        }
        let chrome_major = chrome_version.as_deref().and_then(major_version);
        let driver_path =
            driver_cache_path(proj_dirs.cache_dir(), chrome_major, std::env::consts::OS);

        let mut manager = Self::with_driver_path(driver_path);
        manager.chrome_major = chrome_major;
        Ok(manager)
    }

    pub fn with_driver_path(driver_path: PathBuf) -> Self {
        Self {
            driver_path,
            chrome_major: None,
            process: Arc::new(Mutex::new(None)),
        }
    }

    pub fn driver_path(&self) -> &Path {
        &self.driver_path
    }

    pub async fn ensure_driver_available(&self) -> Result<()> {
        if self.driver_path.exists() {
            debug!("ChromeDriver found at {:?}", self.driver_path);
            return Ok(());
        }

        info!("ChromeDriver not found at {:?}, downloading...", self.driver_path);
        self.download_chromedriver()
            .await
            .context("Failed to download ChromeDriver. Please check your internet connection.")
    }

    pub async fn start_driver(&self, port: u16) -> Result<()> {
        self.ensure_driver_available().await?;

        let mut process_guard = self.process.lock().await;
        if process_guard.is_some() {
            info!("ChromeDriver is already running on port {}", port);
            return Ok(());
        }

        info!("Starting ChromeDriver on port {}...", port);
        let child = Command::new(&self.driver_path)
            .arg(format!("--port={}", port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to start ChromeDriver from {:?}. Make sure Chrome is installed.",
                    self.driver_path
                )
            })?;
        *process_guard = Some(child);
        drop(process_guard);

        if !self.wait_for_readiness(port, READY_TIMEOUT_SECS).await {
            self.stop_driver().await;
            anyhow::bail!(
                "ChromeDriver failed to become ready within {} seconds. This might indicate a Chrome installation problem.",
                READY_TIMEOUT_SECS
            );
        }

        info!("ChromeDriver started on port {}", port);
        Ok(())
    }

    pub async fn stop_driver(&self) {
        let mut process_guard = self.process.lock().await;
        if let Some(mut child) = process_guard.take() {
            if let Err(e) = child.kill() {
                warn!("Failed to kill ChromeDriver: {}", e);
            }
            let _ = child.wait();
            info!("ChromeDriver stopped");
        }
    }

    async fn download_chromedriver(&self) -> Result<()> {
        let os = std::env::consts::OS;
        let platform = platform_tag(os, std::env::consts::ARCH).ok_or_else(|| {
            anyhow::anyhow!(
                "No ChromeDriver build for {}/{}; set webdriver_url instead",
                os,
                std::env::consts::ARCH
            )
        })?;

        let version = self.get_latest_version().await?;
        let url = download_url(&version, platform);
        info!("Downloading ChromeDriver {} from {}", version, url);

        let response = reqwest::get(&url).await?.error_for_status()?;
        let zip_data = response.bytes().await?;

        if let Some(parent) = self.driver_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let zip_path = std::env::temp_dir().join(format!("chromedriver-{}.zip", platform));
        fs::write(&zip_path, &zip_data)?;

        let extracted = extract_driver(&zip_path, driver_file_name(os), &self.driver_path);
        let _ = fs::remove_file(&zip_path);
        extracted?;

        info!("ChromeDriver downloaded to {:?}", self.driver_path);
        Ok(())
    }

    async fn wait_for_readiness(&self, port: u16, timeout_secs: u64) -> bool {
        let client = reqwest::Client::new();
        let url = format!("http://localhost:{}/status", port);
        let (client, url) = (&client, url.as_str());
        crate::retry::poll_until(
            tokio::time::Duration::from_secs(timeout_secs),
            tokio::time::Duration::from_millis(500),
            move || async move {
                match client.get(url).send().await {
                    Ok(response) if response.status().is_success() => Some(()),
                    _ => None,
                }
            },
        )
        .await
        .is_some()
    }

    async fn get_latest_version(&self) -> Result<String> {
        let url = version_url(self.chrome_major);
        let response = reqwest::get(&url)
            .await?
            .error_for_status()
            .with_context(|| format!("No ChromeDriver release listed at {}", url))?;
        let version = response.text().await?.trim().to_string();
        debug!("Latest ChromeDriver version: {}", version);
        Ok(version)
    }
}

#[async_trait]
impl DriverService for ChromeDriverManager {
    async fn restart(&self, port: u16) -> Result<()> {
        warn!("Restarting ChromeDriver on port {}", port);
        self.stop_driver().await;
        self.start_driver(port).await
    }
}

impl Drop for ChromeDriverManager {
    fn drop(&mut self) {
        // Best effort cleanup
        if let Ok(mut process_guard) = self.process.try_lock() {
            if let Some(mut child) = process_guard.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}
