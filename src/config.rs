use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const USERNAME_VAR: &str = "WEBSITE_USERNAME";
pub const PASSWORD_VAR: &str = "WEBSITE_PASSWORD";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingCredential(&'static str),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub portal: PortalConfig,
    pub downloads_root: PathBuf,
    /// Offset used for the month folder and the report date range.
    pub utc_offset_hours: i32,
    pub headless: bool,
    pub browser_language: String,
    /// When set, connect to this WebDriver instead of managing chromedriver.
    pub webdriver_url: Option<String>,
    pub webdriver_port: u16,
    pub timeouts: Timeouts,
    pub ready_strategy: ReadyStrategy,
    pub max_item_attempts: u32,
    pub max_selection_attempts: u32,
    pub inspect_workbooks: bool,
    pub create_archive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub login_url: String,
    pub menu_link_text: String,
    pub report_link_text: String,
    pub export_button_id: String,
    pub file_prefix: String,
    pub file_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub element_wait_secs: u64,
    pub page_ready_secs: u64,
    pub page_ready_poll_ms: u64,
    pub download_secs: u64,
    pub download_poll_ms: u64,
    pub selection_retry_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub item_cooldown_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReadyStrategy {
    /// Wait until the loading spinner is gone.
    LoadingIndicator,
    /// Wait until the result grid has at least one row.
    ResultRows,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            portal: PortalConfig::default(),
            downloads_root: PathBuf::from("downloads"),
            utc_offset_hours: 8,
            headless: true,
            browser_language: "ms-MY".to_string(),
            webdriver_url: None,
            webdriver_port: 9515,
            timeouts: Timeouts::default(),
            ready_strategy: ReadyStrategy::LoadingIndicator,
            max_item_attempts: 3,
            max_selection_attempts: 3,
            inspect_workbooks: true,
            create_archive: true,
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: "https://gms.gasmalaysia.com/pltgtm/cmd.openseal?openSEAL_ck=ViewHome"
                .to_string(),
            menu_link_text: "Certification".to_string(),
            report_link_text: "PGB Daily Gas Movement".to_string(),
            export_button_id: "PGBdailygasmovement-export".to_string(),
            file_prefix: "PGB Daily Gas Movement".to_string(),
            file_extension: "xlsx".to_string(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            element_wait_secs: 30,
            page_ready_secs: 300,
            page_ready_poll_ms: 1000,
            download_secs: 120,
            download_poll_ms: 2000,
            selection_retry_delay_ms: 2000,
            settle_delay_ms: 2000,
            item_cooldown_ms: 5000,
        }
    }
}

impl Timeouts {
    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_secs)
    }

    pub fn page_ready(&self) -> Duration {
        Duration::from_secs(self.page_ready_secs)
    }

    pub fn page_ready_poll(&self) -> Duration {
        Duration::from_millis(self.page_ready_poll_ms)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn download_poll(&self) -> Duration {
        Duration::from_millis(self.download_poll_ms)
    }

    pub fn selection_retry_delay(&self) -> Duration {
        Duration::from_millis(self.selection_retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn item_cooldown(&self) -> Duration {
        Duration::from_millis(self.item_cooldown_ms)
    }
}

impl AppConfig {
    /// Loads the config from `path`, or from the per-user location when no
    /// path is given. A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::config_path()?, false),
        };

        if !config_path.exists() {
            if required {
                anyhow::bail!("Config file {:?} does not exist", config_path);
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {:?}", config_path))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", config_path))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "gms", "gms-report-fetcher")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(proj_dirs.config_dir().join("config.json"))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.portal.login_url.is_empty() {
            errors.push("Login URL is required".to_string());
        }

        if self.portal.export_button_id.is_empty() {
            errors.push("Export button id is required".to_string());
        }

        if self.portal.file_extension.is_empty() {
            errors.push("Download file extension is required".to_string());
        }

        if !(-12..=14).contains(&self.utc_offset_hours) {
            errors.push(format!(
                "UTC offset {} is outside -12..=14",
                self.utc_offset_hours
            ));
        }

        if self.max_item_attempts == 0 || self.max_selection_attempts == 0 {
            errors.push("Attempt counts must be at least 1".to_string());
        }

        if self.timeouts.page_ready_secs == 0 || self.timeouts.download_secs == 0 {
            errors.push("Page-ready and download timeouts must be positive".to_string());
        }

        errors
    }

    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn webdriver_endpoint(&self) -> String {
        self.webdriver_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.webdriver_port))
    }
}

/// Portal login. There is no built-in fallback: both values must be provided.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingCredential(key))
        };

        Ok(Self::new(read(USERNAME_VAR)?, read(PASSWORD_VAR)?))
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}
