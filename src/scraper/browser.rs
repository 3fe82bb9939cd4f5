use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thirtyfour::prelude::*;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::page::{DateField, Dropdown, ExportOutcome, PageError, PageLauncher, ReportPage};
use super::selectors;
use crate::chromedriver_manager::DriverService;
use crate::config::{AppConfig, Credentials};
use crate::retry::poll_until;

/// WebDriver error texts that mean the session itself is unusable.
const SESSION_FAILURE_MARKERS: &[&str] = &[
    "invalid session id",
    "no such window",
    "session not created",
    "session deleted",
    "chrome not reachable",
    "disconnected",
    "target window already closed",
    "connection refused",
    "error sending request",
];

const ELEMENT_POLL: Duration = Duration::from_millis(500);
const CONNECT_ATTEMPTS: u32 = 3;

fn classify(action: &str, err: WebDriverError) -> PageError {
    classify_message(action, err.to_string())
}

fn classify_message(action: &str, message: String) -> PageError {
    let lower = message.to_lowercase();
    if SESSION_FAILURE_MARKERS.iter().any(|m| lower.contains(m)) {
        PageError::session_lost(action, message)
    } else if lower.contains("no such element") {
        PageError::NotFound {
            what: action.to_string(),
        }
    } else {
        PageError::interaction(action, message)
    }
}

/// Page-level settings shared by every session a launcher creates.
#[derive(Debug, Clone)]
pub struct PageSettings {
    pub login_url: String,
    pub menu_link_text: String,
    pub report_link_text: String,
    pub export_button_id: String,
    pub element_wait: Duration,
    pub settle_delay: Duration,
}

impl PageSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            login_url: config.portal.login_url.clone(),
            menu_link_text: config.portal.menu_link_text.clone(),
            report_link_text: config.portal.report_link_text.clone(),
            export_button_id: config.portal.export_button_id.clone(),
            element_wait: config.timeouts.element_wait(),
            settle_delay: config.timeouts.settle_delay(),
        }
    }
}

pub struct BrowserPage {
    driver: WebDriver,
    settings: PageSettings,
}

impl BrowserPage {
    async fn wait_visible(&self, by: By, action: &str) -> Result<WebElement, PageError> {
        self.driver
            .query(by)
            .wait(self.settings.element_wait, ELEMENT_POLL)
            .and_displayed()
            .first()
            .await
            .map_err(|e| classify(action, e))
    }

    async fn wait_clickable(&self, by: By, action: &str) -> Result<WebElement, PageError> {
        self.driver
            .query(by)
            .wait(self.settings.element_wait, ELEMENT_POLL)
            .and_clickable()
            .first()
            .await
            .map_err(|e| classify(action, e))
    }

    async fn wait_present(&self, by: By, action: &str) -> Result<WebElement, PageError> {
        self.driver
            .query(by)
            .wait(self.settings.element_wait, ELEMENT_POLL)
            .first()
            .await
            .map_err(|e| classify(action, e))
    }

    async fn dropdown(&self, dropdown: Dropdown) -> Result<WebElement, PageError> {
        let xpath = selectors::dropdown_xpath(dropdown);
        self.wait_clickable(By::XPath(xpath.as_str()), "locate dropdown").await
    }

    async fn settle(&self) {
        sleep(self.settings.settle_delay).await;
    }
}

#[async_trait]
impl ReportPage for BrowserPage {
    async fn login_and_navigate(&self, credentials: &Credentials) -> Result<(), PageError> {
        self.driver
            .goto(self.settings.login_url.as_str())
            .await
            .map_err(|e| classify("open login page", e))?;

        let username_field = self
            .wait_visible(By::Id(selectors::USERNAME_INPUT_ID), "find username field")
            .await?;
        let password_field = self
            .wait_visible(By::Id(selectors::PASSWORD_INPUT_ID), "find password field")
            .await?;

        username_field
            .send_keys(&credentials.username)
            .await
            .map_err(|e| classify("type username", e))?;
        self.settle().await;
        password_field
            .send_keys(credentials.password())
            .await
            .map_err(|e| classify("type password", e))?;
        self.settle().await;

        self.wait_clickable(By::Name(selectors::LOGIN_BUTTON_NAME), "find login button")
            .await?
            .click()
            .await
            .map_err(|e| classify("click login", e))?;
        self.settle().await;

        let menu = self
            .wait_present(By::LinkText(self.settings.menu_link_text.as_str()), "find menu tab")
            .await?;
        self.driver
            .action_chain()
            .move_to_element_center(&menu)
            .click()
            .perform()
            .await
            .map_err(|e| classify("open menu tab", e))?;
        self.settle().await;

        self.wait_clickable(By::LinkText(self.settings.report_link_text.as_str()), "find report link")
            .await?
            .click()
            .await
            .map_err(|e| classify("open report page", e))?;

        info!("Navigated to {}", self.settings.report_link_text);
        Ok(())
    }

    async fn list_options(&self, dropdown: Dropdown) -> Result<Vec<String>, PageError> {
        let toggle = self.dropdown(dropdown).await?;
        toggle
            .click()
            .await
            .map_err(|e| classify("open dropdown", e))?;
        self.settle().await;

        let items_xpath = selectors::listbox_items_xpath(dropdown);
        let driver = &self.driver;
        let items = poll_until(self.settings.element_wait, ELEMENT_POLL, move || async move {
            driver
                .find_all(By::XPath(items_xpath))
                .await
                .ok()
                .filter(|items| !items.is_empty())
        })
        .await
        .unwrap_or_default();

        let mut names = Vec::with_capacity(items.len());
        for item in items {
            let text = item
                .text()
                .await
                .map_err(|e| classify("read dropdown option", e))?;
            let text = text.trim();
            if !text.is_empty() {
                names.push(text.to_string());
            }
        }

        // Collapse the list again.
        toggle
            .click()
            .await
            .map_err(|e| classify("close dropdown", e))?;

        debug!("{:?} options: {:?}", dropdown, names);
        Ok(names)
    }

    async fn open_dropdown(&self, dropdown: Dropdown) -> Result<(), PageError> {
        self.dropdown(dropdown)
            .await?
            .click()
            .await
            .map_err(|e| classify("open dropdown", e))
    }

    async fn click_option(&self, dropdown: Dropdown, text: &str) -> Result<(), PageError> {
        let xpath = selectors::option_xpath(dropdown, text);
        self.wait_present(By::XPath(xpath.as_str()), "find dropdown option")
            .await?
            .click()
            .await
            .map_err(|e| classify("click dropdown option", e))
    }

    async fn selected_text(&self, dropdown: Dropdown) -> Result<String, PageError> {
        let xpath = selectors::dropdown_xpath(dropdown);
        let element = self.wait_visible(By::XPath(xpath.as_str()), "read dropdown").await?;
        let text = element
            .text()
            .await
            .map_err(|e| classify("read dropdown", e))?;
        Ok(text.trim().to_string())
    }

    async fn set_date(&self, field: DateField, value: &str) -> Result<(), PageError> {
        let id = match field {
            DateField::Start => selectors::START_DATE_INPUT_ID,
            DateField::End => selectors::END_DATE_INPUT_ID,
        };
        let input = self.wait_visible(By::Id(id), "find date input").await?;
        sleep(Duration::from_secs(1)).await;
        input.clear().await.map_err(|e| classify("clear date", e))?;
        input
            .send_keys(value)
            .await
            .map_err(|e| classify("type date", e))?;
        Ok(())
    }

    async fn submit_search(&self) -> Result<(), PageError> {
        self.wait_clickable(By::Id(selectors::SEARCH_BUTTON_ID), "find search button")
            .await?
            .click()
            .await
            .map_err(|e| classify("click search", e))
    }

    async fn is_loading(&self) -> Result<bool, PageError> {
        let spinners = self
            .driver
            .find_all(By::ClassName(selectors::LOADING_INDICATOR_CLASS))
            .await
            .map_err(|e| classify("check loading indicator", e))?;
        Ok(!spinners.is_empty())
    }

    async fn result_row_count(&self) -> Result<usize, PageError> {
        let rows = self
            .driver
            .find_all(By::Css(selectors::RESULT_ROWS_CSS))
            .await
            .map_err(|e| classify("count result rows", e))?;
        Ok(rows.len())
    }

    async fn trigger_export(&self) -> Result<ExportOutcome, PageError> {
        let button = match self
            .wait_clickable(By::Id(self.settings.export_button_id.as_str()), "find export button")
            .await
        {
            Ok(button) => button,
            Err(e) if e.is_session_lost() => return Err(e),
            Err(e) => {
                warn!("Export button not found or clickable: {}", e);
                return Ok(ExportOutcome::NotAvailable);
            }
        };

        let arg = button
            .to_json()
            .map_err(|e| classify("serialize export button", e))?;
        self.driver
            .execute("arguments[0].click();", vec![arg])
            .await
            .map_err(|e| classify("click export", e))?;

        info!("Export button clicked.");
        Ok(ExportOutcome::Clicked)
    }

    async fn close(&self) -> Result<(), PageError> {
        let driver = self.driver.clone();
        driver.quit().await.map_err(|e| classify("quit browser", e))
    }
}

/// chromedriver process owned by this run, restarted when it stops answering.
pub struct ManagedDriver {
    pub service: Arc<dyn DriverService>,
    pub port: u16,
}

/// Starts Chrome sessions against a running chromedriver.
pub struct ChromeLauncher {
    pub webdriver_url: String,
    pub headless: bool,
    pub language: String,
    pub download_dir: PathBuf,
    pub settings: PageSettings,
    pub managed_driver: Option<ManagedDriver>,
    pub connect_retry_delay: Duration,
}

impl ChromeLauncher {
    pub fn new(config: &AppConfig, webdriver_url: String, download_dir: PathBuf) -> Self {
        Self {
            webdriver_url,
            headless: config.headless,
            language: config.browser_language.clone(),
            download_dir,
            settings: PageSettings::from_config(config),
            managed_driver: None,
            connect_retry_delay: Duration::from_millis(1000),
        }
    }

    pub fn with_managed_driver(mut self, service: Arc<dyn DriverService>, port: u16) -> Self {
        self.managed_driver = Some(ManagedDriver { service, port });
        self
    }

    fn chrome_args(&self) -> Vec<String> {
        let mut chrome_args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--window-size=1920,1080".to_string(),
            format!("--lang={}", self.language),
        ];
        if self.headless {
            chrome_args.push("--headless=new".to_string());
        }
        chrome_args
    }

    fn download_prefs(&self) -> serde_json::Value {
        serde_json::json!({
            "download.default_directory": self.download_dir.to_string_lossy(),
            "download.prompt_for_download": false,
            "download.directory_upgrade": true,
            "safebrowsing.enabled": true,
        })
    }
}

impl ChromeLauncher {
    async fn connect(&self) -> Result<BrowserPage, PageError> {
        let mut caps = DesiredCapabilities::chrome();
        for arg in self.chrome_args() {
            caps.add_arg(&arg)
                .map_err(|e| classify("build capabilities", e))?;
        }
        caps.add_experimental_option("prefs", self.download_prefs())
            .map_err(|e| classify("build capabilities", e))?;

        let mut last_error = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            match WebDriver::new(self.webdriver_url.as_str(), caps.clone()).await {
                Ok(driver) => {
                    info!("Browser session started");
                    return Ok(BrowserPage {
                        driver,
                        settings: self.settings.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {}/{} failed: {}",
                        attempt, CONNECT_ATTEMPTS, e
                    );
                    last_error = e.to_string();
                    if attempt < CONNECT_ATTEMPTS {
                        sleep(self.connect_retry_delay).await;
                    }
                }
            }
        }

        Err(PageError::session_lost(
            "connect to WebDriver",
            format!("{} ({})", last_error, self.webdriver_url),
        ))
    }
}

#[async_trait]
impl PageLauncher for ChromeLauncher {
    type Page = BrowserPage;

    async fn launch(&self) -> Result<BrowserPage, PageError> {
        debug!(
            "Launching Chrome (headless={}) against {}",
            self.headless, self.webdriver_url
        );
        let err = match self.connect().await {
            Ok(page) => return Ok(page),
            Err(e) => e,
        };

        let Some(managed) = &self.managed_driver else {
            return Err(err);
        };
        warn!("{}. Restarting the managed chromedriver...", err);
        managed.service.restart(managed.port).await.map_err(|e| {
            PageError::session_lost("restart chromedriver", format!("{:#}", e))
        })?;
        self.connect().await
    }
}
