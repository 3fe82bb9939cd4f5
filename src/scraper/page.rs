use async_trait::async_trait;
use thiserror::Error;

use crate::config::Credentials;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PageError {
    /// The browser or WebDriver session is gone; only a fresh session helps.
    #[error("browser session lost during {action}: {message}")]
    SessionLost { action: String, message: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{action} failed: {message}")]
    Interaction { action: String, message: String },
}

impl PageError {
    pub fn interaction(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Interaction {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn session_lost(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SessionLost {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::SessionLost { .. })
    }
}

/// The two cascading Kendo dropdowns on the report page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dropdown {
    Network,
    MeasurementPoint,
}

impl Dropdown {
    /// 1-based position among the page's dropdown widgets.
    pub fn position(self) -> usize {
        match self {
            Self::Network => 1,
            Self::MeasurementPoint => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Clicked,
    /// No export control for this selection; nothing to download.
    NotAvailable,
}

/// Interactions with the report page. The browser implementation lives in
/// `browser.rs`; orchestration only talks to this trait.
#[async_trait]
pub trait ReportPage: Send + Sync {
    async fn login_and_navigate(&self, credentials: &Credentials) -> Result<(), PageError>;

    /// Visible option texts of a dropdown, blank entries dropped.
    async fn list_options(&self, dropdown: Dropdown) -> Result<Vec<String>, PageError>;

    async fn open_dropdown(&self, dropdown: Dropdown) -> Result<(), PageError>;

    /// Clicks the first open-list option whose text contains `text`.
    async fn click_option(&self, dropdown: Dropdown, text: &str) -> Result<(), PageError>;

    async fn selected_text(&self, dropdown: Dropdown) -> Result<String, PageError>;

    async fn set_date(&self, field: DateField, value: &str) -> Result<(), PageError>;

    async fn submit_search(&self) -> Result<(), PageError>;

    async fn is_loading(&self) -> Result<bool, PageError>;

    async fn result_row_count(&self) -> Result<usize, PageError>;

    async fn trigger_export(&self) -> Result<ExportOutcome, PageError>;

    async fn close(&self) -> Result<(), PageError>;
}

/// Creates fresh browser sessions, used at start-up and after a session loss.
#[async_trait]
pub trait PageLauncher: Send + Sync {
    type Page: ReportPage;

    async fn launch(&self) -> Result<Self::Page, PageError>;
}
