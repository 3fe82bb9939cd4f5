//! In-memory report page used by the orchestration tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use super::page::{DateField, Dropdown, ExportOutcome, PageError, PageLauncher, ReportPage};
use crate::config::Credentials;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Login,
    ListOptions(Dropdown),
    OpenDropdown(Dropdown),
    ClickOption(String),
    SelectedText(Dropdown),
    SetDate(DateField, String),
    Submit,
    IsLoading,
    RowCount,
    Export,
    Close,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub calls: Vec<Call>,
    pub launches: u32,
    pub networks: Vec<String>,
    pub points: HashMap<String, Vec<String>>,
    pub selected_network: Option<String>,
    pub selected_point: Option<String>,
    /// Text the dropdowns show regardless of what was clicked.
    pub display_override: Option<String>,
    pub missing_options: HashSet<String>,
    pub session_lost: bool,
    /// Number of upcoming searches that kill the session.
    pub lose_session_on_submit: u32,
    pub submit_error: bool,
    pub login_error: bool,
    /// Number of upcoming logins that time out.
    pub login_failures: u32,
    /// Page actions fail with "no such element" until a login succeeds.
    pub require_login: bool,
    pub logged_in: bool,
    /// Number of upcoming launches that cannot reach the driver.
    pub launch_failures: u32,
    pub network_list_error: bool,
    /// Polls that still report the spinner.
    pub loading_polls: u32,
    pub rows: usize,
    /// Selections (point, or network when there is none) without an export button.
    pub no_export_for: HashSet<String>,
    /// Where a clicked export drops its file; `None` means nothing arrives.
    pub export_dir: Option<PathBuf>,
    pub exports: u32,
}

#[derive(Clone, Default)]
pub struct MockPage {
    state: Arc<Mutex<MockState>>,
}

impl MockPage {
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    fn enter(&self, call: Call) -> Result<MutexGuard<'_, MockState>, PageError> {
        let mut state = self.state();
        state.calls.push(call.clone());
        if state.session_lost {
            return Err(PageError::session_lost("mock", "invalid session id"));
        }
        if state.require_login && !state.logged_in && call != Call::Login {
            return Err(PageError::NotFound {
                what: "locate dropdown".to_string(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl ReportPage for MockPage {
    async fn login_and_navigate(&self, _credentials: &Credentials) -> Result<(), PageError> {
        let mut state = self.enter(Call::Login)?;
        if state.login_error {
            return Err(PageError::NotFound {
                what: "find username field".to_string(),
            });
        }
        if state.login_failures > 0 {
            state.login_failures -= 1;
            return Err(PageError::NotFound {
                what: "find menu tab".to_string(),
            });
        }
        state.logged_in = true;
        Ok(())
    }

    async fn list_options(&self, dropdown: Dropdown) -> Result<Vec<String>, PageError> {
        let state = self.enter(Call::ListOptions(dropdown))?;
        match dropdown {
            Dropdown::Network if state.network_list_error => {
                Err(PageError::interaction("open dropdown", "not clickable"))
            }
            Dropdown::Network => Ok(state.networks.clone()),
            Dropdown::MeasurementPoint => Ok(state
                .selected_network
                .as_ref()
                .and_then(|n| state.points.get(n))
                .cloned()
                .unwrap_or_default()),
        }
    }

    async fn open_dropdown(&self, dropdown: Dropdown) -> Result<(), PageError> {
        self.enter(Call::OpenDropdown(dropdown))?;
        Ok(())
    }

    async fn click_option(&self, dropdown: Dropdown, text: &str) -> Result<(), PageError> {
        let mut state = self.enter(Call::ClickOption(text.to_string()))?;
        if state.missing_options.contains(text) {
            return Err(PageError::NotFound {
                what: "find dropdown option".to_string(),
            });
        }
        match dropdown {
            Dropdown::Network => {
                state.selected_network = Some(text.to_string());
                state.selected_point = None;
            }
            Dropdown::MeasurementPoint => state.selected_point = Some(text.to_string()),
        }
        Ok(())
    }

    async fn selected_text(&self, dropdown: Dropdown) -> Result<String, PageError> {
        let state = self.enter(Call::SelectedText(dropdown))?;
        if let Some(text) = &state.display_override {
            return Ok(text.clone());
        }
        let selected = match dropdown {
            Dropdown::Network => &state.selected_network,
            Dropdown::MeasurementPoint => &state.selected_point,
        };
        Ok(selected.clone().unwrap_or_default())
    }

    async fn set_date(&self, field: DateField, value: &str) -> Result<(), PageError> {
        self.enter(Call::SetDate(field, value.to_string()))?;
        Ok(())
    }

    async fn submit_search(&self) -> Result<(), PageError> {
        let mut state = self.enter(Call::Submit)?;
        if state.lose_session_on_submit > 0 {
            state.lose_session_on_submit -= 1;
            state.session_lost = true;
            return Err(PageError::session_lost("click search", "chrome not reachable"));
        }
        if state.submit_error {
            return Err(PageError::interaction("click search", "element click intercepted"));
        }
        Ok(())
    }

    async fn is_loading(&self) -> Result<bool, PageError> {
        let mut state = self.enter(Call::IsLoading)?;
        if state.loading_polls > 0 {
            state.loading_polls -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn result_row_count(&self) -> Result<usize, PageError> {
        let state = self.enter(Call::RowCount)?;
        Ok(state.rows)
    }

    async fn trigger_export(&self) -> Result<ExportOutcome, PageError> {
        let mut state = self.enter(Call::Export)?;
        let key = state
            .selected_point
            .clone()
            .or_else(|| state.selected_network.clone())
            .unwrap_or_default();
        if state.no_export_for.contains(&key) {
            return Ok(ExportOutcome::NotAvailable);
        }

        state.exports += 1;
        if let Some(dir) = &state.export_dir {
            let name = format!("PGBDailyGasMovement ({}).xlsx", state.exports);
            std::fs::write(dir.join(name), key.as_bytes())
                .map_err(|e| PageError::interaction("write export", e.to_string()))?;
        }
        Ok(ExportOutcome::Clicked)
    }

    async fn close(&self) -> Result<(), PageError> {
        self.state().calls.push(Call::Close);
        Ok(())
    }
}

/// Hands out pages sharing one state; every successful launch revives the session.
#[derive(Clone, Default)]
pub struct MockLauncher {
    pub page: MockPage,
}

#[async_trait]
impl PageLauncher for MockLauncher {
    type Page = MockPage;

    async fn launch(&self) -> Result<MockPage, PageError> {
        let mut state = self.page.state();
        if state.launch_failures > 0 {
            state.launch_failures -= 1;
            return Err(PageError::session_lost(
                "connect to WebDriver",
                "error sending request: connection refused",
            ));
        }
        state.launches += 1;
        state.session_lost = false;
        state.logged_in = false;
        state.selected_network = None;
        state.selected_point = None;
        Ok(self.page.clone())
    }
}
