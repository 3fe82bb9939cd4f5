use std::time::Duration;
use tracing::{error, info, warn};

use super::page::{Dropdown, PageError, ReportPage};
use crate::config::ReadyStrategy;
use crate::retry::{poll_until, retry, Attempt, RetryError, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    Selected,
    Failed,
}

/// Opens `dropdown`, clicks the option containing `option_text` and checks the
/// dropdown now shows it. Failed attempts are retried per `policy`; giving up
/// is logged and reported as `Failed`, never as an error. Only a lost session
/// is returned as an error.
pub async fn select_dropdown<P: ReportPage + ?Sized>(
    page: &P,
    dropdown: Dropdown,
    option_text: &str,
    policy: &RetryPolicy,
    settle: Duration,
) -> Result<SelectionOutcome, PageError> {
    let result = retry(policy, |attempt| async move {
        let step = async {
            page.open_dropdown(dropdown).await?;
            tokio::time::sleep(settle).await;
            page.click_option(dropdown, option_text).await?;
            tokio::time::sleep(settle).await;
            page.selected_text(dropdown).await
        };

        match step.await {
            Ok(current) if current.contains(option_text) => Ok(()),
            Ok(current) => {
                warn!(
                    "Verification failed: expected '{}' to be in '{}'",
                    option_text, current
                );
                Err(Attempt::Transient(format!("dropdown shows '{}'", current)))
            }
            Err(e) if e.is_session_lost() => Err(Attempt::Fatal(e)),
            Err(e) => {
                info!(
                    "Attempt {}: failed to select '{}' ({}), retrying...",
                    attempt, option_text, e
                );
                Err(Attempt::Transient(e.to_string()))
            }
        }
    })
    .await;

    match result {
        Ok(()) => {
            info!("Successfully selected: {}", option_text);
            Ok(SelectionOutcome::Selected)
        }
        Err(RetryError::Aborted(e)) => Err(e),
        Err(RetryError::Exhausted { attempts, last }) => {
            error!(
                "Failed to select '{}' after {} attempts ({}).",
                option_text, attempts, last
            );
            Ok(SelectionOutcome::Failed)
        }
    }
}

/// Waits until the page shows its results: either the loading spinner is gone
/// or at least one result row exists. Probe errors count as "not ready".
/// Returns `false` on timeout.
pub async fn wait_for_page_ready<P: ReportPage + ?Sized>(
    page: &P,
    strategy: ReadyStrategy,
    timeout: Duration,
    interval: Duration,
    label: &str,
) -> bool {
    info!("Waiting for page to load for '{}'...", label);
    let ready = poll_until(timeout, interval, move || async move {
        let ready = match strategy {
            ReadyStrategy::LoadingIndicator => page.is_loading().await.map(|loading| !loading),
            ReadyStrategy::ResultRows => page.result_row_count().await.map(|rows| rows > 0),
        };
        ready.ok().filter(|r| *r)
    })
    .await
    .is_some();

    if ready {
        info!("Page loading finished. Proceeding to export.");
    } else {
        warn!("Timeout waiting for page to load for '{}'.", label);
    }
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::testing::{Call, MockPage};

    fn policy() -> RetryPolicy {
        RetryPolicy::fixed(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_selection_gives_up_after_three_attempts() {
        let page = MockPage::default();
        page.state().missing_options.insert("ABC-1".to_string());

        let outcome = select_dropdown(&page, Dropdown::MeasurementPoint, "ABC-1", &policy(), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(outcome, SelectionOutcome::Failed);
        assert_eq!(page.count(|c| matches!(c, Call::OpenDropdown(_))), 3);
    }

    #[tokio::test]
    async fn test_selection_verifies_substring() {
        let page = MockPage::default();
        page.state().display_override = Some("North Region (NR)".to_string());

        let outcome = select_dropdown(&page, Dropdown::Network, "North Region", &policy(), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(outcome, SelectionOutcome::Selected);
        assert_eq!(page.count(|c| matches!(c, Call::OpenDropdown(_))), 1);
    }

    #[tokio::test]
    async fn test_selection_retries_on_mismatch() {
        let page = MockPage::default();
        page.state().display_override = Some("Something else".to_string());

        let outcome = select_dropdown(&page, Dropdown::Network, "North", &policy(), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(outcome, SelectionOutcome::Failed);
        assert_eq!(page.count(|c| matches!(c, Call::SelectedText(_))), 3);
    }

    #[tokio::test]
    async fn test_selection_propagates_session_loss() {
        let page = MockPage::default();
        page.state().session_lost = true;

        let err = select_dropdown(&page, Dropdown::Network, "North", &policy(), Duration::ZERO)
            .await
            .unwrap_err();

        assert!(err.is_session_lost());
        assert_eq!(page.count(|c| matches!(c, Call::OpenDropdown(_))), 1);
    }

    #[tokio::test]
    async fn test_page_ready_by_spinner() {
        let page = MockPage::default();
        page.state().loading_polls = 2;

        let ready = wait_for_page_ready(
            &page,
            ReadyStrategy::LoadingIndicator,
            Duration::from_secs(5),
            Duration::from_millis(1),
            "North",
        )
        .await;

        assert!(ready);
        assert_eq!(page.count(|c| matches!(c, Call::IsLoading)), 3);
    }

    #[tokio::test]
    async fn test_page_ready_times_out_without_rows() {
        let page = MockPage::default();

        let ready = wait_for_page_ready(
            &page,
            ReadyStrategy::ResultRows,
            Duration::from_millis(20),
            Duration::from_millis(5),
            "North",
        )
        .await;

        assert!(!ready);
    }
}
