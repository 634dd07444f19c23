//! Executes the step under the cursor against the run's page.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::artifacts;
use crate::controller::{RunPhase, RunState, StepLog};
use crate::error::AgentError;
use crate::network::wait_network_idle;
use crate::page::Locator;
use crate::resolver::resolve;
use crate::types::{LoadMilestone, Outcome, Step, TimelineEntry, WaitTarget};

/// Run the step at the cursor, append its timeline entry and advance the
/// cursor on success. A failed step stays at the cursor.
pub async fn execute(state: &mut RunState) {
    let Some(step) = state.current_step().cloned() else {
        return;
    };
    debug!(run_id = %state.run_id, cursor = state.cursor, step = %step, "executing step");

    let result = perform(state, &step).await;

    let snapshot = match state.page.screenshot(false).await {
        Ok(png) => Some(png),
        Err(e) => {
            debug!(error = %e, "screenshot skipped");
            None
        }
    };

    let (outcome, error, detail) = match result {
        Ok(detail) => (Outcome::Success, None, detail),
        Err(e) => (Outcome::Failure, Some(e), None),
    };

    match &error {
        None => info!(run_id = %state.run_id, cursor = state.cursor, step = %step, "step ok"),
        Some(e) => {
            warn!(run_id = %state.run_id, cursor = state.cursor, step = %step, error = %e, "step failed")
        }
    }

    let message = error.as_ref().map(ToString::to_string);
    state.emit(&StepLog {
        ok: error.is_none(),
        step: step.redacted(),
        error: message.clone(),
        detail: detail.clone(),
    });
    state.timeline.push(TimelineEntry {
        outcome,
        step,
        at: Utc::now(),
        snapshot,
        error: message,
        detail,
    });

    state.last_outcome = Some(outcome);
    state.last_error = error;
    if outcome == Outcome::Success {
        state.cursor += 1;
    }
}

async fn perform(state: &mut RunState, step: &Step) -> Result<Option<String>, AgentError> {
    let timeout = state.config.step_timeout();

    match step {
        Step::Goto { url } => {
            state
                .page
                .goto(url, LoadMilestone::DomContentLoaded)
                .await?;
            // the old document and any frame inside it are gone
            state.frame = None;
        }
        Step::Type { hint, text, .. } => {
            let loc = resolve(hint, state.page.as_ref(), &state.bundle, budget_for(state, hint))
                .await?;
            state.page.fill(&loc, text).await?;
        }
        Step::Click {
            text: Some(text), ..
        } => {
            let loc = Locator::text(text.clone(), true);
            state.page.wait_visible(&loc, timeout).await?;
            state.page.click(&loc).await?;
        }
        Step::Click {
            hint: Some(hint), ..
        } => {
            let loc = resolve(hint, state.page.as_ref(), &state.bundle, budget_for(state, hint))
                .await?;
            state.page.click(&loc).await?;
        }
        Step::Click { .. } => {
            return Err(AgentError::StepExecution(
                "click needs a hint or text".to_string(),
            ));
        }
        Step::WaitFor { target } => match target {
            WaitTarget::Selector { selector } => {
                state
                    .page
                    .wait_visible(&Locator::from_raw(selector), timeout)
                    .await?;
            }
            WaitTarget::Text { text } => {
                state
                    .page
                    .wait_visible(&Locator::text(text.clone(), true), timeout)
                    .await?;
            }
            milestone => {
                if let Some(m) = milestone.milestone() {
                    state.page.wait_for_load(m, timeout).await?;
                }
            }
        },
        Step::WithinFrame { selector } => {
            let frame = state.page.enter_frame(selector, timeout).await?;
            state.frame = Some(frame);
        }
        Step::ExpectText { text } => {
            let loc = Locator::text(text.clone(), false).within(state.frame.clone());
            state.page.wait_visible(&loc, timeout).await?;
        }
        Step::RequireHuman { reason } => {
            let bridge = state
                .human_pause
                .clone()
                .ok_or(AgentError::HumanPauseUnavailable)?;
            state.phase = RunPhase::AwaitingHuman;
            let resumed = bridge.pause(reason).await;
            state.phase = RunPhase::Running;
            resumed?;
        }
        Step::GetText { selector } => {
            let loc = locate(state, selector).await?;
            let text = state.page.text_content(&loc, timeout).await?;
            return Ok(Some(text.trim().to_string()));
        }
        Step::WaitNetworkIdle {
            idle_ms,
            timeout_ms,
        } => {
            let idle = Duration::from_millis(*idle_ms);
            let limit = Duration::from_millis(*timeout_ms);
            let events = state.page.subscribe_requests().await?;
            let outcome = wait_network_idle(events, idle, limit).await;
            return Ok(Some(outcome.describe(idle, limit)));
        }
        Step::Download { selector } => {
            let url = match selector {
                Some(selector) => {
                    let loc = locate(state, selector).await?;
                    state.page.link_target(&loc).await?.ok_or_else(|| {
                        AgentError::StepExecution(format!("{} has no link target", selector))
                    })?
                }
                None => state.page.url().await?,
            };
            let path = artifacts::download_to_dir(&url, &state.config.download_dir).await?;
            return Ok(Some(format!("downloaded -> {}", path.display())));
        }
        Step::Screenshot { name } => {
            let png = state.page.screenshot(true).await?;
            let path =
                artifacts::save_screenshot(&state.config.screenshot_dir, name, &png).await?;
            return Ok(Some(path.display().to_string()));
        }
        Step::FrameClick { frame, selector } => {
            let loc = locate_in_frame(state, frame, selector, timeout).await?;
            state.page.click(&loc).await?;
        }
        Step::FrameType {
            frame,
            selector,
            text,
            ..
        } => {
            let loc = locate_in_frame(state, frame, selector, timeout).await?;
            state.page.fill(&loc, text).await?;
        }
        Step::FrameGetText { frame, selector } => {
            let loc = locate_in_frame(state, frame, selector, timeout).await?;
            let text = state.page.text_content(&loc, timeout).await?;
            return Ok(Some(text.trim().to_string()));
        }
        Step::SelectOption { selector, value } => {
            let loc = locate(state, selector).await?;
            state.page.select_option(&loc, value).await?;
            return Ok(Some(format!("selected {:?} in {}", value, selector)));
        }
        Step::SetCheckbox { selector, checked } => {
            let loc = locate(state, selector).await?;
            state.page.set_checked(&loc, *checked).await?;
        }
    }
    Ok(None)
}

/// Per-strategy budget, or the whole step timeout for plain task selectors.
fn budget_for(state: &RunState, hint: &str) -> Duration {
    if state.raw_hints.contains(hint) {
        state.config.step_timeout()
    } else {
        state.config.resolve_budget()
    }
}

/// Enter `frame` and wait for `selector` inside it. The ambient frame is
/// left alone.
async fn locate_in_frame(
    state: &RunState,
    frame: &str,
    selector: &str,
    timeout: Duration,
) -> Result<Locator, AgentError> {
    let frame = state.page.enter_frame(frame, timeout).await?;
    let loc = Locator::from_raw(selector).within(Some(frame));
    state.page.wait_visible(&loc, timeout).await?;
    Ok(loc)
}

/// Bundle entries win; otherwise the raw selector is used as written.
async fn locate(state: &RunState, selector: &str) -> Result<Locator, AgentError> {
    if state.bundle.contains_key(selector) {
        resolve(
            selector,
            state.page.as_ref(),
            &state.bundle,
            budget_for(state, selector),
        )
        .await
    } else {
        let loc = Locator::from_raw(selector);
        state
            .page
            .wait_visible(&loc, state.config.step_timeout())
            .await?;
        Ok(loc)
    }
}
