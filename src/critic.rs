//! Escalation policy: answer a failed step with a human checkpoint.

use tracing::info;

use crate::controller::{RunPhase, RunState};
use crate::types::{Outcome, Step};

/// Insert a `requireHuman` step at the cursor, ahead of the failed step.
///
/// The failed step is left untouched at `cursor + 1` so it is retried once
/// the human resumes. Nothing is inserted if a `requireHuman` already sits at
/// the cursor. Clears the failure flag so the router moves on.
pub fn reconcile(state: &mut RunState) {
    if state.last_outcome != Some(Outcome::Failure) {
        return;
    }

    let failed_op = state
        .steps
        .get(state.cursor)
        .filter(|step| !step.is_require_human())
        .map(Step::op);

    if let Some(op) = failed_op {
        let reason = format!("Failed: {}", op);
        info!(run_id = %state.run_id, cursor = state.cursor, %reason, "escalating to human");
        state
            .steps
            .insert(state.cursor, Step::RequireHuman { reason });
        state.escalations += 1;
    }

    state.last_outcome = None;
    state.phase = RunPhase::AwaitingHuman;
}
