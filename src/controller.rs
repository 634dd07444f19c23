//! Run state and the router loop that alternates interpreter and critic.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::critic;
use crate::error::AgentError;
use crate::interpreter;
use crate::page::{FrameRef, Page};
use crate::pause::HumanPause;
use crate::types::{Outcome, SelectorBundle, Step, TimelineEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Running,
    AwaitingHuman,
    Done,
    FailedTerminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Execute,
    Criticize,
    End,
}

/// Payload handed to the log sink after every step attempt.
#[derive(Debug, Clone, Serialize)]
pub struct StepLog {
    pub ok: bool,
    pub step: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub type LogSink = Arc<dyn Fn(&StepLog) + Send + Sync>;

/// Mutable record of one run. Lives exactly as long as the run.
pub struct RunState {
    pub run_id: String,
    pub goal: String,
    pub steps: Vec<Step>,
    /// Index of the next step to execute.
    pub cursor: usize,
    pub page: Box<dyn Page>,
    pub bundle: SelectorBundle,
    /// Hints written as plain selectors; they wait the full step timeout.
    pub raw_hints: HashSet<String>,
    pub timeline: Vec<TimelineEntry>,
    /// `None` until the first step has run and after each escalation.
    pub last_outcome: Option<Outcome>,
    pub last_error: Option<AgentError>,
    /// Set by `withinFrame`, read by `expectText`.
    pub frame: Option<FrameRef>,
    pub escalations: u32,
    pub phase: RunPhase,
    pub human_pause: Option<Arc<dyn HumanPause>>,
    pub on_log: Option<LogSink>,
    pub config: Arc<AgentConfig>,
}

impl RunState {
    pub fn new(
        run_id: impl Into<String>,
        goal: impl Into<String>,
        steps: Vec<Step>,
        page: Box<dyn Page>,
        bundle: SelectorBundle,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            goal: goal.into(),
            steps,
            cursor: 0,
            page,
            bundle,
            raw_hints: HashSet::new(),
            timeline: Vec::new(),
            last_outcome: None,
            last_error: None,
            frame: None,
            escalations: 0,
            phase: RunPhase::Running,
            human_pause: None,
            on_log: None,
            config,
        }
    }

    pub fn with_human_pause(mut self, bridge: Arc<dyn HumanPause>) -> Self {
        self.human_pause = Some(bridge);
        self
    }

    pub fn with_raw_hints(mut self, hints: HashSet<String>) -> Self {
        self.raw_hints = hints;
        self
    }

    pub fn with_log(mut self, sink: LogSink) -> Self {
        self.on_log = Some(sink);
        self
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    pub(crate) fn emit(&self, log: &StepLog) {
        if let Some(sink) = &self.on_log {
            sink(log);
        }
    }
}

/// Where the loop goes next.
pub fn route(state: &RunState) -> Route {
    if state.cursor >= state.steps.len() {
        Route::End
    } else if state.last_outcome == Some(Outcome::Failure) {
        Route::Criticize
    } else {
        Route::Execute
    }
}

/// Why a failure can't be escalated, if it can't.
fn terminal_reason(state: &RunState) -> Option<String> {
    if let Some(err) = &state.last_error
        && !err.is_escalation_eligible()
    {
        return Some(err.to_string());
    }
    match state.config.escalation_limit {
        Some(limit) if state.escalations >= limit => {
            Some(format!("escalation limit of {} reached", limit))
        }
        _ => None,
    }
}

/// Final result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub goal: String,
    pub phase: RunPhase,
    pub steps: Vec<Step>,
    pub timeline: Vec<TimelineEntry>,
    pub escalations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.phase == RunPhase::Done
    }
}

/// Drive the run until the cursor exhausts the step list.
///
/// Failures are answered by the critic. The run only ends early when a
/// failure is not escalation-eligible or the configured escalation limit is
/// reached.
pub async fn drive(mut state: RunState) -> RunReport {
    info!(run_id = %state.run_id, steps = state.steps.len(), goal = %state.goal, "run started");
    state.frame = None;
    state.phase = RunPhase::Running;
    let mut terminal = None;

    loop {
        match route(&state) {
            Route::End => {
                state.phase = RunPhase::Done;
                break;
            }
            Route::Execute => interpreter::execute(&mut state).await,
            Route::Criticize => {
                if let Some(reason) = terminal_reason(&state) {
                    warn!(run_id = %state.run_id, cursor = state.cursor, %reason, "run cannot recover");
                    state.phase = RunPhase::FailedTerminal;
                    terminal = Some(reason);
                    break;
                }
                critic::reconcile(&mut state);
            }
        }
    }

    info!(
        run_id = %state.run_id,
        phase = ?state.phase,
        entries = state.timeline.len(),
        escalations = state.escalations,
        "run finished"
    );

    RunReport {
        run_id: state.run_id,
        goal: state.goal,
        phase: state.phase,
        steps: state.steps,
        timeline: state.timeline,
        escalations: state.escalations,
        error: terminal,
    }
}
