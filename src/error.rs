//! Error taxonomy for step execution and the control surface.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// No candidate strategy yielded a visible element within budget.
    #[error("No selector resolved for '{hint}'")]
    SelectorResolution { hint: String },

    /// Any failure reported by the page automation engine.
    #[error("{0}")]
    StepExecution(String),

    /// `withinFrame` target has no embedded document.
    #[error("no frame content for selector '{0}'")]
    FrameUnavailable(String),

    #[error("Human pause bridge missing")]
    HumanPauseUnavailable,

    #[error("a human pause is already pending")]
    PauseAlreadyPending,

    #[error("human pause was cancelled before resume")]
    PauseCancelled,

    /// String-DSL line that matches no known step.
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("run {0} is still active")]
    RunActive(String),
}

impl AgentError {
    /// Whether the critic may answer this failure with a human checkpoint.
    ///
    /// Failures of the escalation mechanism itself cannot be recovered by
    /// escalating again.
    pub fn is_escalation_eligible(&self) -> bool {
        matches!(
            self,
            AgentError::SelectorResolution { .. }
                | AgentError::StepExecution(_)
                | AgentError::FrameUnavailable(_)
        )
    }

    pub fn step(err: impl std::fmt::Display) -> Self {
        AgentError::StepExecution(format!("{:#}", err))
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::StepExecution(format!("{:#}", err))
    }
}
