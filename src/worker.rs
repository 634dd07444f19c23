//! Command-driven run owner: one active run at a time, events out.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::controller::{LogSink, RunState, StepLog, drive};
use crate::dsl::{self, Program};
use crate::error::AgentError;
use crate::page::PageProvider;
use crate::pause::PauseBridge;
use crate::types::{SelectorBundle, Step};

/// Answer to a [`Command`]: the new run id for `Run`, nothing otherwise.
pub type Reply = Result<Option<String>, AgentError>;

/// A command plus an optional slot for its [`Reply`].
#[derive(Debug)]
pub struct Envelope {
    pub command: Command,
    pub reply: Option<oneshot::Sender<Reply>>,
}

impl From<Command> for Envelope {
    fn from(command: Command) -> Self {
        Self {
            command,
            reply: None,
        }
    }
}

/// Inbound control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    Run {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default)]
        task: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector_bundle: Option<SelectorBundle>,
        /// Typed steps; when present `task` is only the goal text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        steps: Option<Vec<Step>>,
    },
    Stop,
    TakeOver,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// Outbound notification, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    Log {
        run_id: String,
        payload: Value,
        level: LogLevel,
        timestamp: DateTime<Utc>,
    },
    HumanPause {
        run_id: String,
        reason: String,
    },
}

impl AgentEvent {
    pub fn log(run_id: &str, level: LogLevel, payload: Value) -> Self {
        AgentEvent::Log {
            run_id: run_id.to_string(),
            payload,
            level,
            timestamp: Utc::now(),
        }
    }

    pub fn message(run_id: &str, level: LogLevel, message: impl Into<String>) -> Self {
        Self::log(run_id, level, json!({ "message": message.into() }))
    }

    pub fn channel(&self) -> &'static str {
        match self {
            AgentEvent::Log { .. } => "log",
            AgentEvent::HumanPause { .. } => "humanPause",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            AgentEvent::Log { run_id, .. } | AgentEvent::HumanPause { run_id, .. } => run_id,
        }
    }
}

/// Turn a run request into steps plus bundle.
///
/// Typed steps are taken as given; otherwise the task text is compiled and
/// any unknown line rejects the whole request.
pub fn prepare(
    task: &str,
    selector_bundle: Option<SelectorBundle>,
    steps: Option<Vec<Step>>,
) -> Result<Program, AgentError> {
    let caller = selector_bundle.unwrap_or_default();
    match steps {
        Some(steps) => Ok(Program {
            steps,
            bundle: caller,
            ..Default::default()
        }),
        None => Ok(dsl::compile(task)?.with_bundle(&caller)),
    }
}

struct ActiveRun {
    run_id: String,
    handle: JoinHandle<()>,
    bridge: PauseBridge,
}

impl ActiveRun {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Owns the active run and answers [`Command`]s.
pub struct AgentWorker<P> {
    provider: Arc<P>,
    config: Arc<AgentConfig>,
    events: mpsc::UnboundedSender<AgentEvent>,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl<P> Clone for AgentWorker<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            active: self.active.clone(),
        }
    }
}

impl<P: PageProvider> AgentWorker<P> {
    pub fn new(
        provider: P,
        config: Arc<AgentConfig>,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Self {
        Self {
            provider: Arc::new(provider),
            config,
            events,
            active: Arc::default(),
        }
    }

    /// Dispatch one command. `Run` yields the new run id.
    pub fn handle(&self, command: Command) -> Result<Option<String>, AgentError> {
        match command {
            Command::Run {
                run_id,
                task,
                selector_bundle,
                steps,
            } => self.run(run_id, &task, selector_bundle, steps).map(Some),
            Command::Stop => {
                self.stop();
                Ok(None)
            }
            Command::TakeOver => {
                self.take_over();
                Ok(None)
            }
            Command::Resume => {
                self.resume();
                Ok(None)
            }
        }
    }

    /// Process commands until the sender side closes.
    pub async fn serve(self, mut commands: mpsc::Receiver<Envelope>) {
        while let Some(Envelope { command, reply }) = commands.recv().await {
            let result = self.handle(command);
            if let Err(e) = &result {
                warn!(error = %e, "command rejected");
            }
            if let Some(reply) = reply {
                // the caller may have gone away
                let _ = reply.send(result);
            }
        }
        info!("command channel closed");
    }

    /// Start a run in the background and return its id immediately.
    pub fn run(
        &self,
        run_id: Option<String>,
        task: &str,
        selector_bundle: Option<SelectorBundle>,
        steps: Option<Vec<Step>>,
    ) -> Result<String, AgentError> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut active = self.lock_active();

        if let Some(current) = active.as_ref().filter(|a| a.is_live()) {
            let err = AgentError::RunActive(current.run_id.clone());
            self.send(AgentEvent::message(&run_id, LogLevel::Error, err.to_string()));
            return Err(err);
        }

        let program = match prepare(task, selector_bundle, steps) {
            Ok(p) => p,
            Err(e) => {
                error!(%run_id, error = %e, "task rejected");
                self.send(AgentEvent::message(&run_id, LogLevel::Error, e.to_string()));
                return Err(e);
            }
        };

        let bridge = {
            let events = self.events.clone();
            let run_id = run_id.clone();
            PauseBridge::with_notifier(move |reason| {
                let _ = events.send(AgentEvent::HumanPause {
                    run_id: run_id.clone(),
                    reason: reason.to_string(),
                });
            })
        };

        let handle = tokio::spawn(execute_run(
            self.provider.clone(),
            self.config.clone(),
            self.events.clone(),
            bridge.clone(),
            run_id.clone(),
            task.to_string(),
            program,
        ));

        *active = Some(ActiveRun {
            run_id: run_id.clone(),
            handle,
            bridge,
        });
        Ok(run_id)
    }

    /// Abort the active run wherever it is suspended. Returns false when
    /// nothing was running.
    pub fn stop(&self) -> bool {
        let Some(run) = self.lock_active().take() else {
            return false;
        };
        let live = run.is_live();
        run.handle.abort();
        if live {
            info!(run_id = %run.run_id, "run stopped");
            self.send(AgentEvent::message(&run.run_id, LogLevel::Info, "[agent] stopped"));
        }
        live
    }

    pub fn take_over(&self) {
        let run_id = self.active_run_id().unwrap_or_default();
        info!(%run_id, "operator took over");
        self.send(AgentEvent::message(&run_id, LogLevel::Info, "[agent] takeOver requested"));
    }

    /// Release the pending pause of the active run, if any.
    pub fn resume(&self) -> bool {
        self.lock_active()
            .as_ref()
            .is_some_and(|run| run.bridge.resume())
    }

    pub fn active_run_id(&self) -> Option<String> {
        self.lock_active()
            .as_ref()
            .filter(|a| a.is_live())
            .map(|a| a.run_id.clone())
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }
}

async fn execute_run<P: PageProvider>(
    provider: Arc<P>,
    config: Arc<AgentConfig>,
    events: mpsc::UnboundedSender<AgentEvent>,
    bridge: PauseBridge,
    run_id: String,
    goal: String,
    program: Program,
) {
    let _ = events.send(AgentEvent::message(
        &run_id,
        LogLevel::Info,
        format!("[agent] starting: {}", goal),
    ));

    let page = match provider.acquire().await {
        Ok(page) => page,
        Err(e) => {
            error!(%run_id, error = %e, "no page for run");
            let _ = events.send(AgentEvent::message(&run_id, LogLevel::Error, e.to_string()));
            return;
        }
    };

    let sink: LogSink = {
        let events = events.clone();
        let run_id = run_id.clone();
        Arc::new(move |log: &StepLog| {
            let level = if log.ok { LogLevel::Info } else { LogLevel::Error };
            let payload = serde_json::to_value(log).unwrap_or(Value::Null);
            let _ = events.send(AgentEvent::log(&run_id, level, payload));
        })
    };

    let state = RunState::new(
        run_id.clone(),
        goal,
        program.steps,
        page,
        program.bundle,
        config,
    )
    .with_raw_hints(program.raw_hints)
    .with_human_pause(Arc::new(bridge))
    .with_log(sink);

    let report = drive(state).await;

    let level = if report.succeeded() {
        LogLevel::Info
    } else {
        LogLevel::Error
    };
    let _ = events.send(AgentEvent::log(
        &run_id,
        level,
        json!({
            "message": "[agent] finished",
            "phase": report.phase,
            "steps": report.timeline.len(),
            "escalations": report.escalations,
            "error": report.error,
        }),
    ));
}
