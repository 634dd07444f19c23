mod face;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentic_rpa::controller::{LogSink, StepLog};
use agentic_rpa::hands::ChromeProvider;
use agentic_rpa::{
    AgentConfig, AgentEvent, AgentWorker, PageProvider, PauseBridge, RunState, SelectorBundle, Step, drive,
    worker,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Supervised browser automation with human checkpoints.
#[derive(Parser)]
#[command(name = "agent", version)]
struct Cli {
    #[command(flatten)]
    config: AgentConfig,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve the web console and wait for commands (default)
    Serve,
    /// Run one task in the foreground. Enter resumes a pause, Ctrl-C stops.
    Run {
        /// Task text, one step per line or `->` separated
        #[arg(default_value = "")]
        task: String,

        /// JSON selector bundle merged ahead of selectors in the task
        #[arg(long)]
        bundle: Option<PathBuf>,

        /// JSON array of typed steps, used instead of the task text
        #[arg(long)]
        steps: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(cli.config);

    match cli.mode.unwrap_or(Mode::Serve) {
        Mode::Serve => serve(config).await,
        Mode::Run {
            task,
            bundle,
            steps,
        } => {
            if !run_foreground(config, task, bundle, steps).await? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn serve(config: Arc<AgentConfig>) -> Result<()> {
    info!("starting web console");
    let console = face::start_server(config.port).await?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AgentEvent>();
    let broadcast = console.events.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            debug!(channel = event.channel(), run_id = event.run_id(), "event");
            // no subscribers is fine
            let _ = broadcast.send(event);
        }
    });

    let worker = AgentWorker::new(ChromeProvider::new(config.clone()), config, event_tx);
    info!(port = console.port, "waiting for commands");
    worker.serve(console.commands).await;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn run_foreground(
    config: Arc<AgentConfig>,
    task: String,
    bundle: Option<PathBuf>,
    steps: Option<PathBuf>,
) -> Result<bool> {
    if task.trim().is_empty() && steps.is_none() {
        bail!("nothing to run: pass a task or --steps");
    }
    let bundle = bundle
        .as_deref()
        .map(read_json::<SelectorBundle>)
        .transpose()?;
    let steps = steps.as_deref().map(read_json::<Vec<Step>>).transpose()?;
    let program = worker::prepare(&task, bundle, steps)?;

    let provider = ChromeProvider::new(config.clone());
    let page = provider.acquire().await?;

    let bridge = PauseBridge::with_notifier(|reason| {
        eprintln!("[agent] paused: {}. Press Enter to resume.", reason);
    });
    {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                if !bridge.resume() {
                    debug!("nothing to resume");
                }
            }
        });
    }

    let sink: LogSink = Arc::new(|log: &StepLog| match serde_json::to_string(log) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(error = %e, "unprintable step log"),
    });

    let run_id = Uuid::new_v4().to_string();
    let state = RunState::new(
        run_id,
        task,
        program.steps,
        page,
        program.bundle,
        config,
    )
    .with_raw_hints(program.raw_hints)
    .with_human_pause(Arc::new(bridge))
    .with_log(sink);

    tokio::select! {
        report = drive(state) => {
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            Ok(report.succeeded())
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("run stopped");
            Ok(false)
        }
    }
}
