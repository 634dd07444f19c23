use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::types::{DEFAULT_RESOLVE_BUDGET_MS, DEFAULT_STEP_TIMEOUT_MS};

/// Runtime settings. Every field can come from a flag, an `RPA_*` env var
/// or `.env`.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct AgentConfig {
    /// Remote debugging endpoint of an already running browser to attach to
    #[arg(long, env = "RPA_DEBUGGER_URL", default_value = "http://127.0.0.1:9222")]
    pub debugger_url: String,

    /// Chrome executable used when no browser is available for attach
    #[arg(long, env = "RPA_CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Launch the fallback browser without a window
    #[arg(long, env = "RPA_HEADLESS")]
    pub headless: bool,

    /// Visibility budget per selector strategy, in milliseconds
    #[arg(long, env = "RPA_RESOLVE_BUDGET_MS", default_value_t = DEFAULT_RESOLVE_BUDGET_MS)]
    pub resolve_budget_ms: u64,

    /// Timeout for waits, navigation and frame lookup, in milliseconds
    #[arg(long, env = "RPA_STEP_TIMEOUT_MS", default_value_t = DEFAULT_STEP_TIMEOUT_MS)]
    pub step_timeout_ms: u64,

    /// Give up after this many escalations in one run (unbounded when unset)
    #[arg(long, env = "RPA_ESCALATION_LIMIT")]
    pub escalation_limit: Option<u32>,

    #[arg(long, env = "RPA_SCREENSHOT_DIR", default_value = ".screenshots")]
    pub screenshot_dir: PathBuf,

    #[arg(long, env = "RPA_DOWNLOAD_DIR", default_value = ".downloads")]
    pub download_dir: PathBuf,

    /// First port tried by the web console
    #[arg(long, env = "RPA_PORT", default_value_t = 3000)]
    pub port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            debugger_url: "http://127.0.0.1:9222".to_string(),
            chrome_path: None,
            headless: false,
            resolve_budget_ms: DEFAULT_RESOLVE_BUDGET_MS,
            step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            escalation_limit: None,
            screenshot_dir: PathBuf::from(".screenshots"),
            download_dir: PathBuf::from(".downloads"),
            port: 3000,
        }
    }
}

impl AgentConfig {
    pub fn resolve_budget(&self) -> Duration {
        Duration::from_millis(self.resolve_budget_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}
