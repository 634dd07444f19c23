//! headless_chrome implementation of [`Page`].
//!
//! The driver API is blocking, so every call runs on `spawn_blocking` with a
//! clone of the tab handle.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::dom;
use crate::error::AgentError;
use crate::network::{IdleOutcome, wait_network_idle};
use crate::page::{FrameRef, Locator, Page, PageProvider, RequestEvent, RequestStream};
use crate::types::{LoadMilestone, NETWORK_IDLE_WINDOW_MS};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const GUEST_WAIT: Duration = Duration::from_secs(10);
// human pauses can leave the browser quiet for a long time
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Browser connection shared by all runs of one worker.
pub struct BrowserSession {
    browser: Browser,
    attached: bool,
}

impl BrowserSession {
    /// Attach to a running browser at `ws_url`, or launch one.
    pub fn launch(config: &AgentConfig, ws_url: Option<String>) -> Result<Self> {
        if let Some(ws_url) = ws_url {
            info!(%ws_url, "attaching to existing browser");
            match Browser::connect_with_timeout(ws_url, IDLE_BROWSER_TIMEOUT) {
                Ok(browser) => {
                    info!("attached to existing browser");
                    return Ok(Self {
                        browser,
                        attached: true,
                    });
                }
                Err(e) => warn!(error = %e, "could not attach, launching a browser"),
            }
        }

        let chrome_path = find_chrome(config)?;
        let options = LaunchOptions {
            headless: config.headless,
            path: Some(chrome_path),
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
                std::ffi::OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
            ..Default::default()
        };

        info!(headless = config.headless, "launching browser");
        let browser =
            Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {}", e))?;
        Ok(Self {
            browser,
            attached: false,
        })
    }

    /// Tab for the next run: the guest page when attached, else a fresh tab.
    pub fn page_tab(&self) -> Result<Arc<Tab>> {
        if !self.attached {
            let tab = self.browser.new_tab()?;
            tab.navigate_to("about:blank")?;
            return Ok(tab);
        }

        let deadline = Instant::now() + GUEST_WAIT;
        loop {
            if let Some(tab) = self.pick_guest_tab() {
                info!(url = %tab.get_url(), "using existing page");
                return Ok(tab);
            }
            if Instant::now() >= deadline {
                bail!("Timed out waiting for a page to attach to");
            }
            std::thread::sleep(Duration::from_millis(150));
        }
    }

    fn pick_guest_tab(&self) -> Option<Arc<Tab>> {
        let tabs = self.browser.get_tabs().lock().ok()?;
        tabs.iter()
            .find(|tab| {
                let url = tab.get_url();
                !url.is_empty() && !is_system_url(&url)
            })
            .cloned()
    }
}

fn is_system_url(url: &str) -> bool {
    ["chrome:", "devtools:", "edge:", "chrome-extension:"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

fn find_chrome(config: &AgentConfig) -> Result<PathBuf> {
    if let Some(path) = &config.chrome_path {
        return Ok(path.clone());
    }

    let mut candidates = vec![
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
    ];
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(
            local
                .join("Google")
                .join("Chrome")
                .join("Application")
                .join("chrome.exe"),
        );
    }

    if let Some(found) = candidates.into_iter().find(|p| p.exists()) {
        return Ok(found);
    }

    headless_chrome::browser::default_executable()
        .map_err(|e| anyhow!("Chrome executable not found ({}). Set RPA_CHROME_PATH.", e))
}

/// Resolve an http debugger address to its browser websocket URL.
pub async fn discover_ws_url(debugger_url: &str) -> Option<String> {
    if debugger_url.starts_with("ws://") || debugger_url.starts_with("wss://") {
        return Some(debugger_url.to_string());
    }

    let version_url = format!("{}/json/version", debugger_url.trim_end_matches('/'));
    let response = match reqwest::get(&version_url).await {
        Ok(r) => r,
        Err(e) => {
            debug!(%version_url, error = %e, "no debugger endpoint");
            return None;
        }
    };
    let body: serde_json::Value = response.json().await.ok()?;
    body["webSocketDebuggerUrl"].as_str().map(String::from)
}

fn eval_string(tab: &Tab, js: &str) -> Result<String> {
    let result = tab.evaluate(js, false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default())
}

/// Re-evaluate `js` until `done` accepts the result or `timeout` passes.
fn poll(tab: &Tab, js: &str, timeout: Duration, done: impl Fn(&str) -> bool) -> Result<String> {
    poll_with(|| eval_string(tab, js), timeout, POLL_INTERVAL, done)
}

/// Evaluation errors count as "not yet": documents being replaced during
/// navigation reject scripts for a moment.
fn poll_with(
    mut eval: impl FnMut() -> Result<String>,
    timeout: Duration,
    interval: Duration,
    done: impl Fn(&str) -> bool,
) -> Result<String> {
    let start = Instant::now();
    loop {
        let last = match eval() {
            Ok(state) if done(&state) => return Ok(state),
            Ok(state) => state,
            Err(e) => format!("error: {}", e),
        };
        if start.elapsed() >= timeout {
            return Err(anyhow!("Timeout {}ms exceeded (last state: {})", timeout.as_millis(), last));
        }
        std::thread::sleep(interval);
    }
}

fn milestone_reached(milestone: LoadMilestone, ready_state: &str) -> bool {
    match milestone {
        LoadMilestone::DomContentLoaded => ready_state == "interactive" || ready_state == "complete",
        LoadMilestone::Load | LoadMilestone::NetworkIdle => ready_state == "complete",
    }
}

/// One browser tab driven for a run.
pub struct ChromePage {
    tab: Arc<Tab>,
    nav_timeout: Duration,
    marks: AtomicU64,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>, nav_timeout: Duration) -> Self {
        Self {
            tab,
            nav_timeout,
            marks: AtomicU64::new(0),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, AgentError>
    where
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| AgentError::StepExecution(format!("browser call panicked: {}", e)))?
            .map_err(AgentError::from)
    }

    fn next_token(&self) -> String {
        format!("t{}", self.marks.fetch_add(1, Ordering::Relaxed))
    }

    /// Tag the element and return the CSS selector that addresses it.
    fn mark(tab: &Tab, locator: &Locator, token: &str) -> Result<String> {
        match eval_string(tab, &dom::mark_js(locator, token))?.as_str() {
            "ok" => Ok(dom::target_selector(token)),
            other => bail!("{} not found ({})", locator, other),
        }
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn goto(&self, url: &str, milestone: LoadMilestone) -> Result<(), AgentError> {
        let url = url.to_string();
        let timeout = self.nav_timeout;
        self.blocking(move |tab| {
            let _ = eval_string(tab, dom::MARK_STALE_JS);
            tab.navigate_to(&url)?;
            poll(tab, dom::NAV_STATE_JS, timeout, |state| {
                state.starts_with("fresh|") && !state.ends_with("loading")
            })
            .map_err(|e| anyhow!("navigation to {} did not load: {}", url, e))?;
            Ok(())
        })
        .await?;

        if milestone != LoadMilestone::DomContentLoaded {
            self.wait_for_load(milestone, timeout).await?;
        }
        Ok(())
    }

    async fn wait_visible(&self, locator: &Locator, timeout: Duration) -> Result<(), AgentError> {
        let js = dom::probe_js(locator);
        let described = locator.to_string();
        self.blocking(move |tab| {
            poll(tab, &js, timeout, |state| state == "visible")
                .map_err(|e| anyhow!("waiting for {} to be visible: {}", described, e))?;
            Ok(())
        })
        .await
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), AgentError> {
        let locator = locator.clone();
        let text = text.to_string();
        if locator.frame.is_some() {
            return self
                .blocking(move |tab| match eval_string(tab, &dom::fill_js(&locator, &text))?.as_str() {
                    "ok" => Ok(()),
                    other => bail!("fill {} failed ({})", locator, other),
                })
                .await;
        }

        let token = self.next_token();
        self.blocking(move |tab| {
            let selector = Self::mark(tab, &locator, &token)?;
            eval_string(tab, &dom::clear_marked_js(&token))?;
            tab.find_element(&selector)?.type_into(&text)?;
            Ok(())
        })
        .await
    }

    async fn click(&self, locator: &Locator) -> Result<(), AgentError> {
        let locator = locator.clone();
        if locator.frame.is_some() {
            return self
                .blocking(move |tab| match eval_string(tab, &dom::click_js(&locator))?.as_str() {
                    "ok" => Ok(()),
                    other => bail!("click {} failed ({})", locator, other),
                })
                .await;
        }

        let token = self.next_token();
        self.blocking(move |tab| {
            let selector = Self::mark(tab, &locator, &token)?;
            tab.find_element(&selector)?.click()?;
            Ok(())
        })
        .await
    }

    async fn select_option(&self, locator: &Locator, value: &str) -> Result<(), AgentError> {
        let js = dom::select_js(locator, value);
        let locator = locator.clone();
        let value = value.to_string();
        self.blocking(move |tab| match eval_string(tab, &js)?.as_str() {
            "ok" => Ok(()),
            "no-option" => bail!("no option {:?} in {}", value, locator),
            other => bail!("select in {} failed ({})", locator, other),
        })
        .await
    }

    async fn set_checked(&self, locator: &Locator, checked: bool) -> Result<(), AgentError> {
        let js = dom::check_js(locator, checked);
        let locator = locator.clone();
        self.blocking(move |tab| match eval_string(tab, &js)?.as_str() {
            "ok" => Ok(()),
            other => bail!("setting {} to {} failed ({})", locator, checked, other),
        })
        .await
    }

    async fn text_content(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<String, AgentError> {
        self.wait_visible(locator, timeout).await?;
        let js = dom::text_js(locator);
        self.blocking(move |tab| eval_string(tab, &js)).await
    }

    async fn link_target(&self, locator: &Locator) -> Result<Option<String>, AgentError> {
        let js = dom::link_js(locator);
        let href = self.blocking(move |tab| eval_string(tab, &js)).await?;
        Ok(Some(href).filter(|h| !h.is_empty()))
    }

    async fn wait_for_load(
        &self,
        milestone: LoadMilestone,
        timeout: Duration,
    ) -> Result<(), AgentError> {
        let start = Instant::now();
        self.blocking(move |tab| {
            poll(tab, dom::READY_STATE_JS, timeout, |state| {
                milestone_reached(milestone, state)
            })
            .map_err(|e| anyhow!("waiting for {:?}: {}", milestone, e))?;
            Ok(())
        })
        .await?;

        if milestone == LoadMilestone::NetworkIdle {
            let remaining = timeout.saturating_sub(start.elapsed());
            let events = self.subscribe_requests().await?;
            let window = Duration::from_millis(NETWORK_IDLE_WINDOW_MS);
            if wait_network_idle(events, window, remaining).await == IdleOutcome::TimedOut {
                return Err(AgentError::StepExecution(format!(
                    "network did not go idle within {}ms",
                    timeout.as_millis()
                )));
            }
        }
        Ok(())
    }

    async fn enter_frame(&self, selector: &str, timeout: Duration) -> Result<FrameRef, AgentError> {
        let js = dom::frame_probe_js(selector);
        let state = self
            .blocking(move |tab| poll(tab, &js, timeout, |state| state != "missing"))
            .await
            .map_err(|_| AgentError::FrameUnavailable(selector.to_string()))?;
        match state.as_str() {
            "ok" => Ok(FrameRef {
                selector: selector.to_string(),
            }),
            _ => Err(AgentError::FrameUnavailable(selector.to_string())),
        }
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, AgentError> {
        self.blocking(move |tab| {
            let clip = if full_page {
                let size = eval_string(tab, dom::PAGE_SIZE_JS)?;
                let (w, h) = size
                    .split_once(',')
                    .ok_or_else(|| anyhow!("bad page size {:?}", size))?;
                Some(Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: w.trim().parse()?,
                    height: h.trim().parse()?,
                    scale: 1.0,
                })
            } else {
                None
            };
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
        })
        .await
    }

    async fn url(&self) -> Result<String, AgentError> {
        self.blocking(|tab| Ok(tab.get_url())).await
    }

    async fn subscribe_requests(&self) -> Result<RequestStream, AgentError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = self
            .blocking(move |tab| {
                let enable: Network::Enable = serde_json::from_value(serde_json::json!({}))?;
                tab.call_method(enable)?;
                tab.add_event_listener(Arc::new(move |event: &Event| {
                    let mapped = match event {
                        Event::NetworkRequestWillBeSent(e) => {
                            RequestEvent::Started(e.params.request_id.clone())
                        }
                        Event::NetworkLoadingFinished(e) => {
                            RequestEvent::Finished(e.params.request_id.clone())
                        }
                        Event::NetworkLoadingFailed(e) => {
                            RequestEvent::Failed(e.params.request_id.clone())
                        }
                        _ => return,
                    };
                    let _ = tx.send(mapped);
                }))
            })
            .await?;

        let tab = self.tab.clone();
        Ok(RequestStream::new(
            rx,
            Some(Box::new(move || {
                if let Err(e) = tab.remove_event_listener(&listener) {
                    debug!(error = %e, "request listener already gone");
                }
            })),
        ))
    }
}

/// Launches or attaches once, then hands out a tab per run.
pub struct ChromeProvider {
    config: Arc<AgentConfig>,
    session: Mutex<Option<Arc<BrowserSession>>>,
}

impl ChromeProvider {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    async fn session(&self) -> Result<Arc<BrowserSession>, AgentError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        let ws_url = discover_ws_url(&self.config.debugger_url).await;
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || BrowserSession::launch(&config, ws_url))
            .await
            .map_err(|e| AgentError::StepExecution(format!("browser launch panicked: {}", e)))??;
        let session = Arc::new(session);
        *slot = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl PageProvider for ChromeProvider {
    async fn acquire(&self) -> Result<Box<dyn Page>, AgentError> {
        let session = self.session().await?;
        let tab = tokio::task::spawn_blocking(move || session.page_tab())
            .await
            .map_err(|e| AgentError::StepExecution(format!("tab setup panicked: {}", e)))??;
        Ok(Box::new(ChromePage::new(tab, self.config.step_timeout())))
    }
}
