//! In-memory page used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::page::{FrameRef, Locator, Page, PageProvider, RequestEvent, RequestStream};
use crate::types::LoadMilestone;

#[derive(Default)]
struct Inner {
    visible: Mutex<HashSet<String>>,
    texts: Mutex<HashMap<String, String>>,
    links: Mutex<HashMap<String, String>>,
    frames: Mutex<HashSet<String>>,
    failing_urls: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    url: Mutex<String>,
    screenshots_fail: Mutex<bool>,
    requests: Mutex<Vec<(u64, RequestEvent)>>,
    waits: Mutex<Vec<(String, Duration)>>,
    options: Mutex<HashMap<String, Vec<(String, String)>>>,
    selected: Mutex<HashMap<String, String>>,
    checked: Mutex<HashMap<String, bool>>,
}

/// Cloning shares state, so a test can keep a handle after giving one to a run.
#[derive(Clone, Default)]
pub struct FakePage {
    inner: Arc<Inner>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the element addressed by this locator visible. Keys use the
    /// locator's `Display` form, e.g. `css=#email` or `text="Hi" in frame #f`.
    pub fn show(&self, key: &str) -> &Self {
        self.inner.visible.lock().unwrap().insert(key.to_string());
        self
    }

    pub fn with_text(&self, key: &str, text: &str) -> &Self {
        self.show(key);
        self.inner
            .texts
            .lock()
            .unwrap()
            .insert(key.to_string(), text.to_string());
        self
    }

    pub fn with_link(&self, key: &str, href: &str) -> &Self {
        self.show(key);
        self.inner
            .links
            .lock()
            .unwrap()
            .insert(key.to_string(), href.to_string());
        self
    }

    pub fn with_frame(&self, selector: &str) -> &Self {
        self.inner
            .frames
            .lock()
            .unwrap()
            .insert(selector.to_string());
        self
    }

    pub fn fail_goto(&self, url: &str) -> &Self {
        self.inner
            .failing_urls
            .lock()
            .unwrap()
            .insert(url.to_string());
        self
    }

    pub fn heal_goto(&self, url: &str) -> &Self {
        self.inner.failing_urls.lock().unwrap().remove(url);
        self
    }

    pub fn fail_screenshots(&self) -> &Self {
        *self.inner.screenshots_fail.lock().unwrap() = true;
        self
    }

    /// Request events replayed to each subscriber, each after `delay_ms`.
    pub fn script_requests(&self, events: Vec<(u64, RequestEvent)>) -> &Self {
        *self.inner.requests.lock().unwrap() = events;
        self
    }

    /// `<select>` options as `(value, label)` pairs.
    pub fn with_options(&self, key: &str, options: &[(&str, &str)]) -> &Self {
        self.show(key);
        self.inner.options.lock().unwrap().insert(
            key.to_string(),
            options
                .iter()
                .map(|(v, l)| (v.to_string(), l.to_string()))
                .collect(),
        );
        self
    }

    pub fn selected(&self, key: &str) -> Option<String> {
        self.inner.selected.lock().unwrap().get(key).cloned()
    }

    pub fn is_checked(&self, key: &str) -> bool {
        self.inner
            .checked
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(false)
    }

    /// Every `wait_visible` with the timeout it was given.
    pub fn waits(&self) -> Vec<(String, Duration)> {
        self.inner.waits.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.inner.calls.lock().unwrap().push(call);
    }

    fn is_visible(&self, locator: &Locator) -> bool {
        self.inner
            .visible
            .lock()
            .unwrap()
            .contains(&locator.to_string())
    }

    fn require_visible(&self, locator: &Locator) -> Result<(), AgentError> {
        if self.is_visible(locator) {
            Ok(())
        } else {
            Err(AgentError::StepExecution(format!(
                "Timeout waiting for {}",
                locator
            )))
        }
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, milestone: LoadMilestone) -> Result<(), AgentError> {
        self.record(format!("goto {} {:?}", url, milestone));
        if self.inner.failing_urls.lock().unwrap().contains(url) {
            return Err(AgentError::StepExecution(format!(
                "net::ERR_NAME_NOT_RESOLVED at {}",
                url
            )));
        }
        *self.inner.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn wait_visible(&self, locator: &Locator, timeout: Duration) -> Result<(), AgentError> {
        self.record(format!("wait {}", locator));
        self.inner
            .waits
            .lock()
            .unwrap()
            .push((locator.to_string(), timeout));
        self.require_visible(locator)
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), AgentError> {
        self.record(format!("fill {} {}", locator, text));
        self.require_visible(locator)
    }

    async fn click(&self, locator: &Locator) -> Result<(), AgentError> {
        self.record(format!("click {}", locator));
        self.require_visible(locator)
    }

    async fn select_option(&self, locator: &Locator, value: &str) -> Result<(), AgentError> {
        self.record(format!("select {} {}", locator, value));
        self.require_visible(locator)?;
        let key = locator.to_string();
        let options = self.inner.options.lock().unwrap().get(&key).cloned();
        let picked = options.unwrap_or_default().into_iter().find_map(|(v, l)| {
            (v == value || l == value).then_some(v)
        });
        match picked {
            Some(v) => {
                self.inner.selected.lock().unwrap().insert(key, v);
                Ok(())
            }
            None => Err(AgentError::StepExecution(format!(
                "no option {:?} in {}",
                value, locator
            ))),
        }
    }

    async fn set_checked(&self, locator: &Locator, checked: bool) -> Result<(), AgentError> {
        self.record(format!("check {} {}", locator, checked));
        self.require_visible(locator)?;
        self.inner
            .checked
            .lock()
            .unwrap()
            .insert(locator.to_string(), checked);
        Ok(())
    }

    async fn text_content(
        &self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<String, AgentError> {
        self.record(format!("text {}", locator));
        self.require_visible(locator)?;
        Ok(self
            .inner
            .texts
            .lock()
            .unwrap()
            .get(&locator.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn link_target(&self, locator: &Locator) -> Result<Option<String>, AgentError> {
        self.record(format!("link {}", locator));
        self.require_visible(locator)?;
        Ok(self
            .inner
            .links
            .lock()
            .unwrap()
            .get(&locator.to_string())
            .cloned())
    }

    async fn wait_for_load(
        &self,
        milestone: LoadMilestone,
        _timeout: Duration,
    ) -> Result<(), AgentError> {
        self.record(format!("load {:?}", milestone));
        Ok(())
    }

    async fn enter_frame(&self, selector: &str, _timeout: Duration) -> Result<FrameRef, AgentError> {
        self.record(format!("frame {}", selector));
        if self.inner.frames.lock().unwrap().contains(selector) {
            Ok(FrameRef {
                selector: selector.to_string(),
            })
        } else {
            Err(AgentError::FrameUnavailable(selector.to_string()))
        }
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, AgentError> {
        if *self.inner.screenshots_fail.lock().unwrap() {
            return Err(AgentError::StepExecution("screenshot failed".into()));
        }
        Ok(if full_page { vec![2; 8] } else { vec![1; 4] })
    }

    async fn url(&self) -> Result<String, AgentError> {
        Ok(self.inner.url.lock().unwrap().clone())
    }

    async fn subscribe_requests(&self) -> Result<RequestStream, AgentError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let script = self.inner.requests.lock().unwrap().clone();
        tokio::spawn(async move {
            for (delay_ms, event) in script {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if tx.send(event).is_err() {
                    return;
                }
            }
            // keep the channel open like a live page would
            std::future::pending::<()>().await;
        });
        Ok(RequestStream::new(rx, None))
    }
}

/// Hands out clones of one fake page.
#[derive(Clone, Default)]
pub struct FakeProvider {
    pub page: FakePage,
}

#[async_trait]
impl PageProvider for FakeProvider {
    async fn acquire(&self) -> Result<Box<dyn Page>, AgentError> {
        Ok(Box::new(self.page.clone()))
    }
}
