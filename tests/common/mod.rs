#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentic_rpa::{
    AgentError, FrameRef, LoadMilestone, Locator, Page, PageProvider, RequestStream,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Page whose visible elements are keyed by locator display text.
#[derive(Clone, Default)]
pub struct ScriptedPage {
    visible: Arc<Mutex<HashSet<String>>>,
    texts: Arc<Mutex<HashMap<String, String>>>,
    frames: Arc<Mutex<HashSet<String>>>,
    log: Arc<Mutex<Vec<String>>>,
    url: Arc<Mutex<String>>,
}

impl ScriptedPage {
    pub fn show(&self, key: &str) {
        self.visible.lock().unwrap().insert(key.to_string());
    }

    pub fn text(&self, key: &str, text: &str) {
        self.show(key);
        self.texts
            .lock()
            .unwrap()
            .insert(key.to_string(), text.to_string());
    }

    pub fn frame(&self, selector: &str) {
        self.frames.lock().unwrap().insert(selector.to_string());
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn visible(&self, locator: &Locator) -> Result<(), AgentError> {
        if self.visible.lock().unwrap().contains(&locator.to_string()) {
            Ok(())
        } else {
            Err(AgentError::StepExecution(format!("{} not visible", locator)))
        }
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn goto(&self, url: &str, _milestone: LoadMilestone) -> Result<(), AgentError> {
        self.log.lock().unwrap().push(format!("goto {}", url));
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn wait_visible(&self, locator: &Locator, _timeout: Duration) -> Result<(), AgentError> {
        self.visible(locator)
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), AgentError> {
        self.visible(locator)?;
        self.log
            .lock()
            .unwrap()
            .push(format!("fill {} {}", locator, text));
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> Result<(), AgentError> {
        self.visible(locator)?;
        self.log.lock().unwrap().push(format!("click {}", locator));
        Ok(())
    }

    async fn select_option(&self, locator: &Locator, value: &str) -> Result<(), AgentError> {
        self.visible(locator)?;
        self.log
            .lock()
            .unwrap()
            .push(format!("select {} {}", locator, value));
        Ok(())
    }

    async fn set_checked(&self, locator: &Locator, checked: bool) -> Result<(), AgentError> {
        self.visible(locator)?;
        self.log
            .lock()
            .unwrap()
            .push(format!("check {} {}", locator, checked));
        Ok(())
    }

    async fn text_content(
        &self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<String, AgentError> {
        self.visible(locator)?;
        Ok(self
            .texts
            .lock()
            .unwrap()
            .get(&locator.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn link_target(&self, _locator: &Locator) -> Result<Option<String>, AgentError> {
        Ok(None)
    }

    async fn wait_for_load(
        &self,
        _milestone: LoadMilestone,
        _timeout: Duration,
    ) -> Result<(), AgentError> {
        Ok(())
    }

    async fn enter_frame(&self, selector: &str, _timeout: Duration) -> Result<FrameRef, AgentError> {
        if self.frames.lock().unwrap().contains(selector) {
            Ok(FrameRef {
                selector: selector.to_string(),
            })
        } else {
            Err(AgentError::FrameUnavailable(selector.to_string()))
        }
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>, AgentError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn url(&self) -> Result<String, AgentError> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn subscribe_requests(&self) -> Result<RequestStream, AgentError> {
        let (tx, rx) = mpsc::unbounded_channel();
        // hold the sender until the subscription is dropped
        Ok(RequestStream::new(rx, Some(Box::new(move || drop(tx)))))
    }
}

pub struct ScriptedProvider(pub ScriptedPage);

#[async_trait]
impl PageProvider for ScriptedProvider {
    async fn acquire(&self) -> Result<Box<dyn Page>, AgentError> {
        Ok(Box::new(self.0.clone()))
    }
}
