//! The capability surface the run loop needs from a browser engine.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::types::{LoadMilestone, RoleQuery, SelectorDescriptor};

/// Embedded document entered by `withinFrame`, addressed by its iframe selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRef {
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorKind {
    Css(String),
    Role(RoleQuery),
    Text { text: String, exact: bool },
    TestId(String),
    XPath(String),
}

impl LocatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            LocatorKind::Css(_) => "css",
            LocatorKind::Role(_) => "role",
            LocatorKind::Text { .. } => "text",
            LocatorKind::TestId(_) => "testId",
            LocatorKind::XPath(_) => "xpath",
        }
    }
}

/// A lazily evaluated reference to the first element matching `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub kind: LocatorKind,
    pub frame: Option<FrameRef>,
}

impl Locator {
    pub fn new(kind: LocatorKind) -> Self {
        Self { kind, frame: None }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self::new(LocatorKind::Css(selector.into()))
    }

    pub fn text(text: impl Into<String>, exact: bool) -> Self {
        Self::new(LocatorKind::Text {
            text: text.into(),
            exact,
        })
    }

    pub fn within(mut self, frame: Option<FrameRef>) -> Self {
        self.frame = frame;
        self
    }

    /// Locators for a descriptor in fixed kind priority: css, role, text,
    /// testId, xpath. Absent fields produce no locator.
    pub fn candidates(desc: &SelectorDescriptor) -> Vec<Locator> {
        let mut out = Vec::new();
        if let Some(css) = &desc.css {
            out.push(Locator::css(css.clone()));
        }
        if let Some(role) = &desc.role {
            out.push(Locator::new(LocatorKind::Role(role.clone())));
        }
        if let Some(text) = &desc.text {
            out.push(Locator::text(text.clone(), desc.exact));
        }
        if let Some(id) = &desc.test_id {
            out.push(Locator::new(LocatorKind::TestId(id.clone())));
        }
        if let Some(xpath) = &desc.xpath {
            out.push(Locator::new(LocatorKind::XPath(xpath.clone())));
        }
        out
    }

    /// First candidate of a raw DSL selector, used where no bundle applies.
    pub fn from_raw(raw: &str) -> Self {
        Self::candidates(&SelectorDescriptor::from_raw(raw))
            .into_iter()
            .next()
            .unwrap_or_else(|| Locator::css(raw))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LocatorKind::Css(s) => write!(f, "css={}", s)?,
            LocatorKind::Role(r) => match &r.name {
                Some(name) => write!(f, "role={}[name={:?}]", r.role, name)?,
                None => write!(f, "role={}", r.role)?,
            },
            LocatorKind::Text { text, exact: true } => write!(f, "text={:?}", text)?,
            LocatorKind::Text { text, .. } => write!(f, "text={}", text)?,
            LocatorKind::TestId(id) => write!(f, "testid={}", id)?,
            LocatorKind::XPath(x) => write!(f, "xpath={}", x)?,
        }
        if let Some(frame) = &self.frame {
            write!(f, " in frame {}", frame.selector)?;
        }
        Ok(())
    }
}

/// Network request lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    Started(String),
    Finished(String),
    Failed(String),
}

/// Subscription handle; the engine-side listener is released on drop.
pub struct RequestStream {
    rx: mpsc::UnboundedReceiver<RequestEvent>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl RequestStream {
    pub fn new(
        rx: mpsc::UnboundedReceiver<RequestEvent>,
        on_drop: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        Self { rx, on_drop }
    }

    pub async fn recv(&mut self) -> Option<RequestEvent> {
        self.rx.recv().await
    }
}

impl Drop for RequestStream {
    fn drop(&mut self) {
        if let Some(release) = self.on_drop.take() {
            release();
        }
    }
}

/// A live page owned by one run.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and return once `milestone` has been reached.
    async fn goto(&self, url: &str, milestone: LoadMilestone) -> Result<(), AgentError>;

    async fn wait_visible(&self, locator: &Locator, timeout: Duration) -> Result<(), AgentError>;

    /// Replace the content of an editable element.
    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), AgentError>;

    async fn click(&self, locator: &Locator) -> Result<(), AgentError>;

    /// Select the `<option>` whose value is `value`, else the one labelled so.
    async fn select_option(&self, locator: &Locator, value: &str) -> Result<(), AgentError>;

    /// Bring a checkbox or radio to `checked`; no-op when already there.
    async fn set_checked(&self, locator: &Locator, checked: bool) -> Result<(), AgentError>;

    async fn text_content(&self, locator: &Locator, timeout: Duration)
    -> Result<String, AgentError>;

    /// Absolute `href`/`src` of the element.
    async fn link_target(&self, locator: &Locator) -> Result<Option<String>, AgentError>;

    async fn wait_for_load(
        &self,
        milestone: LoadMilestone,
        timeout: Duration,
    ) -> Result<(), AgentError>;

    /// Find an iframe element and check that its document is reachable.
    async fn enter_frame(&self, selector: &str, timeout: Duration)
    -> Result<FrameRef, AgentError>;

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, AgentError>;

    async fn url(&self) -> Result<String, AgentError>;

    async fn subscribe_requests(&self) -> Result<RequestStream, AgentError>;
}

/// Hands out a page for each run.
#[async_trait]
pub trait PageProvider: Send + Sync + 'static {
    async fn acquire(&self) -> Result<Box<dyn Page>, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_follow_kind_priority() {
        let desc = SelectorDescriptor {
            xpath: Some("//a".into()),
            text: Some("Go".into()),
            css: Some("a.go".into()),
            ..Default::default()
        };
        let kinds: Vec<_> = Locator::candidates(&desc)
            .iter()
            .map(|l| l.kind.name())
            .collect();
        assert_eq!(kinds, vec!["css", "text", "xpath"]);
    }

    #[test]
    fn empty_descriptor_has_no_candidates() {
        assert!(Locator::candidates(&SelectorDescriptor::default()).is_empty());
    }

    #[test]
    fn raw_text_selector_becomes_text_locator() {
        assert_eq!(Locator::from_raw("text=Next"), Locator::text("Next", false));
    }
}
