use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single typed operation in a run's step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Step {
    Goto {
        url: String,
    },
    Type {
        hint: String,
        text: String,
        /// Masks `text` in log output.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        secure: bool,
    },
    Click {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    WaitFor {
        #[serde(flatten)]
        target: WaitTarget,
    },
    WithinFrame {
        selector: String,
    },
    ExpectText {
        text: String,
    },
    RequireHuman {
        reason: String,
    },
    GetText {
        selector: String,
    },
    WaitNetworkIdle {
        #[serde(rename = "idleMs", default = "default_idle_ms")]
        idle_ms: u64,
        #[serde(rename = "timeoutMs", default = "default_idle_timeout_ms")]
        timeout_ms: u64,
    },
    Download {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Screenshot {
        name: String,
    },
    /// Click inside an iframe without changing the ambient frame.
    FrameClick {
        frame: String,
        selector: String,
    },
    FrameType {
        frame: String,
        selector: String,
        text: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        secure: bool,
    },
    FrameGetText {
        frame: String,
        selector: String,
    },
    /// Pick a `<select>` option by value, or by label when no value matches.
    SelectOption {
        selector: String,
        value: String,
    },
    SetCheckbox {
        selector: String,
        #[serde(default = "default_checked")]
        checked: bool,
    },
}

impl Step {
    /// Operation name as it appears on the wire.
    pub fn op(&self) -> &'static str {
        match self {
            Step::Goto { .. } => "goto",
            Step::Type { .. } => "type",
            Step::Click { .. } => "click",
            Step::WaitFor { .. } => "waitFor",
            Step::WithinFrame { .. } => "withinFrame",
            Step::ExpectText { .. } => "expectText",
            Step::RequireHuman { .. } => "requireHuman",
            Step::GetText { .. } => "getText",
            Step::WaitNetworkIdle { .. } => "waitNetworkIdle",
            Step::Download { .. } => "download",
            Step::Screenshot { .. } => "screenshot",
            Step::FrameClick { .. } => "frameClick",
            Step::FrameType { .. } => "frameType",
            Step::FrameGetText { .. } => "frameGetText",
            Step::SelectOption { .. } => "selectOption",
            Step::SetCheckbox { .. } => "setCheckbox",
        }
    }

    pub fn is_require_human(&self) -> bool {
        matches!(self, Step::RequireHuman { .. })
    }

    /// Copy of the step that is safe to put in logs.
    pub fn redacted(&self) -> Step {
        match self {
            Step::Type {
                hint,
                secure: true,
                ..
            } => Step::Type {
                hint: hint.clone(),
                text: "***".to_string(),
                secure: true,
            },
            Step::FrameType {
                frame,
                selector,
                secure: true,
                ..
            } => Step::FrameType {
                frame: frame.clone(),
                selector: selector.clone(),
                text: "***".to_string(),
                secure: true,
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Goto { url } => write!(f, "goto {}", url),
            Step::Type {
                hint, secure: true, ..
            } => write!(f, "type *** into {}", hint),
            Step::Type { hint, text, .. } => write!(f, "type {:?} into {}", text, hint),
            Step::Click {
                text: Some(text), ..
            } => write!(f, "click text {:?}", text),
            Step::Click { hint, .. } => {
                write!(f, "click {}", hint.as_deref().unwrap_or("<none>"))
            }
            Step::WaitFor { target } => write!(f, "waitFor {}", target),
            Step::WithinFrame { selector } => write!(f, "withinFrame {}", selector),
            Step::ExpectText { text } => write!(f, "expectText {:?}", text),
            Step::RequireHuman { reason } => write!(f, "requireHuman ({})", reason),
            Step::GetText { selector } => write!(f, "getText {}", selector),
            Step::WaitNetworkIdle {
                idle_ms,
                timeout_ms,
            } => write!(f, "waitNetworkIdle {}ms/{}ms", idle_ms, timeout_ms),
            Step::Download { selector } => {
                write!(f, "download {}", selector.as_deref().unwrap_or("<page>"))
            }
            Step::Screenshot { name } => write!(f, "screenshot {}", name),
            Step::FrameClick { frame, selector } => {
                write!(f, "frameClick {} in {}", selector, frame)
            }
            Step::FrameType {
                frame,
                selector,
                secure: true,
                ..
            } => write!(f, "frameType *** into {} in {}", selector, frame),
            Step::FrameType {
                frame,
                selector,
                text,
                ..
            } => write!(f, "frameType {:?} into {} in {}", text, selector, frame),
            Step::FrameGetText { frame, selector } => {
                write!(f, "frameGetText {} in {}", selector, frame)
            }
            Step::SelectOption { selector, value } => {
                write!(f, "selectOption {:?} in {}", value, selector)
            }
            Step::SetCheckbox { selector, checked } => {
                write!(f, "setCheckbox {} -> {}", selector, checked)
            }
        }
    }
}

/// What a `waitFor` step waits on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum WaitTarget {
    #[serde(rename = "selector")]
    Selector { selector: String },
    /// Exact visible text.
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "load")]
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

impl WaitTarget {
    pub fn milestone(&self) -> Option<LoadMilestone> {
        match self {
            WaitTarget::Load => Some(LoadMilestone::Load),
            WaitTarget::DomContentLoaded => Some(LoadMilestone::DomContentLoaded),
            WaitTarget::NetworkIdle => Some(LoadMilestone::NetworkIdle),
            WaitTarget::Selector { .. } | WaitTarget::Text { .. } => None,
        }
    }
}

impl fmt::Display for WaitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitTarget::Selector { selector } => f.write_str(selector),
            WaitTarget::Text { text } => write!(f, "text={:?}", text),
            WaitTarget::Load => f.write_str("load"),
            WaitTarget::DomContentLoaded => f.write_str("domcontentloaded"),
            WaitTarget::NetworkIdle => f.write_str("networkidle"),
        }
    }
}

/// Page load milestones a navigation or `waitFor` can settle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMilestone {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// ARIA role plus optional accessible name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleQuery {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One ranked candidate for a hint. Any subset of fields may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exact: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
}

impl SelectorDescriptor {
    /// Parse a raw selector string as written in the task DSL.
    ///
    /// Recognised prefixes: `css=`, `xpath=`, `testid=`, `text=`, `role=`.
    /// A leading `//` is xpath; anything else is css.
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.trim();
        let (prefix, rest) = match raw.split_once('=') {
            Some((p, r)) => (p.to_ascii_lowercase(), r.trim()),
            None => (String::new(), raw),
        };

        match prefix.as_str() {
            "css" => SelectorDescriptor {
                css: Some(rest.to_string()),
                ..Default::default()
            },
            "xpath" => SelectorDescriptor {
                xpath: Some(rest.to_string()),
                ..Default::default()
            },
            "testid" | "data-testid" => SelectorDescriptor {
                test_id: Some(unquote(rest).0.to_string()),
                ..Default::default()
            },
            "text" => {
                let (text, quoted) = unquote(rest);
                SelectorDescriptor {
                    text: Some(text.to_string()),
                    exact: quoted,
                    ..Default::default()
                }
            }
            "role" => SelectorDescriptor {
                role: Some(parse_role(rest)),
                ..Default::default()
            },
            _ if raw.starts_with("//") => SelectorDescriptor {
                xpath: Some(raw.to_string()),
                ..Default::default()
            },
            _ => SelectorDescriptor {
                css: Some(raw.to_string()),
                ..Default::default()
            },
        }
    }
}

/// Strip one layer of matching double or single quotes.
pub(crate) fn unquote(s: &str) -> (&str, bool) {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return (&s[1..s.len() - 1], true);
        }
    }
    (s, false)
}

// role=button[name="Sign in"]
fn parse_role(rest: &str) -> RoleQuery {
    match rest.split_once('[') {
        Some((role, attrs)) => {
            let attrs = attrs.trim_end_matches(']');
            let name = attrs
                .split_once('=')
                .filter(|(key, _)| key.trim() == "name")
                .map(|(_, value)| unquote(value.trim()).0.to_string());
            RoleQuery {
                role: role.trim().to_string(),
                name,
            }
        }
        None => RoleQuery {
            role: rest.to_string(),
            name: None,
        },
    }
}

/// Hint name to ranked candidate descriptors.
pub type SelectorBundle = HashMap<String, Vec<SelectorDescriptor>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// One immutable record in a run's timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub outcome: Outcome,
    pub step: Step,
    pub at: DateTime<Utc>,
    #[serde(skip)]
    pub snapshot: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extracted text, written file paths and similar step output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TimelineEntry {
    pub fn ok(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

pub const DEFAULT_RESOLVE_BUDGET_MS: u64 = 600;
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_IDLE_MS: u64 = 800;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 15_000;
/// Quiet window used by `waitFor networkidle`.
pub const NETWORK_IDLE_WINDOW_MS: u64 = 500;

fn default_idle_ms() -> u64 {
    DEFAULT_IDLE_MS
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

fn default_checked() -> bool {
    true
}
