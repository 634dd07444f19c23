//! Text task format, lowered to typed steps.
//!
//! One step per line or `->`-separated:
//!
//! ```text
//! open https://example.com -> type #q "rust" -> click text="Search"
//! waitFor text="Results" -> getText h1 -> screenshot results.png
//! ```
//!
//! Selectors become hints whose bundle entry is the parsed selector, so
//! everything runs through the same resolver and controller. Those hints are
//! listed in [`Program::raw_hints`] and get the full step timeout instead of
//! the per-strategy budget.

use std::collections::HashSet;

use tracing::debug;

use crate::error::AgentError;
use crate::types::{
    DEFAULT_IDLE_MS, DEFAULT_IDLE_TIMEOUT_MS, SelectorBundle, SelectorDescriptor, Step,
    WaitTarget, unquote,
};

/// Steps plus the bundle entries synthesized for their selectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub steps: Vec<Step>,
    pub bundle: SelectorBundle,
    /// Hints whose only candidate is the selector written in the task.
    pub raw_hints: HashSet<String>,
}

impl Program {
    /// Merge caller-supplied candidates ahead of the synthesized ones.
    ///
    /// A hint the caller supplies candidates for is no longer raw and goes
    /// back to the per-strategy budget.
    pub fn with_bundle(mut self, caller: &SelectorBundle) -> Self {
        for (hint, descs) in caller {
            self.raw_hints.remove(hint);
            let entry = self.bundle.entry(hint.clone()).or_default();
            let generated = std::mem::take(entry);
            entry.extend(descs.iter().cloned());
            entry.extend(generated.into_iter().filter(|d| !descs.contains(d)));
        }
        self
    }

    fn hint(&mut self, raw: &str) -> String {
        let raw = raw.trim().to_string();
        self.bundle
            .entry(raw.clone())
            .or_insert_with(|| vec![SelectorDescriptor::from_raw(&raw)]);
        self.raw_hints.insert(raw.clone());
        raw
    }
}

/// Split a task into trimmed, non-empty step lines.
pub fn split_lines(task: &str) -> Vec<&str> {
    task.split('\n')
        .flat_map(|line| line.split("->"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Compile a whole task. Any unknown line fails the compile, so nothing runs.
pub fn compile(task: &str) -> Result<Program, AgentError> {
    let mut program = Program::default();
    for raw in split_lines(task) {
        let step = parse_line(raw, &mut program)?;
        debug!(line = raw, op = step.op(), "compiled step");
        program.steps.push(step);
    }
    Ok(program)
}

fn parse_line(raw: &str, program: &mut Program) -> Result<Step, AgentError> {
    let unknown = || AgentError::UnknownStep(raw.to_string());
    let (keyword, rest) = match raw.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim()),
        None => (raw, ""),
    };

    let step = match keyword.to_ascii_lowercase().as_str() {
        "open" | "goto" if !rest.is_empty() => Step::Goto {
            url: rest.to_string(),
        },
        "click" if !rest.is_empty() => Step::Click {
            hint: Some(program.hint(rest)),
            text: None,
        },
        "type" => {
            let (selector, text) = split_quoted(rest).ok_or_else(unknown)?;
            Step::Type {
                hint: program.hint(selector),
                text,
                secure: false,
            }
        }
        "waitfor" if !rest.is_empty() => {
            let target = match rest.strip_prefix("text=") {
                Some(text) => WaitTarget::Text {
                    text: unquote(text.trim()).0.to_string(),
                },
                None => WaitTarget::Selector {
                    selector: rest.to_string(),
                },
            };
            Step::WaitFor { target }
        }
        "gettext" if !rest.is_empty() => Step::GetText {
            selector: program.hint(rest),
        },
        "waitnetworkidle" => {
            let mut nums = rest.split_whitespace().map(str::parse::<u64>);
            let idle_ms = nums.next().transpose().map_err(|_| unknown())?;
            let timeout_ms = nums.next().transpose().map_err(|_| unknown())?;
            if nums.next().is_some() {
                return Err(unknown());
            }
            Step::WaitNetworkIdle {
                idle_ms: idle_ms.unwrap_or(DEFAULT_IDLE_MS),
                timeout_ms: timeout_ms.unwrap_or(DEFAULT_IDLE_TIMEOUT_MS),
            }
        }
        "download" => Step::Download {
            selector: (!rest.is_empty()).then(|| program.hint(rest)),
        },
        "screenshot" if !rest.is_empty() => Step::Screenshot {
            name: rest.to_string(),
        },
        "select" => {
            let (selector, value) = split_quoted(rest).ok_or_else(unknown)?;
            Step::SelectOption {
                selector: program.hint(selector),
                value,
            }
        }
        "check" | "uncheck" if !rest.is_empty() => Step::SetCheckbox {
            selector: program.hint(rest),
            checked: keyword.eq_ignore_ascii_case("check"),
        },
        "frameclick" => {
            let (frame, selector) = two_words(rest).ok_or_else(unknown)?;
            Step::FrameClick {
                frame: frame.to_string(),
                selector: selector.to_string(),
            }
        }
        "frametype" => {
            let (frame, rest) = two_words(rest).ok_or_else(unknown)?;
            let (selector, text) = split_quoted(rest).ok_or_else(unknown)?;
            Step::FrameType {
                frame: frame.to_string(),
                selector: selector.to_string(),
                text,
                secure: false,
            }
        }
        "framegettext" => {
            let (frame, selector) = two_words(rest).ok_or_else(unknown)?;
            Step::FrameGetText {
                frame: frame.to_string(),
                selector: selector.to_string(),
            }
        }
        _ => return Err(unknown()),
    };
    Ok(step)
}

/// `first rest`, both non-empty.
fn two_words(s: &str) -> Option<(&str, &str)> {
    let (first, rest) = s.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    (!rest.is_empty()).then_some((first, rest))
}

/// `selector "text"` with the text in double quotes.
fn split_quoted(s: &str) -> Option<(&str, String)> {
    let (selector, text) = two_words(s)?;
    if text.len() < 2 || !text.starts_with('"') || !text.ends_with('"') {
        return None;
    }
    Some((selector, text[1..text.len() - 1].to_string()))
}
