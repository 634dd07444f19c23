//! Supervised browser step runner.
//!
//! A run executes a list of [`Step`]s against a [`Page`]. Selector hints are
//! resolved through a [`SelectorBundle`] of fallback strategies, and every
//! failure is answered by inserting a human checkpoint ahead of the failed
//! step so it is retried after the operator resumes.

pub mod artifacts;
pub mod config;
pub mod controller;
pub mod critic;
pub mod dom;
pub mod dsl;
pub mod error;
pub mod hands;
pub mod interpreter;
pub mod network;
pub mod page;
pub mod pause;
pub mod resolver;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::AgentConfig;
pub use controller::{RunPhase, RunReport, RunState, drive};
pub use error::AgentError;
pub use page::{FrameRef, Locator, LocatorKind, Page, PageProvider, RequestEvent, RequestStream};
pub use pause::{HumanPause, PauseBridge};
pub use types::{
    LoadMilestone, Outcome, RoleQuery, SelectorBundle, SelectorDescriptor, Step, TimelineEntry,
    WaitTarget,
};
pub use worker::{AgentEvent, AgentWorker, Command, Envelope, LogLevel, Reply};
