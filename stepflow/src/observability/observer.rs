//! Lifecycle observer trait.

use crate::context::{RunMeta, State};
use crate::errors::{Capability, FlowError};
use serde_json::Value;
use std::time::Duration;

/// What a finished step produced, as reported to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A validate step accepted its input.
    Validated,
    /// A compute or transactional step returned; `None` leaves state alone.
    Result(Option<State>),
    /// An event step published this many events.
    Published {
        /// Number of events published.
        count: usize,
    },
    /// A tolerated missing collaborator skipped the step.
    CollaboratorMissing(Capability),
    /// A break step whose condition was false. Internal marker only; it
    /// never reaches the state.
    BreakNotTaken,
    /// A break step fired with this payload.
    Broke(Value),
}

impl StepOutcome {
    /// Returns the partial state to merge, if any.
    #[must_use]
    pub fn partial(&self) -> Option<&State> {
        match self {
            Self::Result(Some(state)) => Some(state),
            _ => None,
        }
    }

    /// Returns a short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validated => "validated",
            Self::Result(_) => "result",
            Self::Published { .. } => "published",
            Self::CollaboratorMissing(_) => "collaborator_missing",
            Self::BreakNotTaken => "break_not_taken",
            Self::Broke(_) => "broke",
        }
    }
}

/// Passive sink for run lifecycle notifications.
///
/// Every hook is optional. Observers cannot influence execution, and a hook
/// that is not implemented changes nothing.
#[allow(unused_variables)]
pub trait FlowObserver: Send + Sync {
    /// A run started.
    fn on_flow_start(&self, meta: &RunMeta) {}

    /// A run finished normally.
    fn on_flow_complete(&self, flow: &str, duration_ms: f64) {}

    /// A run failed and the error is about to reach the caller.
    fn on_flow_error(&self, flow: &str, error: &FlowError, duration_ms: f64) {}

    /// A break step ended the run early.
    fn on_flow_break(&self, flow: &str, step: &str, duration_ms: f64) {}

    /// A step is about to execute.
    fn on_step_start(&self, flow: &str, step: &str) {}

    /// A step finished.
    fn on_step_complete(&self, flow: &str, step: &str, outcome: &StepOutcome, duration_ms: f64) {}

    /// A step failed for good.
    fn on_step_error(&self, flow: &str, step: &str, error: &FlowError, duration_ms: f64) {}

    /// A failed attempt will be retried after `delay`.
    fn on_step_retry(
        &self,
        flow: &str,
        step: &str,
        attempt: u32,
        max_attempts: u32,
        error: &FlowError,
        delay: Duration,
    ) {
    }

    /// A step's run-condition was false.
    fn on_step_skipped(&self, flow: &str, step: &str) {}
}

/// An observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl FlowObserver for SilentObserver {}
