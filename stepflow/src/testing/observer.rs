//! An observer that records every notification.

use parking_lot::RwLock;
use std::time::Duration;

use crate::context::RunMeta;
use crate::errors::{ErrorKind, FlowError};
use crate::observability::{FlowObserver, StepOutcome};

/// One recorded lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    /// A run started.
    FlowStart {
        /// The flow name.
        flow: String,
        /// The run's correlation id.
        correlation_id: String,
    },
    /// A run completed.
    FlowComplete {
        /// The flow name.
        flow: String,
    },
    /// A run failed.
    FlowError {
        /// The flow name.
        flow: String,
        /// The error kind.
        kind: ErrorKind,
        /// The failing step, if known.
        step: Option<String>,
    },
    /// A break step ended the run.
    FlowBreak {
        /// The flow name.
        flow: String,
        /// The break step.
        step: String,
    },
    /// A step started.
    StepStart {
        /// The step name.
        step: String,
    },
    /// A step completed.
    StepComplete {
        /// The step name.
        step: String,
        /// What it produced.
        outcome: StepOutcome,
    },
    /// A step failed.
    StepError {
        /// The step name.
        step: String,
        /// The error kind.
        kind: ErrorKind,
    },
    /// A step attempt will be retried.
    StepRetry {
        /// The step name.
        step: String,
        /// The failed attempt.
        attempt: u32,
        /// The attempt limit.
        max_attempts: u32,
        /// The wait before the next attempt.
        delay: Duration,
    },
    /// A step was skipped.
    StepSkipped {
        /// The step name.
        step: String,
    },
}

impl ObservedEvent {
    /// Returns a compact `hook:subject` label, e.g. `step_start:load`.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::FlowStart { flow, .. } => format!("flow_start:{flow}"),
            Self::FlowComplete { flow } => format!("flow_complete:{flow}"),
            Self::FlowError { flow, .. } => format!("flow_error:{flow}"),
            Self::FlowBreak { step, .. } => format!("flow_break:{step}"),
            Self::StepStart { step } => format!("step_start:{step}"),
            Self::StepComplete { step, .. } => format!("step_complete:{step}"),
            Self::StepError { step, .. } => format!("step_error:{step}"),
            Self::StepRetry { step, attempt, .. } => format!("step_retry:{step}:{attempt}"),
            Self::StepSkipped { step } => format!("step_skipped:{step}"),
        }
    }
}

/// A collecting observer for tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: RwLock<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.read().clone()
    }

    /// Returns the labels of all recorded events, in order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.events.read().iter().map(ObservedEvent::label).collect()
    }

    /// Returns the delays of all recorded retries, in order.
    #[must_use]
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.events
            .read()
            .iter()
            .filter_map(|event| match event {
                ObservedEvent::StepRetry { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    /// Returns the recorded outcome of `step`, if it completed.
    #[must_use]
    pub fn outcome_of(&self, step: &str) -> Option<StepOutcome> {
        self.events.read().iter().find_map(|event| match event {
            ObservedEvent::StepComplete { step: s, outcome } if s == step => Some(outcome.clone()),
            _ => None,
        })
    }

    /// Returns true if any recorded label equals `label`.
    #[must_use]
    pub fn saw(&self, label: &str) -> bool {
        self.events.read().iter().any(|event| event.label() == label)
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all recorded events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    fn push(&self, event: ObservedEvent) {
        self.events.write().push(event);
    }
}

impl FlowObserver for RecordingObserver {
    fn on_flow_start(&self, meta: &RunMeta) {
        self.push(ObservedEvent::FlowStart {
            flow: meta.flow_name.clone(),
            correlation_id: meta.correlation_id.clone(),
        });
    }

    fn on_flow_complete(&self, flow: &str, _duration_ms: f64) {
        self.push(ObservedEvent::FlowComplete {
            flow: flow.to_string(),
        });
    }

    fn on_flow_error(&self, flow: &str, error: &FlowError, _duration_ms: f64) {
        self.push(ObservedEvent::FlowError {
            flow: flow.to_string(),
            kind: error.kind(),
            step: error.step().map(str::to_string),
        });
    }

    fn on_flow_break(&self, flow: &str, step: &str, _duration_ms: f64) {
        self.push(ObservedEvent::FlowBreak {
            flow: flow.to_string(),
            step: step.to_string(),
        });
    }

    fn on_step_start(&self, _flow: &str, step: &str) {
        self.push(ObservedEvent::StepStart {
            step: step.to_string(),
        });
    }

    fn on_step_complete(&self, _flow: &str, step: &str, outcome: &StepOutcome, _duration_ms: f64) {
        self.push(ObservedEvent::StepComplete {
            step: step.to_string(),
            outcome: outcome.clone(),
        });
    }

    fn on_step_error(&self, _flow: &str, step: &str, error: &FlowError, _duration_ms: f64) {
        self.push(ObservedEvent::StepError {
            step: step.to_string(),
            kind: error.kind(),
        });
    }

    fn on_step_retry(
        &self,
        _flow: &str,
        step: &str,
        attempt: u32,
        max_attempts: u32,
        _error: &FlowError,
        delay: Duration,
    ) {
        self.push(ObservedEvent::StepRetry {
            step: step.to_string(),
            attempt,
            max_attempts,
            delay,
        });
    }

    fn on_step_skipped(&self, _flow: &str, step: &str) {
        self.push(ObservedEvent::StepSkipped {
            step: step.to_string(),
        });
    }
}
