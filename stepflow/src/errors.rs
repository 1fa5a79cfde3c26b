//! Error types for the stepflow runner.
//!
//! Run-time failures are reported as [`FlowError`], build-time problems as
//! [`FlowBuildError`]. Step handlers return `anyhow::Result`; a handler that
//! rejects its input should raise a [`ValidationError`] so the engine can tell
//! "bad input" apart from a failing dependency.

use std::time::Duration;
use thiserror::Error;

/// Broad classification of a [`FlowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input was rejected by a step.
    Validation,
    /// A handler raised an error.
    StepExecution,
    /// A step or the whole flow ran out of time.
    Timeout,
    /// A required collaborator was not present in the dependency bag.
    MissingCollaborator,
    /// Two partial results wrote the same key under error-on-conflict merging.
    MergeConflict,
    /// The caller's cancellation signal fired.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::StepExecution => "step_execution",
            Self::Timeout => "timeout",
            Self::MissingCollaborator => "missing_collaborator",
            Self::MergeConflict => "merge_conflict",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A capability a step may require from the dependency bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Transactional database access.
    Database,
    /// Event publishing.
    EventPublisher,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database => f.write_str("database"),
            Self::EventPublisher => f.write_str("event publisher"),
        }
    }
}

/// Which watchdog produced a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    /// The per-step deadline.
    Step,
    /// The whole-flow deadline.
    Flow,
}

/// The main error type for flow runs.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A step rejected its input.
    #[error("Validation failed in flow '{flow}' at step '{step}': {source}")]
    Validation {
        /// The flow name.
        flow: String,
        /// The step that rejected the input.
        step: String,
        /// The handler's error, untouched.
        #[source]
        source: anyhow::Error,
    },

    /// A step handler failed.
    #[error("Step '{step}' in flow '{flow}' failed: {source}")]
    StepExecution {
        /// The flow name.
        flow: String,
        /// The failing step.
        step: String,
        /// The handler's error.
        #[source]
        source: anyhow::Error,
    },

    /// A deadline elapsed.
    #[error("{}", timeout_message(flow, step.as_deref(), *duration, *scope))]
    Timeout {
        /// The flow name.
        flow: String,
        /// The step running (or about to run) when the deadline hit.
        step: Option<String>,
        /// The configured duration of the deadline that fired.
        duration: Duration,
        /// Which deadline fired.
        scope: TimeoutScope,
    },

    /// A required collaborator is missing from the dependency bag.
    #[error("Step '{step}' in flow '{flow}' requires a {capability}, but none was provided")]
    MissingCollaborator {
        /// The flow name.
        flow: String,
        /// The step needing the collaborator.
        step: String,
        /// The missing capability.
        capability: Capability,
    },

    /// Concurrent partial results collided.
    #[error("Step '{step}' in flow '{flow}' produced conflicting results: {source}")]
    MergeConflict {
        /// The flow name.
        flow: String,
        /// The step whose partial results collided.
        step: String,
        /// The conflict.
        #[source]
        source: MergeConflictError,
    },

    /// The caller cancelled the run.
    #[error("Flow '{flow}' cancelled{}", step.as_ref().map(|s| format!(" during step '{s}'")).unwrap_or_default())]
    Cancelled {
        /// The flow name.
        flow: String,
        /// The step running when the signal fired.
        step: Option<String>,
    },
}

fn timeout_message(flow: &str, step: Option<&str>, duration: Duration, scope: TimeoutScope) -> String {
    let ms = duration.as_millis();
    match (scope, step) {
        (TimeoutScope::Step, Some(step)) => {
            format!("Step '{step}' in flow '{flow}' timed out after {ms}ms")
        }
        (TimeoutScope::Flow, Some(step)) => {
            format!("Flow '{flow}' exceeded its {ms}ms deadline before step '{step}' finished")
        }
        (_, None) => format!("Flow '{flow}' timed out after {ms}ms"),
    }
}

impl FlowError {
    /// Classifies a handler error raised inside `step`.
    ///
    /// Validation and merge-conflict errors keep their kind; everything else
    /// becomes a step execution failure.
    #[must_use]
    pub fn from_handler(flow: &str, step: &str, err: anyhow::Error) -> Self {
        if err.downcast_ref::<ValidationError>().is_some() {
            return Self::Validation {
                flow: flow.to_string(),
                step: step.to_string(),
                source: err,
            };
        }
        match err.downcast::<MergeConflictError>() {
            Ok(conflict) => Self::MergeConflict {
                flow: flow.to_string(),
                step: step.to_string(),
                source: conflict,
            },
            Err(err) => Self::StepExecution {
                flow: flow.to_string(),
                step: step.to_string(),
                source: err,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::StepExecution { .. } => ErrorKind::StepExecution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MissingCollaborator { .. } => ErrorKind::MissingCollaborator,
            Self::MergeConflict { .. } => ErrorKind::MergeConflict,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Returns the flow name.
    #[must_use]
    pub fn flow(&self) -> &str {
        match self {
            Self::Validation { flow, .. }
            | Self::StepExecution { flow, .. }
            | Self::Timeout { flow, .. }
            | Self::MissingCollaborator { flow, .. }
            | Self::MergeConflict { flow, .. }
            | Self::Cancelled { flow, .. } => flow,
        }
    }

    /// Returns the step name, when the failure is attributable to one.
    #[must_use]
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Validation { step, .. }
            | Self::StepExecution { step, .. }
            | Self::MissingCollaborator { step, .. }
            | Self::MergeConflict { step, .. } => Some(step),
            Self::Timeout { step, .. } | Self::Cancelled { step, .. } => step.as_deref(),
        }
    }

    /// Returns the handler error for validation and execution failures.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Validation { source, .. } | Self::StepExecution { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Returns true for validation failures, which are never retried.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns true for timeouts.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Converts to a JSON representation for diagnostics.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().to_string()));
        map.insert("flow".to_string(), serde_json::json!(self.flow()));
        if let Some(step) = self.step() {
            map.insert("step".to_string(), serde_json::json!(step));
        }
        match self {
            Self::Timeout { duration, .. } => {
                map.insert(
                    "duration_ms".to_string(),
                    serde_json::json!(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
                );
            }
            Self::MissingCollaborator { capability, .. } => {
                map.insert("capability".to_string(), serde_json::json!(capability.to_string()));
            }
            Self::MergeConflict { source, .. } => {
                map.insert("key".to_string(), serde_json::json!(source.key));
            }
            _ => {}
        }
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        serde_json::Value::Object(map)
    }
}

/// Error raised by a handler that rejects its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// The error message.
    pub message: String,
    /// The offending field, if known.
    pub field: Option<String>,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    /// Sets the offending field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Error raised when two partial results write the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Merge conflict: key '{key}' is produced by more than one result")]
pub struct MergeConflictError {
    /// The conflicting key.
    pub key: String,
}

impl MergeConflictError {
    /// Creates a new merge conflict error.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Errors detected while building a flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowBuildError {
    /// Two steps share a name.
    #[error("Flow '{flow}' declares step '{step}' more than once")]
    DuplicateStep {
        /// The flow name.
        flow: String,
        /// The duplicated step name.
        step: String,
    },

    /// A step has an empty or whitespace-only name.
    #[error("Flow '{flow}' contains a step with an empty name")]
    EmptyStepName {
        /// The flow name.
        flow: String,
    },

    /// The flow itself has an empty name.
    #[error("Flow name cannot be empty or whitespace-only")]
    EmptyFlowName,

    /// The flow has no steps.
    #[error("Flow '{flow}' has no steps")]
    EmptyFlow {
        /// The flow name.
        flow: String,
    },

    /// A retry policy is out of range.
    #[error("Invalid retry policy on step '{step}' in flow '{flow}': {reason}")]
    InvalidRetryPolicy {
        /// The flow name.
        flow: String,
        /// The step carrying the policy.
        step: String,
        /// What is wrong with it.
        reason: String,
    },
}
