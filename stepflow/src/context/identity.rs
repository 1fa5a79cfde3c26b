//! Run metadata for tracking flow executions.

use crate::utils::generate_correlation_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata describing one run of a flow.
///
/// The engine owns the authoritative copy and updates `current_step` as it
/// advances; steps receive a read-only clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    /// The flow name.
    pub flow_name: String,
    /// Wall-clock time the run started.
    pub started_at: DateTime<Utc>,
    /// The step currently executing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Correlation identifier propagated to published events.
    pub correlation_id: String,
}

impl RunMeta {
    /// Creates metadata for a new run, issuing a correlation id when none is given.
    #[must_use]
    pub fn new(flow_name: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            flow_name: flow_name.into(),
            started_at: Utc::now(),
            current_step: None,
            correlation_id: correlation_id.unwrap_or_else(generate_correlation_id),
        }
    }

    /// Records the step about to execute.
    pub fn enter_step(&mut self, step: impl Into<String>) {
        self.current_step = Some(step.into());
    }

    /// Returns the wall-clock time elapsed since the run started.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
