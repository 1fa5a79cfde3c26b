//! Per-run options and their serializable form.

use crate::observability::{FlowObserver, SilentObserver};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What to do when a step needs a collaborator the dependency bag lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorHandling {
    /// Fail transactional steps when no database is present. Otherwise warn and skip.
    pub throw_on_missing_database: bool,
    /// Fail event steps when no publisher is present. Otherwise warn and skip.
    pub throw_on_missing_event_publisher: bool,
}

impl Default for ErrorHandling {
    fn default() -> Self {
        Self {
            throw_on_missing_database: true,
            throw_on_missing_event_publisher: true,
        }
    }
}

impl ErrorHandling {
    /// Tolerates every missing collaborator.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            throw_on_missing_database: false,
            throw_on_missing_event_publisher: false,
        }
    }
}

/// Options for one run.
#[derive(Clone)]
pub struct RunOptions {
    /// Correlation id to use instead of a generated one.
    pub correlation_id: Option<String>,
    /// Deadline for the whole run.
    pub timeout: Option<Duration>,
    /// Default per-step timeout, overridden by a step's policy.
    pub step_timeout: Option<Duration>,
    /// External cancellation signal.
    pub signal: Option<CancellationToken>,
    /// Lifecycle observer.
    pub observer: Arc<dyn FlowObserver>,
    /// Return an error on failure. When false the run returns a partial result.
    pub throw_on_error: bool,
    /// Missing-collaborator policy.
    pub error_handling: ErrorHandling,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            correlation_id: None,
            timeout: None,
            step_timeout: None,
            signal: None,
            observer: Arc::new(SilentObserver),
            throw_on_error: true,
            error_handling: ErrorHandling::default(),
        }
    }
}

impl RunOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the run deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the default step timeout.
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Sets the cancellation signal.
    #[must_use]
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Sets the observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn FlowObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Sets whether failures are returned as errors.
    #[must_use]
    pub fn with_throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = throw;
        self
    }

    /// Sets the missing-collaborator policy.
    #[must_use]
    pub fn with_error_handling(mut self, handling: ErrorHandling) -> Self {
        self.error_handling = handling;
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("correlation_id", &self.correlation_id)
            .field("timeout", &self.timeout)
            .field("step_timeout", &self.step_timeout)
            .field("signal", &self.signal.is_some())
            .field("throw_on_error", &self.throw_on_error)
            .field("error_handling", &self.error_handling)
            .finish_non_exhaustive()
    }
}

/// Serializable run settings, e.g. loaded from a JSON file.
///
/// Durations are in milliseconds. Signals and observers cannot be configured
/// this way; attach them to the resulting [`RunOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    /// Correlation id to use instead of a generated one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Run deadline in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Default step timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_timeout_ms: Option<u64>,
    /// Return an error on failure.
    pub throw_on_error: bool,
    /// Missing-collaborator policy.
    pub error_handling: ErrorHandling,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            correlation_id: None,
            timeout_ms: None,
            step_timeout_ms: None,
            throw_on_error: true,
            error_handling: ErrorHandling::default(),
        }
    }
}

impl RunConfig {
    /// Parses a config from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or has wrongly typed fields.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Converts into run options with the silent observer and no signal.
    #[must_use]
    pub fn into_options(self) -> RunOptions {
        RunOptions {
            correlation_id: self.correlation_id,
            timeout: self.timeout_ms.map(Duration::from_millis),
            step_timeout: self.step_timeout_ms.map(Duration::from_millis),
            throw_on_error: self.throw_on_error,
            error_handling: self.error_handling,
            ..RunOptions::default()
        }
    }
}

impl From<RunConfig> for RunOptions {
    fn from(config: RunConfig) -> Self {
        config.into_options()
    }
}
