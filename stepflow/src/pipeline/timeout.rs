//! Watchdogs raced against each step attempt.

use crate::errors::{FlowError, TimeoutScope};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Maps a handler error to a [`FlowError`] for `(flow, step)`.
pub(crate) type Classifier = fn(&str, &str, anyhow::Error) -> FlowError;

/// Classifier for validate steps: every handler error is a validation failure.
pub(crate) fn classify_validation(flow: &str, step: &str, err: anyhow::Error) -> FlowError {
    FlowError::Validation {
        flow: flow.to_string(),
        step: step.to_string(),
        source: err,
    }
}

/// The whole-flow deadline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    /// When the deadline expires.
    pub at: Instant,
    /// The configured budget, for error reporting.
    pub budget: Duration,
}

impl Deadline {
    /// Starts the deadline now. A budget too large to represent is no deadline.
    pub fn starting_now(budget: Duration) -> Option<Self> {
        Instant::now()
            .checked_add(budget)
            .map(|at| Self { at, budget })
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// The three watchdogs guarding one step.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Watchdog<'a> {
    pub flow: &'a str,
    pub step: &'a str,
    pub step_timeout: Option<Duration>,
    pub deadline: Option<Deadline>,
    pub run_token: &'a CancellationToken,
}

impl Watchdog<'_> {
    pub fn step_timeout_error(&self, duration: Duration) -> FlowError {
        FlowError::Timeout {
            flow: self.flow.to_string(),
            step: Some(self.step.to_string()),
            duration,
            scope: TimeoutScope::Step,
        }
    }

    pub fn flow_timeout_error(&self, budget: Duration) -> FlowError {
        FlowError::Timeout {
            flow: self.flow.to_string(),
            step: Some(self.step.to_string()),
            duration: budget,
            scope: TimeoutScope::Flow,
        }
    }

    pub fn cancelled_error(&self) -> FlowError {
        FlowError::Cancelled {
            flow: self.flow.to_string(),
            step: Some(self.step.to_string()),
        }
    }

    /// Resolves when the flow deadline passes; never resolves without one.
    pub async fn deadline_elapsed(&self) -> Duration {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline.at).await;
                deadline.budget
            }
            None => std::future::pending().await,
        }
    }

    async fn step_elapsed(&self) -> Duration {
        match self.step_timeout {
            Some(timeout) => {
                tokio::time::sleep(timeout).await;
                timeout
            }
            None => std::future::pending().await,
        }
    }

    /// Runs one attempt on its own task and races it against the watchdogs.
    ///
    /// When a watchdog wins, `attempt_token` is cancelled and the task is
    /// detached: it keeps running in the background, only the caller moves on.
    pub async fn race<T, F>(
        &self,
        attempt_token: &CancellationToken,
        classify: Classifier,
        work: F,
    ) -> Result<T, FlowError>
    where
        T: Send + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let handle = tokio::spawn(work);

        tokio::select! {
            biased;
            joined = handle => match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(classify(self.flow, self.step, err)),
                Err(join_err) => Err(classify(
                    self.flow,
                    self.step,
                    anyhow::anyhow!("step task failed: {join_err}"),
                )),
            },
            () = self.run_token.cancelled() => Err(self.cancelled_error()),
            duration = self.step_elapsed() => {
                attempt_token.cancel();
                Err(self.step_timeout_error(duration))
            }
            budget = self.deadline_elapsed() => {
                self.run_token.cancel();
                Err(self.flow_timeout_error(budget))
            }
        }
    }
}
