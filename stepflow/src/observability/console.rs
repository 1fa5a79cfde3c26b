//! Plain-text observer for terminals and simple log files.

use super::observer::{FlowObserver, StepOutcome};
use crate::context::RunMeta;
use crate::errors::FlowError;
use parking_lot::Mutex;
use std::io::Write;
use std::time::Duration;

/// Writes one human-readable line per notification.
///
/// Write failures are ignored; an observer must never disturb a run.
pub struct ConsoleObserver {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new(std::io::stdout())
    }
}

impl ConsoleObserver {
    /// Creates an observer writing to `out`.
    #[must_use]
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    /// Creates an observer writing to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    fn line(&self, text: std::fmt::Arguments<'_>) {
        let mut out = self.out.lock();
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }
}

impl std::fmt::Debug for ConsoleObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleObserver").finish_non_exhaustive()
    }
}

impl FlowObserver for ConsoleObserver {
    fn on_flow_start(&self, meta: &RunMeta) {
        self.line(format_args!(
            "[{}] started (correlation {})",
            meta.flow_name, meta.correlation_id
        ));
    }

    fn on_flow_complete(&self, flow: &str, duration_ms: f64) {
        self.line(format_args!("[{flow}] completed in {duration_ms:.1}ms"));
    }

    fn on_flow_error(&self, flow: &str, error: &FlowError, duration_ms: f64) {
        self.line(format_args!("[{flow}] failed after {duration_ms:.1}ms: {error}"));
    }

    fn on_flow_break(&self, flow: &str, step: &str, duration_ms: f64) {
        self.line(format_args!("[{flow}] stopped at '{step}' after {duration_ms:.1}ms"));
    }

    fn on_step_start(&self, flow: &str, step: &str) {
        self.line(format_args!("[{flow}] -> {step}"));
    }

    fn on_step_complete(&self, flow: &str, step: &str, outcome: &StepOutcome, duration_ms: f64) {
        self.line(format_args!(
            "[{flow}] <- {step} ({}, {duration_ms:.1}ms)",
            outcome.label()
        ));
    }

    fn on_step_error(&self, flow: &str, step: &str, error: &FlowError, duration_ms: f64) {
        self.line(format_args!("[{flow}] !! {step} ({duration_ms:.1}ms): {error}"));
    }

    fn on_step_retry(
        &self,
        flow: &str,
        step: &str,
        attempt: u32,
        max_attempts: u32,
        error: &FlowError,
        delay: Duration,
    ) {
        self.line(format_args!(
            "[{flow}] retry {step} attempt {attempt}/{max_attempts} in {}ms: {error}",
            delay.as_millis()
        ));
    }

    fn on_step_skipped(&self, flow: &str, step: &str) {
        self.line(format_args!("[{flow}] skip {step}"));
    }
}
