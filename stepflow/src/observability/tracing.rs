//! Structured logging of run lifecycle through the `tracing` ecosystem.

use super::observer::{FlowObserver, StepOutcome};
use crate::context::RunMeta;
use crate::errors::FlowError;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn, Level};

/// Emits an event at a level chosen at runtime.
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            Level::TRACE => trace!($($arg)+),
            Level::DEBUG => debug!($($arg)+),
            Level::WARN => warn!($($arg)+),
            Level::ERROR => error!($($arg)+),
            _ => info!($($arg)+),
        }
    };
}

/// Observer that logs every lifecycle notification as a `tracing` event.
///
/// Progress notifications use the configured level. Failures are always
/// logged at `WARN` (retries) or `ERROR` (step and flow errors).
#[derive(Debug, Clone)]
pub struct TracingObserver {
    level: Level,
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl TracingObserver {
    /// Creates an observer logging progress at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level observer.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level observer.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    /// Returns the progress level.
    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }
}

impl FlowObserver for TracingObserver {
    fn on_flow_start(&self, meta: &RunMeta) {
        event_at!(
            self.level,
            flow = %meta.flow_name,
            correlation_id = %meta.correlation_id,
            "Flow started"
        );
    }

    fn on_flow_complete(&self, flow: &str, duration_ms: f64) {
        event_at!(self.level, flow, duration_ms, "Flow completed");
    }

    fn on_flow_error(&self, flow: &str, err: &FlowError, duration_ms: f64) {
        error!(flow, kind = %err.kind(), duration_ms, err = %err, "Flow failed");
    }

    fn on_flow_break(&self, flow: &str, step: &str, duration_ms: f64) {
        event_at!(self.level, flow, step, duration_ms, "Flow stopped early");
    }

    fn on_step_start(&self, flow: &str, step: &str) {
        event_at!(self.level, flow, step, "Step started");
    }

    fn on_step_complete(&self, flow: &str, step: &str, outcome: &StepOutcome, duration_ms: f64) {
        event_at!(
            self.level,
            flow,
            step,
            outcome = outcome.label(),
            duration_ms,
            "Step completed"
        );
    }

    fn on_step_error(&self, flow: &str, step: &str, err: &FlowError, duration_ms: f64) {
        error!(flow, step, kind = %err.kind(), duration_ms, err = %err, "Step failed");
    }

    fn on_step_retry(
        &self,
        flow: &str,
        step: &str,
        attempt: u32,
        max_attempts: u32,
        err: &FlowError,
        delay: Duration,
    ) {
        warn!(
            flow,
            step,
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            err = %err,
            "Retrying step"
        );
    }

    fn on_step_skipped(&self, flow: &str, step: &str) {
        event_at!(self.level, flow, step, "Step skipped");
    }
}

/// Simple wall-clock timer for runs and steps.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the timer's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture_json(f: impl FnOnce()) -> Vec<serde_json::Value> {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);

        buf.contents()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("checkout");
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(timer.name(), "checkout");
        assert!(timer.finish() >= 10.0);
    }

    #[test]
    fn test_tracing_observer_levels() {
        assert_eq!(TracingObserver::default().level(), Level::INFO);
        assert_eq!(TracingObserver::debug().level(), Level::DEBUG);
    }

    #[test]
    fn test_tracing_observer_does_not_panic_without_subscriber() {
        let observer = TracingObserver::new(Level::TRACE);
        let err = FlowError::from_handler("f", "s", anyhow::anyhow!("boom"));

        observer.on_flow_start(&RunMeta::new("f", None));
        observer.on_step_start("f", "s");
        observer.on_step_retry("f", "s", 1, 2, &err, Duration::from_millis(5));
        observer.on_step_complete("f", "s", &StepOutcome::Result(None), 1.0);
        observer.on_step_error("f", "s", &err, 1.0);
        observer.on_flow_error("f", &err, 2.0);
    }

    #[test]
    fn test_failure_records_use_err_field() {
        let observer = TracingObserver::info();
        let err = FlowError::from_handler("f", "s", anyhow::anyhow!("boom"));

        let records = capture_json(|| {
            observer.on_step_retry("f", "s", 1, 3, &err, Duration::from_millis(5));
            observer.on_step_error("f", "s", &err, 1.5);
            observer.on_flow_error("f", &err, 2.5);
        });

        assert_eq!(records.len(), 3);
        for record in &records {
            let fields = &record["fields"];
            assert_eq!(fields["flow"], "f");
            assert!(fields["err"].as_str().unwrap().contains("boom"));
            assert!(fields.get("error").is_none());
        }

        let retry = &records[0]["fields"];
        assert_eq!(retry["step"], "s");
        assert_eq!(retry["attempt"], 1);
        assert_eq!(retry["max_attempts"], 3);
        assert_eq!(retry["delay_ms"], 5);
        assert_eq!(records[1]["fields"]["duration_ms"], 1.5);
    }

    #[test]
    fn test_progress_records_carry_step_and_duration() {
        let observer = TracingObserver::debug();

        let records = capture_json(|| {
            observer.on_step_complete("f", "s", &StepOutcome::BreakNotTaken, 4.0);
        });

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["level"], "DEBUG");
        let fields = &records[0]["fields"];
        assert_eq!(fields["step"], "s");
        assert_eq!(fields["duration_ms"], 4.0);
    }
}
