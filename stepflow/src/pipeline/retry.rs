//! The per-step retry loop.
//!
//! Attempts run `1..=max_attempts`. Each attempt gets a fresh child of the run
//! token and a fresh copy of the step context, and is raced against the
//! watchdogs. Between attempts the loop waits the policy's current delay.

use super::timeout::{Classifier, Watchdog};
use crate::context::{Dependencies, StepContext};
use crate::errors::{FlowError, TimeoutScope};
use crate::observability::FlowObserver;
use crate::steps::RetryPolicy;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Returns true if the engine may ever retry `error`.
///
/// Validation failures, merge conflicts, cancellation and an exhausted flow
/// deadline are final whatever the policy says.
#[must_use]
pub fn is_retryable(error: &FlowError) -> bool {
    !matches!(
        error,
        FlowError::Validation { .. }
            | FlowError::MergeConflict { .. }
            | FlowError::Cancelled { .. }
            | FlowError::Timeout {
                scope: TimeoutScope::Flow,
                ..
            }
    )
}

/// Runs `make` under `policy`, retrying failed attempts.
pub(crate) async fn run_with_retry<I, D, T, F, Fut>(
    guard: &Watchdog<'_>,
    policy: &RetryPolicy,
    observer: &dyn FlowObserver,
    ctx: &StepContext<I, D>,
    classify: Classifier,
    mut make: F,
) -> Result<T, FlowError>
where
    I: Send + Sync + 'static,
    D: Dependencies,
    T: Send + 'static,
    F: FnMut(StepContext<I, D>) -> Fut,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.delay;
    let mut attempt = 1;

    loop {
        let attempt_token = guard.run_token.child_token();
        let work = make(ctx.clone().with_signal(attempt_token.clone()));

        let err = match guard.race(&attempt_token, classify, work).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_attempts || !is_retryable(&err) || !policy.allows(&err, attempt) {
            return Err(err);
        }

        debug!(
            flow = guard.flow,
            step = guard.step,
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            err = %err,
            "Step attempt failed, retrying"
        );
        observer.on_step_retry(guard.flow, guard.step, attempt, max_attempts, &err, delay);

        backoff(guard, delay).await?;
        delay = policy.next_delay(delay);
        attempt += 1;
    }
}

/// Waits `delay`, giving up early on cancellation or the flow deadline.
async fn backoff(guard: &Watchdog<'_>, delay: Duration) -> Result<(), FlowError> {
    if delay.is_zero() {
        return Ok(());
    }

    tokio::select! {
        biased;
        () = guard.run_token.cancelled() => Err(guard.cancelled_error()),
        budget = guard.deadline_elapsed() => {
            guard.run_token.cancel();
            Err(guard.flow_timeout_error(budget))
        }
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunMeta, State};
    use crate::observability::SilentObserver;
    use crate::pipeline::timeout::Deadline;
    use crate::testing::RecordingObserver;
    use futures::future::BoxFuture;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> StepContext<(), ()> {
        StepContext::new(
            Arc::new(()),
            Arc::new(()),
            State::new(),
            RunMeta::new("f", None),
            CancellationToken::new(),
        )
    }

    fn guard(token: &CancellationToken) -> Watchdog<'_> {
        Watchdog {
            flow: "f",
            step: "flaky",
            step_timeout: None,
            deadline: None,
            run_token: token,
        }
    }

    type Attempt = BoxFuture<'static, anyhow::Result<u32>>;

    fn failing_until(
        success_at: u32,
        calls: &Arc<AtomicU32>,
    ) -> impl FnMut(StepContext<(), ()>) -> Attempt {
        let calls = Arc::clone(calls);
        move |_ctx| -> Attempt {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                if n < success_at {
                    anyhow::bail!("attempt {n} failed");
                }
                Ok(n)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_backoff_schedule() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let observer = RecordingObserver::new();
        let policy = RetryPolicy::new(3)
            .with_delay_ms(100)
            .with_backoff_multiplier(2.0);

        let started = Instant::now();
        let out = run_with_retry(
            &guard(&token),
            &policy,
            &observer,
            &ctx(),
            FlowError::from_handler,
            failing_until(3, &calls),
        )
        .await
        .unwrap();

        assert_eq!(out, 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(
            observer.retry_delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_last_attempt_propagates() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let err = run_with_retry(
            &guard(&token),
            &RetryPolicy::new(2),
            &SilentObserver,
            &ctx(),
            FlowError::from_handler,
            failing_until(10, &calls),
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(err.to_string().contains("attempt 2 failed"));
    }

    #[tokio::test]
    async fn test_predicate_stops_retries() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5).with_retry_if(|_, attempt| attempt < 2);

        run_with_retry(
            &guard(&token),
            &policy,
            &SilentObserver,
            &ctx(),
            FlowError::from_handler,
            failing_until(10, &calls),
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_interrupted_by_flow_deadline() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3).with_delay(Duration::from_secs(10));
        let guard = Watchdog {
            deadline: Deadline::starting_now(Duration::from_secs(1)),
            ..guard(&token)
        };

        let err = run_with_retry(
            &guard,
            &policy,
            &SilentObserver,
            &ctx(),
            FlowError::from_handler,
            failing_until(10, &calls),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FlowError::Timeout { scope: TimeoutScope::Flow, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_retryable() {
        let step_timeout = FlowError::Timeout {
            flow: "f".to_string(),
            step: Some("s".to_string()),
            duration: Duration::from_millis(1),
            scope: TimeoutScope::Step,
        };
        let cancelled = FlowError::Cancelled {
            flow: "f".to_string(),
            step: None,
        };

        let conflict = FlowError::from_handler(
            "f",
            "s",
            anyhow::Error::new(crate::errors::MergeConflictError::new("x")),
        );

        assert!(is_retryable(&step_timeout));
        assert!(!is_retryable(&cancelled));
        assert!(!is_retryable(&conflict));
        assert!(is_retryable(&FlowError::from_handler(
            "f",
            "s",
            anyhow::anyhow!("x")
        )));
    }
}
