//! Step definitions.
//!
//! A step is a named unit of work. Its variant decides how the engine runs
//! it; the envelope (run-condition, retry policy) is shared by all variants.

mod parallel;
mod policy;

pub use parallel::parallel;
pub use policy::{RetryPolicy, RetryPolicyConfig, RetryPredicate};

use crate::context::{Event, State, StepContext, Transaction};
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Future returned by every step handler.
pub type HandlerFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

/// Handler of a validate step.
pub type ValidateFn<I, D> = Arc<dyn Fn(StepContext<I, D>) -> HandlerFuture<()> + Send + Sync>;

/// Handler of a compute step. `None` means "no state change".
pub type ComputeFn<I, D> =
    Arc<dyn Fn(StepContext<I, D>) -> HandlerFuture<Option<State>> + Send + Sync>;

/// Handler of a transactional step, invoked inside the transaction scope.
pub type TransactionalFn<I, D> =
    Arc<dyn Fn(StepContext<I, D>, Transaction) -> HandlerFuture<Option<State>> + Send + Sync>;

/// Handler of an event step, producing the events to publish.
pub type EventFn<I, D> = Arc<dyn Fn(StepContext<I, D>) -> HandlerFuture<Vec<Event>> + Send + Sync>;

/// Synchronous predicate over the current state and input.
pub type Condition<I, D> = Arc<dyn Fn(&StepContext<I, D>) -> bool + Send + Sync>;

/// Builds a short-circuit payload.
pub type PayloadFn<I, D> = Arc<dyn Fn(&StepContext<I, D>) -> Value + Send + Sync>;

/// The closed set of step variants.
pub enum StepKind<I, D> {
    /// Checks the input; failures are never retried.
    Validate(ValidateFn<I, D>),
    /// Computes a partial state.
    Compute(ComputeFn<I, D>),
    /// Computes a partial state inside a database transaction.
    Transactional(TransactionalFn<I, D>),
    /// Publishes events to a channel; never writes state.
    Event {
        /// Destination channel.
        channel: String,
        /// Event producer.
        handler: EventFn<I, D>,
    },
    /// Ends the run early when its condition holds.
    Break {
        /// Break condition.
        condition: Condition<I, D>,
        /// Payload builder; defaults to the accumulated state.
        payload: Option<PayloadFn<I, D>>,
    },
}

impl<I, D> StepKind<I, D> {
    /// Returns a short label for the variant.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validate(_) => "validate",
            Self::Compute(_) => "compute",
            Self::Transactional(_) => "transactional",
            Self::Event { .. } => "event",
            Self::Break { .. } => "break",
        }
    }
}

impl<I, D> Clone for StepKind<I, D> {
    fn clone(&self) -> Self {
        match self {
            Self::Validate(h) => Self::Validate(Arc::clone(h)),
            Self::Compute(h) => Self::Compute(Arc::clone(h)),
            Self::Transactional(h) => Self::Transactional(Arc::clone(h)),
            Self::Event { channel, handler } => Self::Event {
                channel: channel.clone(),
                handler: Arc::clone(handler),
            },
            Self::Break { condition, payload } => Self::Break {
                condition: Arc::clone(condition),
                payload: payload.clone(),
            },
        }
    }
}

/// A named step with its run-condition and retry policy.
pub struct StepDefinition<I, D> {
    /// Step name, unique within its flow.
    pub name: String,
    /// The variant and its handler.
    pub kind: StepKind<I, D>,
    /// Run only when this holds.
    pub condition: Option<Condition<I, D>>,
    /// Retry and timeout policy.
    pub retry: Option<RetryPolicy>,
}

impl<I, D> StepDefinition<I, D>
where
    I: Send + Sync + 'static,
    D: crate::context::Dependencies,
{
    /// Creates a step from a prepared variant.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: StepKind<I, D>) -> Self {
        Self {
            name: name.into(),
            kind,
            condition: None,
            retry: None,
        }
    }

    /// Creates a validate step.
    pub fn validate<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext<I, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: ValidateFn<I, D> =
            Arc::new(move |ctx: StepContext<I, D>| -> HandlerFuture<()> { Box::pin(handler(ctx)) });
        Self::new(name, StepKind::Validate(handler))
    }

    /// Creates a compute step.
    pub fn compute<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext<I, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<State>>> + Send + 'static,
    {
        let handler: ComputeFn<I, D> = Arc::new(
            move |ctx: StepContext<I, D>| -> HandlerFuture<Option<State>> { Box::pin(handler(ctx)) },
        );
        Self::new(name, StepKind::Compute(handler))
    }

    /// Creates a transactional step.
    pub fn transaction<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext<I, D>, Transaction) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<State>>> + Send + 'static,
    {
        let handler: TransactionalFn<I, D> = Arc::new(
            move |ctx: StepContext<I, D>, tx: Transaction| -> HandlerFuture<Option<State>> {
                Box::pin(handler(ctx, tx))
            },
        );
        Self::new(name, StepKind::Transactional(handler))
    }

    /// Creates an event step publishing to `channel`.
    pub fn publish<F, Fut>(name: impl Into<String>, channel: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext<I, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<Event>>> + Send + 'static,
    {
        let handler: EventFn<I, D> = Arc::new(
            move |ctx: StepContext<I, D>| -> HandlerFuture<Vec<Event>> { Box::pin(handler(ctx)) },
        );
        Self::new(
            name,
            StepKind::Event {
                channel: channel.into(),
                handler,
            },
        )
    }

    /// Creates a break step whose payload is the accumulated state.
    pub fn break_if<C>(name: impl Into<String>, condition: C) -> Self
    where
        C: Fn(&StepContext<I, D>) -> bool + Send + Sync + 'static,
    {
        Self::new(
            name,
            StepKind::Break {
                condition: Arc::new(condition),
                payload: None,
            },
        )
    }

    /// Creates a break step with a custom payload.
    pub fn break_with<C, P>(name: impl Into<String>, condition: C, payload: P) -> Self
    where
        C: Fn(&StepContext<I, D>) -> bool + Send + Sync + 'static,
        P: Fn(&StepContext<I, D>) -> Value + Send + Sync + 'static,
    {
        Self::new(
            name,
            StepKind::Break {
                condition: Arc::new(condition),
                payload: Some(Arc::new(payload)),
            },
        )
    }

    /// Runs the step only when `condition` holds.
    #[must_use]
    pub fn when<C>(mut self, condition: C) -> Self
    where
        C: Fn(&StepContext<I, D>) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Attaches a retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

impl<I, D> Clone for StepDefinition<I, D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind.clone(),
            condition: self.condition.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<I, D> std::fmt::Debug for StepDefinition<I, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("conditional", &self.condition.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Converts a JSON object into a [`State`]; anything else yields `None`.
///
/// Handy as the tail of a compute handler:
/// `Ok(as_state(json!({"total": 42})))`.
#[must_use]
pub fn as_state(value: Value) -> Option<State> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DependencyBag, RunMeta};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    type Step = StepDefinition<u32, DependencyBag>;

    fn ctx() -> StepContext<u32, DependencyBag> {
        StepContext::new(
            Arc::new(5),
            Arc::new(DependencyBag::new()),
            State::new(),
            RunMeta::new("f", None),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_compute_step_invokes_handler() {
        let step = Step::compute("double", |ctx| async move {
            Ok(as_state(json!({"doubled": ctx.input() * 2})))
        });

        assert_eq!(step.kind.label(), "compute");
        let StepKind::Compute(handler) = &step.kind else {
            panic!("expected compute");
        };
        let out = handler(ctx()).await.unwrap().unwrap();
        assert_eq!(out["doubled"], 10);
    }

    #[test]
    fn test_envelope_builders() {
        let step = Step::validate("check", |_| async { Ok(()) })
            .when(|ctx| *ctx.input() > 1)
            .with_retry(RetryPolicy::new(3));

        assert!(step.condition.is_some());
        assert_eq!(step.retry.as_ref().map(|r| r.max_attempts), Some(3));
        assert!((step.condition.as_ref().unwrap())(&ctx()));
    }

    #[test]
    fn test_break_labels_and_debug() {
        let step = Step::break_with("stop", |_| true, |_| json!("done"));
        assert_eq!(step.kind.label(), "break");
        let debug = format!("{step:?}");
        assert!(debug.contains("\"stop\""));
        assert!(debug.contains("\"break\""));
    }

    #[test]
    fn test_clone_shares_handlers() {
        let step = Step::publish("notify", "orders", |_| async { Ok(Vec::new()) });
        let cloned = step.clone();
        match (&step.kind, &cloned.kind) {
            (
                StepKind::Event { handler: a, channel },
                StepKind::Event { handler: b, .. },
            ) => {
                assert!(Arc::ptr_eq(a, b));
                assert_eq!(channel, "orders");
            }
            _ => panic!("expected event steps"),
        }
    }

    #[test]
    fn test_as_state() {
        assert!(as_state(json!({"a": 1})).is_some());
        assert!(as_state(json!([1])).is_none());
    }
}
