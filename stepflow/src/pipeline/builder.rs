//! Flow builder with validation.

use super::engine::OutputFn;
use super::flow::Flow;
use crate::context::{Dependencies, Event, State, StepContext, Transaction};
use crate::errors::FlowBuildError;
use crate::merge::MergeStrategy;
use crate::steps::{parallel, ComputeFn, StepDefinition};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

/// Builder for creating validated flows.
///
/// Steps run in the order they are added. Nothing is checked until
/// [`FlowBuilder::build`].
pub struct FlowBuilder<I, D> {
    name: String,
    steps: Vec<StepDefinition<I, D>>,
    output: Option<OutputFn<I>>,
}

impl<I, D> FlowBuilder<I, D>
where
    I: Send + Sync + 'static,
    D: Dependencies,
{
    /// Creates a new flow builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            output: None,
        }
    }

    /// Appends a prepared step.
    #[must_use]
    pub fn step(mut self, step: StepDefinition<I, D>) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends a validate step.
    #[must_use]
    pub fn validate<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext<I, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.step(StepDefinition::validate(name, handler))
    }

    /// Appends a compute step.
    #[must_use]
    pub fn compute<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext<I, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<State>>> + Send + 'static,
    {
        self.step(StepDefinition::compute(name, handler))
    }

    /// Appends a compute step that only runs when `condition` holds.
    #[must_use]
    pub fn compute_if<C, F, Fut>(self, name: impl Into<String>, condition: C, handler: F) -> Self
    where
        C: Fn(&StepContext<I, D>) -> bool + Send + Sync + 'static,
        F: Fn(StepContext<I, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<State>>> + Send + 'static,
    {
        self.step(StepDefinition::compute(name, handler).when(condition))
    }

    /// Appends a transactional step.
    #[must_use]
    pub fn transaction<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext<I, D>, Transaction) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<State>>> + Send + 'static,
    {
        self.step(StepDefinition::transaction(name, handler))
    }

    /// Appends an event step publishing to `channel`.
    #[must_use]
    pub fn publish<F, Fut>(self, name: impl Into<String>, channel: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext<I, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<Event>>> + Send + 'static,
    {
        self.step(StepDefinition::publish(name, channel, handler))
    }

    /// Appends a break step returning the accumulated state.
    #[must_use]
    pub fn break_if<C>(self, name: impl Into<String>, condition: C) -> Self
    where
        C: Fn(&StepContext<I, D>) -> bool + Send + Sync + 'static,
    {
        self.step(StepDefinition::break_if(name, condition))
    }

    /// Appends a break step with a custom payload.
    #[must_use]
    pub fn break_with<C, P>(self, name: impl Into<String>, condition: C, payload: P) -> Self
    where
        C: Fn(&StepContext<I, D>) -> bool + Send + Sync + 'static,
        P: Fn(&StepContext<I, D>) -> Value + Send + Sync + 'static,
    {
        self.step(StepDefinition::break_with(name, condition, payload))
    }

    /// Appends a compute step that runs `handlers` concurrently and merges
    /// their results under `strategy`.
    #[must_use]
    pub fn parallel(
        self,
        name: impl Into<String>,
        handlers: Vec<ComputeFn<I, D>>,
        strategy: MergeStrategy,
    ) -> Self {
        self.step(StepDefinition::new(
            name,
            crate::steps::StepKind::Compute(parallel(handlers, strategy)),
        ))
    }

    /// Sets the output transform applied when every step has run.
    #[must_use]
    pub fn with_output<F>(mut self, transform: F) -> Self
    where
        F: Fn(State, &I) -> Value + Send + Sync + 'static,
    {
        self.output = Some(Arc::new(transform));
        self
    }

    /// Returns the flow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of steps added so far.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Builds the flow.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow or a step name is empty, a step name is
    /// repeated, the flow has no steps, or a retry policy is out of range.
    pub fn build(self) -> Result<Flow<I, D>, FlowBuildError> {
        if self.name.trim().is_empty() {
            return Err(FlowBuildError::EmptyFlowName);
        }
        if self.steps.is_empty() {
            return Err(FlowBuildError::EmptyFlow { flow: self.name });
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(FlowBuildError::EmptyStepName {
                    flow: self.name.clone(),
                });
            }
            if !seen.insert(step.name.as_str()) {
                return Err(FlowBuildError::DuplicateStep {
                    flow: self.name.clone(),
                    step: step.name.clone(),
                });
            }
            if let Some(policy) = &step.retry {
                policy
                    .validate()
                    .map_err(|reason| FlowBuildError::InvalidRetryPolicy {
                        flow: self.name.clone(),
                        step: step.name.clone(),
                        reason,
                    })?;
            }
        }

        Ok(Flow::new(self.name, self.steps, self.output))
    }
}

impl<I, D> std::fmt::Debug for FlowBuilder<I, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowBuilder")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DependencyBag;
    use crate::steps::{as_state, RetryPolicy};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    type Builder = FlowBuilder<(), DependencyBag>;

    #[test]
    fn test_build_keeps_declaration_order() {
        let flow = Builder::new("orders")
            .validate("check", |_| async { Ok(()) })
            .compute("price", |_| async { Ok(as_state(json!({"total": 1}))) })
            .break_if("stop", |_| false)
            .build()
            .unwrap();

        assert_eq!(flow.name(), "orders");
        assert_eq!(flow.step_names(), vec!["check", "price", "stop"]);
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let err = Builder::new("orders")
            .compute("price", |_| async { Ok(None) })
            .compute("price", |_| async { Ok(None) })
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            FlowBuildError::DuplicateStep {
                flow: "orders".to_string(),
                step: "price".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_names_rejected() {
        let err = Builder::new(" ")
            .compute("a", |_| async { Ok(None) })
            .build()
            .unwrap_err();
        assert_eq!(err, FlowBuildError::EmptyFlowName);

        let err = Builder::new("f")
            .compute("", |_| async { Ok(None) })
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowBuildError::EmptyStepName { .. }));
    }

    #[test]
    fn test_empty_flow_rejected() {
        let err = Builder::new("f").build().unwrap_err();
        assert!(matches!(err, FlowBuildError::EmptyFlow { .. }));
    }

    #[test]
    fn test_invalid_retry_policy_rejected() {
        let err = Builder::new("f")
            .step(StepDefinition::compute("a", |_| async { Ok(None) }).with_retry(RetryPolicy::new(0)))
            .build()
            .unwrap_err();

        match err {
            FlowBuildError::InvalidRetryPolicy { step, reason, .. } => {
                assert_eq!(step, "a");
                assert!(reason.contains("max_attempts"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_builder_accessors() {
        let builder = Builder::new("f").compute_if("a", |_| true, |_| async { Ok(None) });
        assert_eq!(builder.name(), "f");
        assert_eq!(builder.step_count(), 1);
    }
}
