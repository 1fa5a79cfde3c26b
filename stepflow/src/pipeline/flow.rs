//! A built, immutable flow.

use super::engine::{run_steps, OutputFn};
use super::options::RunOptions;
use super::result::RunResult;
use crate::context::Dependencies;
use crate::errors::FlowError;
use crate::steps::StepDefinition;
use std::sync::Arc;

/// An ordered list of uniquely named steps, ready to run.
///
/// Flows are created by [`FlowBuilder`](super::FlowBuilder) and can be run
/// any number of times, concurrently if needed.
pub struct Flow<I, D> {
    name: String,
    steps: Vec<StepDefinition<I, D>>,
    output: Option<OutputFn<I>>,
}

impl<I, D> Flow<I, D>
where
    I: Send + Sync + 'static,
    D: Dependencies,
{
    pub(crate) fn new(
        name: String,
        steps: Vec<StepDefinition<I, D>>,
        output: Option<OutputFn<I>>,
    ) -> Self {
        Self {
            name,
            steps,
            output,
        }
    }

    /// Returns the flow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[StepDefinition<I, D>] {
        &self.steps
    }

    /// Returns the step names in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }

    /// Runs the flow once.
    ///
    /// # Errors
    ///
    /// Returns the first unrecovered step failure. With
    /// `throw_on_error = false` the failure is returned inside
    /// [`RunResult::Partial`] instead.
    pub async fn run(&self, input: I, deps: D, options: &RunOptions) -> Result<RunResult, FlowError> {
        self.run_shared(Arc::new(input), Arc::new(deps), options).await
    }

    /// Runs the flow with an input and dependency bag the caller keeps sharing.
    ///
    /// # Errors
    ///
    /// Same as [`Flow::run`].
    pub async fn run_shared(
        &self,
        input: Arc<I>,
        deps: Arc<D>,
        options: &RunOptions,
    ) -> Result<RunResult, FlowError> {
        run_steps(&self.name, &self.steps, self.output.as_ref(), input, deps, options).await
    }
}

impl<I, D> std::fmt::Debug for Flow<I, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("output", &self.output.is_some())
            .finish()
    }
}
