//! The context handed to each step.

use super::{Dependencies, RunMeta, State};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a step handler can see.
///
/// The input and dependency bag are shared with every other step of the run;
/// the state is this step's own snapshot, so changes made to it are never
/// committed. Only the value a handler returns is merged by the engine.
pub struct StepContext<I, D> {
    input: Arc<I>,
    deps: Arc<D>,
    state: State,
    meta: RunMeta,
    signal: CancellationToken,
}

impl<I, D> StepContext<I, D>
where
    I: Send + Sync + 'static,
    D: Dependencies,
{
    /// Creates a new step context.
    #[must_use]
    pub fn new(
        input: Arc<I>,
        deps: Arc<D>,
        state: State,
        meta: RunMeta,
        signal: CancellationToken,
    ) -> Self {
        Self {
            input,
            deps,
            state,
            meta,
            signal,
        }
    }

    /// Returns the run input.
    #[must_use]
    pub fn input(&self) -> &I {
        &self.input
    }

    /// Returns the shared input handle. Its identity is stable for the run.
    #[must_use]
    pub fn input_arc(&self) -> &Arc<I> {
        &self.input
    }

    /// Returns the dependency bag.
    #[must_use]
    pub fn deps(&self) -> &D {
        &self.deps
    }

    /// Returns the shared dependency handle.
    #[must_use]
    pub fn deps_arc(&self) -> &Arc<D> {
        &self.deps
    }

    /// Returns the accumulated state as of this step.
    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Returns this step's private copy of the state for scratch writes.
    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    /// Gets a state value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Takes the state snapshot out of the context.
    #[must_use]
    pub fn into_state(self) -> State {
        self.state
    }

    /// Returns the run metadata.
    #[must_use]
    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }

    /// Returns the flow name.
    #[must_use]
    pub fn flow_name(&self) -> &str {
        &self.meta.flow_name
    }

    /// Returns the executing step's name.
    #[must_use]
    pub fn step_name(&self) -> &str {
        self.meta.current_step.as_deref().unwrap_or_default()
    }

    /// Returns the run's correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.meta.correlation_id
    }

    /// Returns the cancellation signal for this step.
    ///
    /// It fires when the step deadline, the flow deadline or the caller's
    /// signal fires. Pass it to I/O calls to stop early; the engine cannot
    /// stop a handler that ignores it.
    #[must_use]
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    /// Returns true once the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Replaces the signal; used to hand each attempt its own token.
    #[must_use]
    pub(crate) fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }
}

impl<I, D> Clone for StepContext<I, D> {
    fn clone(&self) -> Self {
        Self {
            input: Arc::clone(&self.input),
            deps: Arc::clone(&self.deps),
            state: self.state.clone(),
            meta: self.meta.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl<I, D> std::fmt::Debug for StepContext<I, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("flow", &self.meta.flow_name)
            .field("step", &self.meta.current_step)
            .field("state_keys", &self.state.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
