//! The sequential execution engine.

use super::options::RunOptions;
use super::result::RunResult;
use super::retry::run_with_retry;
use super::timeout::{classify_validation, Deadline, Watchdog};
use crate::context::{Dependencies, RunMeta, State, StepContext, TransactionWork};
use crate::errors::{Capability, FlowError};
use crate::merge::shallow_merge;
use crate::observability::{FlowObserver, SpanTimer, StepOutcome};
use crate::steps::{RetryPolicy, StepDefinition, StepKind};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Transforms the final state into the run's output.
pub type OutputFn<I> = Arc<dyn Fn(State, &I) -> Value + Send + Sync>;

/// Runs `steps` in order as flow `flow_name`.
///
/// This is the engine underneath [`Flow::run`](super::Flow::run), usable
/// without building a flow. No output transform is applied.
///
/// # Errors
///
/// Returns the first unrecovered step failure, unless
/// `options.throw_on_error` is false, in which case it comes back as
/// [`RunResult::Partial`].
pub async fn execute<I, D>(
    flow_name: &str,
    steps: &[StepDefinition<I, D>],
    input: Arc<I>,
    deps: Arc<D>,
    options: &RunOptions,
) -> Result<RunResult, FlowError>
where
    I: Send + Sync + 'static,
    D: Dependencies,
{
    run_steps(flow_name, steps, None, input, deps, options).await
}

pub(crate) async fn run_steps<I, D>(
    flow: &str,
    steps: &[StepDefinition<I, D>],
    output: Option<&OutputFn<I>>,
    input: Arc<I>,
    deps: Arc<D>,
    options: &RunOptions,
) -> Result<RunResult, FlowError>
where
    I: Send + Sync + 'static,
    D: Dependencies,
{
    let observer = options.observer.as_ref();
    let run_timer = SpanTimer::start(flow);
    let run_token = options
        .signal
        .as_ref()
        .map_or_else(CancellationToken::new, CancellationToken::child_token);
    // Detached attempts see the signal fire once the run is over.
    let _run_guard = run_token.clone().drop_guard();
    let deadline = options.timeout.and_then(Deadline::starting_now);

    let mut meta = RunMeta::new(flow, options.correlation_id.clone());
    let mut state = State::new();

    debug!(
        flow,
        correlation_id = %meta.correlation_id,
        steps = steps.len(),
        "Running flow"
    );
    observer.on_flow_start(&meta);

    for step in steps {
        let step_timer = SpanTimer::start(&step.name);
        let guard = Watchdog {
            flow,
            step: &step.name,
            step_timeout: step
                .retry
                .as_ref()
                .and_then(|policy| policy.timeout)
                .or(options.step_timeout),
            deadline,
            run_token: &run_token,
        };

        if let Some(err) = precheck(&guard) {
            observer.on_step_error(flow, &step.name, &err, step_timer.elapsed_ms());
            return fail(flow, state, err, options, &run_timer);
        }

        meta.enter_step(&step.name);
        let ctx = StepContext::new(
            Arc::clone(&input),
            Arc::clone(&deps),
            state.clone(),
            meta.clone(),
            run_token.child_token(),
        );

        if let Some(condition) = &step.condition {
            if !condition(&ctx) {
                debug!(flow, step = %step.name, "Condition false, skipping step");
                observer.on_step_skipped(flow, &step.name);
                continue;
            }
        }

        observer.on_step_start(flow, &step.name);

        match run_step(step, &ctx, &guard, options, observer).await {
            Ok(StepOutcome::Broke(payload)) => {
                let outcome = StepOutcome::Broke(payload.clone());
                observer.on_step_complete(flow, &step.name, &outcome, step_timer.finish());
                observer.on_flow_break(flow, &step.name, run_timer.finish());
                return Ok(RunResult::Broke {
                    step: step.name.clone(),
                    payload,
                });
            }
            Ok(outcome) => {
                observer.on_step_complete(flow, &step.name, &outcome, step_timer.finish());
                if let StepOutcome::Result(Some(partial)) = outcome {
                    shallow_merge(&mut state, partial);
                }
            }
            Err(err) => {
                observer.on_step_error(flow, &step.name, &err, step_timer.finish());
                return fail(flow, state, err, options, &run_timer);
            }
        }
    }

    let value = match output {
        Some(transform) => transform(state, &input),
        None => Value::Object(state),
    };
    observer.on_flow_complete(flow, run_timer.finish());
    Ok(RunResult::Completed(value))
}

/// Checks the run-wide watchdogs before a step starts.
fn precheck(guard: &Watchdog<'_>) -> Option<FlowError> {
    if guard.run_token.is_cancelled() {
        return Some(guard.cancelled_error());
    }
    match guard.deadline {
        Some(deadline) if deadline.is_expired() => Some(guard.flow_timeout_error(deadline.budget)),
        _ => None,
    }
}

fn fail(
    flow: &str,
    state: State,
    err: FlowError,
    options: &RunOptions,
    run_timer: &SpanTimer,
) -> Result<RunResult, FlowError> {
    if options.throw_on_error {
        options.observer.on_flow_error(flow, &err, run_timer.elapsed_ms());
        Err(err)
    } else {
        debug!(flow, err = %err, "Returning partial state");
        Ok(RunResult::Partial { state, error: err })
    }
}

/// Handles a collaborator the dependency bag does not provide.
fn missing(
    guard: &Watchdog<'_>,
    capability: Capability,
    throw: bool,
) -> Result<StepOutcome, FlowError> {
    if throw {
        return Err(FlowError::MissingCollaborator {
            flow: guard.flow.to_string(),
            step: guard.step.to_string(),
            capability,
        });
    }
    warn!(
        flow = guard.flow,
        step = guard.step,
        %capability,
        "No {capability} provided, skipping step"
    );
    Ok(StepOutcome::CollaboratorMissing(capability))
}

/// Dispatches one step by variant.
async fn run_step<I, D>(
    step: &StepDefinition<I, D>,
    ctx: &StepContext<I, D>,
    guard: &Watchdog<'_>,
    options: &RunOptions,
    observer: &dyn FlowObserver,
) -> Result<StepOutcome, FlowError>
where
    I: Send + Sync + 'static,
    D: Dependencies,
{
    let default_policy = RetryPolicy::default();
    let policy = step.retry.as_ref().unwrap_or(&default_policy);

    match &step.kind {
        StepKind::Validate(handler) => {
            let handler = Arc::clone(handler);
            run_with_retry(
                guard,
                &default_policy,
                observer,
                ctx,
                classify_validation,
                move |ctx| handler(ctx),
            )
            .await
            .map(|()| StepOutcome::Validated)
        }
        StepKind::Compute(handler) => {
            let handler = Arc::clone(handler);
            run_with_retry(
                guard,
                policy,
                observer,
                ctx,
                FlowError::from_handler,
                move |ctx| handler(ctx),
            )
            .await
            .map(StepOutcome::Result)
        }
        StepKind::Transactional(handler) => {
            if ctx.deps().database().is_none() {
                return missing(
                    guard,
                    Capability::Database,
                    options.error_handling.throw_on_missing_database,
                );
            }
            let handler = Arc::clone(handler);
            run_with_retry(
                guard,
                policy,
                observer,
                ctx,
                FlowError::from_handler,
                move |ctx: StepContext<I, D>| {
                    let handler = Arc::clone(&handler);
                    async move {
                        let deps = Arc::clone(ctx.deps_arc());
                        let database = deps
                            .database()
                            .ok_or_else(|| anyhow::anyhow!("database disappeared from dependencies"))?;
                        let work: TransactionWork = Box::new(move |tx| handler(ctx, tx));
                        database.transaction(work).await
                    }
                },
            )
            .await
            .map(StepOutcome::Result)
        }
        StepKind::Event { channel, handler } => {
            if ctx.deps().event_publisher().is_none() {
                return missing(
                    guard,
                    Capability::EventPublisher,
                    options.error_handling.throw_on_missing_event_publisher,
                );
            }
            let handler = Arc::clone(handler);
            let channel = channel.clone();
            run_with_retry(
                guard,
                policy,
                observer,
                ctx,
                FlowError::from_handler,
                move |ctx: StepContext<I, D>| {
                    let handler = Arc::clone(&handler);
                    let channel = channel.clone();
                    async move {
                        let events = handler(ctx.clone()).await?;
                        let publisher = ctx
                            .deps()
                            .event_publisher()
                            .ok_or_else(|| anyhow::anyhow!("event publisher disappeared from dependencies"))?;
                        let count = events.len();
                        for event in events {
                            publisher
                                .publish(&channel, event.into_published(ctx.correlation_id()))
                                .await?;
                        }
                        Ok::<_, anyhow::Error>(count)
                    }
                },
            )
            .await
            .map(|count| StepOutcome::Published { count })
        }
        StepKind::Break { condition, payload } => {
            if !condition(ctx) {
                return Ok(StepOutcome::BreakNotTaken);
            }
            let value = match payload {
                Some(build) => build(ctx),
                None => Value::Object(ctx.state().clone()),
            };
            Ok(StepOutcome::Broke(value))
        }
    }
}
