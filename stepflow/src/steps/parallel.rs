//! Fan-out combinator: run several compute handlers at once and merge.

use super::{ComputeFn, HandlerFuture};
use crate::context::{State, StepContext};
use crate::merge::{merge_all, MergeStrategy};
use futures::future::try_join_all;
use std::sync::Arc;

/// Combines `handlers` into one compute handler.
///
/// Every handler gets its own copy of the same context and all of them run
/// concurrently. Once all have finished their results are merged in
/// positional order under `strategy`, so later handlers win ties under
/// shallow and deep merging. If any handler fails, or the merge conflicts,
/// every result is discarded and the step fails.
pub fn parallel<I, D>(handlers: Vec<ComputeFn<I, D>>, strategy: MergeStrategy) -> ComputeFn<I, D>
where
    I: Send + Sync + 'static,
    D: crate::context::Dependencies,
{
    let handlers: Arc<[ComputeFn<I, D>]> = handlers.into();
    Arc::new(move |ctx: StepContext<I, D>| -> HandlerFuture<Option<State>> {
        let pending: Vec<_> = handlers.iter().map(|handler| handler(ctx.clone())).collect();
        Box::pin(async move {
            let partials = try_join_all(pending).await?;
            let merged = merge_all(partials.into_iter().flatten(), strategy)?;
            Ok(Some(merged))
        })
    })
}
