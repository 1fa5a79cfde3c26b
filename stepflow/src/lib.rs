//! # Stepflow
//!
//! An in-process runner for ordered, named steps over a shared input.
//!
//! A flow is a list of steps run strictly in declaration order:
//!
//! - **Validate** steps check the input and are never retried
//! - **Compute** steps return a partial state that is shallow-merged into the
//!   accumulated state
//! - **Transactional** steps run inside a database transaction
//! - **Event** steps publish events tagged with the run's correlation id
//! - **Break** steps end the run early with a payload
//!
//! Every step may carry a run-condition and a retry policy with backoff and
//! a per-step timeout. Lifecycle notifications go to a pluggable observer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stepflow::prelude::*;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let flow = FlowBuilder::<u32, ()>::new("pricing")
//!     .compute("subtotal", |ctx| async move {
//!         Ok(as_state(json!({"subtotal": ctx.input() * 10})))
//!     })
//!     .break_if("free", |ctx| ctx.get("subtotal") == Some(&json!(0)))
//!     .compute("tax", |ctx| async move {
//!         let subtotal = ctx.get("subtotal").and_then(|v| v.as_u64()).unwrap_or(0);
//!         Ok(as_state(json!({"tax": subtotal / 5})))
//!     })
//!     .build()?;
//!
//! let result = flow.run(3, (), &RunOptions::default()).await?;
//! assert_eq!(result.value(), Some(&json!({"subtotal": 30, "tax": 6})));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod context;
pub mod errors;
pub mod merge;
pub mod observability;
pub mod pipeline;
pub mod steps;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::{
        Dependencies, DependencyBag, Event, EventPublisher, RunMeta, State, StepContext,
        Transaction, TransactionalDatabase,
    };
    pub use crate::errors::{
        Capability, ErrorKind, FlowBuildError, FlowError, MergeConflictError, TimeoutScope,
        ValidationError,
    };
    pub use crate::merge::{deep_merge, merge_all, MergeStrategy};
    pub use crate::observability::{
        ConsoleObserver, FlowObserver, SilentObserver, StepOutcome, TracingObserver,
    };
    pub use crate::pipeline::{
        execute, ErrorHandling, Flow, FlowBuilder, RunConfig, RunOptions, RunResult,
    };
    pub use crate::steps::{as_state, parallel, RetryPolicy, StepDefinition, StepKind};
    pub use tokio_util::sync::CancellationToken;
}
