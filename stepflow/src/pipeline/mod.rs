//! Flow building and execution.
//!
//! This module provides:
//! - The flow builder with build-time validation
//! - The sequential execution engine
//! - Per-step retry and timeout handling
//! - Run options, configuration and results

mod builder;
mod engine;
mod flow;
mod options;
mod result;
mod retry;
mod timeout;


pub use builder::FlowBuilder;
pub use engine::{execute, OutputFn};
pub use flow::Flow;
pub use options::{ErrorHandling, RunConfig, RunOptions};
pub use result::RunResult;
pub use retry::is_retryable;
