//! Context management for flow execution.
//!
//! This module provides:
//! - The accumulating [`State`] type
//! - Run metadata shared read-only with steps
//! - The per-step [`StepContext`]
//! - The dependency bag and its optional collaborators

mod deps;
mod execution;
mod identity;

pub use deps::{
    Dependencies, DependencyBag, Event, EventPublisher, Transaction, TransactionWork,
    TransactionalDatabase,
};
pub use execution::StepContext;
pub use identity::RunMeta;

/// Accumulated flow state: string keys to arbitrary JSON values.
pub type State = serde_json::Map<String, serde_json::Value>;
