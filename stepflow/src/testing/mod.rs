//! Testing utilities for stepflow flows.
//!
//! This module provides:
//! - In-memory collaborators (database and publisher)
//! - A recording observer
//! - Assertions for run results

mod assertions;
mod mocks;
mod observer;

pub use assertions::{assert_broke, assert_completed, assert_failed, assert_output_value};
pub use mocks::{InMemoryDatabase, InMemoryTransaction, RecordingPublisher};
pub use observer::{ObservedEvent, RecordingObserver};
