//! Test assertions for run results.

use crate::errors::{ErrorKind, FlowError};
use crate::pipeline::RunResult;
use serde_json::Value;

/// Asserts that the run completed and returns its output.
#[track_caller]
pub fn assert_completed(result: &Result<RunResult, FlowError>) -> &Value {
    match result {
        Ok(RunResult::Completed(value)) => value,
        other => panic!("Expected a completed run, got {other:?}"),
    }
}

/// Asserts that the run broke at `step` and returns the payload.
#[track_caller]
pub fn assert_broke<'a>(result: &'a Result<RunResult, FlowError>, step: &str) -> &'a Value {
    match result {
        Ok(RunResult::Broke { step: at, payload }) if at == step => payload,
        other => panic!("Expected a break at '{step}', got {other:?}"),
    }
}

/// Asserts that the run failed with `kind` and returns the error.
#[track_caller]
pub fn assert_failed(result: &Result<RunResult, FlowError>, kind: ErrorKind) -> &FlowError {
    match result {
        Err(err) if err.kind() == kind => err,
        other => panic!("Expected a {kind} failure, got {other:?}"),
    }
}

/// Asserts that the output has `key` equal to `expected`.
#[track_caller]
pub fn assert_output_value(output: &Value, key: &str, expected: &Value) {
    let actual = output.get(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected value {expected:?} for key '{key}', got {actual:?}"
    );
}
