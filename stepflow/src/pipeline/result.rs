//! The outcome of a run.

use crate::context::State;
use crate::errors::FlowError;
use serde_json::Value;

/// How a run ended, short of a propagated error.
#[derive(Debug)]
pub enum RunResult {
    /// Every step ran. Holds the merged state, or the output transform's value.
    Completed(Value),
    /// A break step fired.
    Broke {
        /// The break step.
        step: String,
        /// The short-circuit payload.
        payload: Value,
    },
    /// A step failed and the run was configured not to raise.
    Partial {
        /// State accumulated before the failing step.
        state: State,
        /// The failure.
        error: FlowError,
    },
}

impl RunResult {
    /// Returns true if every step ran.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns true if a break step ended the run.
    #[must_use]
    pub fn is_broke(&self) -> bool {
        matches!(self, Self::Broke { .. })
    }

    /// Returns true if a failure was swallowed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }

    /// Returns the final output or the break payload.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Completed(value) | Self::Broke { payload: value, .. } => Some(value),
            Self::Partial { .. } => None,
        }
    }

    /// Returns the swallowed error of a partial result.
    #[must_use]
    pub fn error(&self) -> Option<&FlowError> {
        match self {
            Self::Partial { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Converts into a plain `Result`, surfacing a swallowed error.
    ///
    /// # Errors
    ///
    /// Returns the error of a partial result.
    pub fn into_result(self) -> Result<Value, FlowError> {
        match self {
            Self::Completed(value) | Self::Broke { payload: value, .. } => Ok(value),
            Self::Partial { error, .. } => Err(error),
        }
    }
}
