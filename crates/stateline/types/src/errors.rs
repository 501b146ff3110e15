//! Runtime error model for state execution
//!
//! Every runtime failure carries a canonical error name (the value matched
//! by `Retry`/`Catch` policies) and an optional human-readable cause.
//! Definition-time errors live in the dsl crate; nothing here is raised
//! before an execution exists.

use serde::{Deserialize, Serialize};

/// Canonical error names surfaced by the engine.
///
/// These are the values `ErrorEquals` matchers are compared against.
pub mod error_name {
    /// Matches any error. Only legal as the last matcher of a policy list.
    pub const ALL: &str = "States.ALL";
    pub const TASK_FAILED: &str = "States.TaskFailed";
    pub const TIMEOUT: &str = "States.Timeout";
    pub const HEARTBEAT_TIMEOUT: &str = "States.HeartbeatTimeout";
    /// Runtime validation failures: unresolvable paths, out-of-range
    /// resolved configuration values, invalid runtime timestamps.
    pub const RUNTIME: &str = "States.Runtime";
    /// Expression-dialect evaluation failures, including non-serializable
    /// final outputs (function values).
    pub const QUERY_EVALUATION_ERROR: &str = "States.QueryEvaluationError";
    pub const PARAMETER_PATH_FAILURE: &str = "States.ParameterPathFailure";
    pub const RESULT_PATH_MATCH_FAILURE: &str = "States.ResultPathMatchFailure";
    pub const NO_CHOICE_MATCHED: &str = "States.NoChoiceMatched";
    pub const ITEM_READER_FAILED: &str = "States.ItemReaderFailed";
    pub const RESULT_WRITER_FAILED: &str = "States.ResultWriterFailed";
    pub const EXCEED_TOLERATED_FAILURE_THRESHOLD: &str =
        "States.ExceedToleratedFailureThreshold";
    pub const BRANCH_FAILED: &str = "States.BranchFailed";
}

/// A named runtime failure raised by a state.
///
/// The `error` field is the routing key for Retry/Catch selection; the
/// `cause` is informational and is carried into event details and catch
/// error objects unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{error}")]
pub struct StateError {
    /// Canonical error name, e.g. `States.TaskFailed` or a custom name
    /// raised by a Fail state or an external task.
    pub error: String,
    /// Human-readable description of what went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl StateError {
    pub fn new(error: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn named(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            cause: None,
        }
    }

    /// A `States.Runtime` failure (runtime validation).
    pub fn runtime(cause: impl Into<String>) -> Self {
        Self::new(error_name::RUNTIME, cause)
    }

    /// A `States.QueryEvaluationError` failure (expression evaluation).
    pub fn query_evaluation(cause: impl Into<String>) -> Self {
        Self::new(error_name::QUERY_EVALUATION_ERROR, cause)
    }

    pub fn task_failed(cause: impl Into<String>) -> Self {
        Self::new(error_name::TASK_FAILED, cause)
    }

    pub fn item_reader_failed(cause: impl Into<String>) -> Self {
        Self::new(error_name::ITEM_READER_FAILED, cause)
    }

    pub fn result_writer_failed(cause: impl Into<String>) -> Self {
        Self::new(error_name::RESULT_WRITER_FAILED, cause)
    }

    /// Whether a single `ErrorEquals` matcher selects this error.
    pub fn matched_by(&self, matcher: &str) -> bool {
        matcher == error_name::ALL || matcher == self.error
    }

    /// The error object injected at a catcher's result path.
    pub fn as_error_object(&self) -> serde_json::Value {
        serde_json::json!({
            "Error": self.error,
            "Cause": self.cause.clone().unwrap_or_default(),
        })
    }
}

/// Result type alias for runtime state operations.
pub type StateResult<T> = Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matched_by_exact_name() {
        let err = StateError::task_failed("boom");
        assert!(err.matched_by("States.TaskFailed"));
        assert!(!err.matched_by("States.Timeout"));
    }

    #[test]
    fn test_matched_by_states_all() {
        let err = StateError::named("CustomError");
        assert!(err.matched_by(error_name::ALL));
    }

    #[test]
    fn test_error_object_shape() {
        let err = StateError::new("CustomError", "it broke");
        let obj = err.as_error_object();
        assert_eq!(obj["Error"], "CustomError");
        assert_eq!(obj["Cause"], "it broke");
    }

    #[test]
    fn test_error_object_empty_cause() {
        let err = StateError::named("CustomError");
        assert_eq!(err.as_error_object()["Cause"], "");
    }
}
