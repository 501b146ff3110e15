//! Event history records
//!
//! Every observable transition of an execution is recorded as an Event.
//! The history is append-only: ids are strictly increasing within one
//! execution and `previous_event_id` always points at the last event of
//! the same logical branch, not necessarily `id - 1`. Distributed Map
//! Runs keep their own id space; parent histories reference them through
//! the map-run lifecycle events' details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single immutable entry of an execution's event history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic id, assigned at append time under the recorder's lock.
    pub id: u64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Id of the causally preceding event on the same branch; 0 for the
    /// first event of an execution.
    pub previous_event_id: u64,
    /// Event-type-specific payload (state name, input/output, error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The kinds of transitions recorded in an event history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    // Execution lifecycle
    ExecutionStarted,
    ExecutionSucceeded,
    ExecutionFailed,
    ExecutionTimedOut,
    ExecutionAborted,

    // Generic state lifecycle
    StateEntered,
    StateExited,

    // Task states
    TaskScheduled,
    TaskStarted,
    TaskSucceeded,
    TaskFailed,
    TaskRetryScheduled,
    /// A matched retry policy ran out of attempts (MaxAttempts 0 emits
    /// this on the first failure).
    TaskRetriesExhausted,

    // Parallel states
    ParallelStateStarted,
    ParallelBranchStarted,
    ParallelStateSucceeded,
    ParallelStateFailed,

    // Map states
    MapStateStarted,
    MapIterationStarted,
    MapIterationSucceeded,
    MapIterationFailed,
    MapStateSucceeded,
    MapStateFailed,

    // Distributed Map Runs (cross-referenced from the parent history)
    MapRunStarted,
    MapRunSucceeded,
    MapRunFailed,
}

impl EventType {
    /// Whether this event terminates the execution it belongs to.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExecutionSucceeded
                | Self::ExecutionFailed
                | Self::ExecutionTimedOut
                | Self::ExecutionAborted
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(EventType::ExecutionSucceeded.is_terminal());
        assert!(EventType::ExecutionFailed.is_terminal());
        assert!(EventType::ExecutionTimedOut.is_terminal());
        assert!(!EventType::StateEntered.is_terminal());
        assert!(!EventType::MapRunSucceeded.is_terminal());
    }

    #[test]
    fn test_event_serializes_without_empty_details() {
        let event = Event {
            id: 1,
            event_type: EventType::ExecutionStarted,
            timestamp: Utc::now(),
            previous_event_id: 0,
            details: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("details").is_none());
        assert_eq!(json["previous_event_id"], 0);
    }
}
