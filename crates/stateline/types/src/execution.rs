//! Execution and Map Run identity, status, and result-writer manifests

use crate::StateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for one execution of a state machine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a Distributed Map Run.
///
/// Lives in its own id space, independent of the owning execution's
/// event ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapRunId(pub String);

impl MapRunId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for MapRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable composite key identifying one logical Map state invocation.
///
/// A re-invocation for the same key (for example after a host restart)
/// must resume the existing Map Run instead of creating a duplicate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MapRunKey {
    pub execution_id: ExecutionId,
    pub state_name: String,
}

impl MapRunKey {
    pub fn new(execution_id: ExecutionId, state_name: impl Into<String>) -> Self {
        Self {
            execution_id,
            state_name: state_name.into(),
        }
    }
}

impl std::fmt::Display for MapRunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.execution_id, self.state_name)
    }
}

// ── Status and outcome ───────────────────────────────────────────────

/// Terminal and non-terminal execution states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// The final result of driving an execution to completion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// Final output document; present only on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Originating error; present on failure and timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StateError>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
}

// ── Result-writer manifest ───────────────────────────────────────────

/// Reference to one chunked result file written by the result writer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultFileRef {
    pub key: String,
    pub size: u64,
}

/// Result-file references grouped by iteration outcome.
///
/// All three lists are empty when results were small enough to be
/// recorded inline rather than chunked to separate objects.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultFiles {
    #[serde(rename = "SUCCEEDED")]
    pub succeeded: Vec<ResultFileRef>,
    #[serde(rename = "FAILED")]
    pub failed: Vec<ResultFileRef>,
    #[serde(rename = "PENDING")]
    pub pending: Vec<ResultFileRef>,
}

/// The manifest object persisted when a Map Run with a ResultWriter
/// completes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultWriterManifest {
    pub destination_bucket: String,
    pub map_run_arn: String,
    pub result_files: ResultFiles,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_id() {
        let id = ExecutionId::generate();
        assert!(!id.0.is_empty());
        assert!(id.short().len() <= 8);

        let named = ExecutionId::new("exec-1");
        assert_eq!(format!("{}", named), "exec-1");
    }

    #[test]
    fn test_map_run_key_equality() {
        let exec = ExecutionId::new("exec-1");
        let a = MapRunKey::new(exec.clone(), "MapState");
        let b = MapRunKey::new(exec, "MapState");
        assert_eq!(a, b);

        let c = MapRunKey::new(ExecutionId::new("exec-2"), "MapState");
        assert_ne!(a, c);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::TimedOut.is_terminal());
    }

    #[test]
    fn test_manifest_wire_shape() {
        let manifest = ResultWriterManifest {
            destination_bucket: "result-bucket".into(),
            map_run_arn: "run-123".into(),
            result_files: ResultFiles::default(),
        };
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["DestinationBucket"], "result-bucket");
        assert_eq!(json["MapRunArn"], "run-123");
        assert_eq!(json["ResultFiles"]["SUCCEEDED"], serde_json::json!([]));
        assert_eq!(json["ResultFiles"]["FAILED"], serde_json::json!([]));
        assert_eq!(json["ResultFiles"]["PENDING"], serde_json::json!([]));
    }
}
