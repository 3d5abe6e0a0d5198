use crate::{NodeError, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub type RunId = String;

/// Free-form business data carried by a run.
pub type Payload = Map<String, Value>;

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stuck,
}

impl RunStatus {
    /// Completed, Failed and Stuck never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Stuck)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Stuck => "STUCK",
        };
        f.write_str(s)
    }
}

/// The persisted document for one workflow run.
///
/// Stores read and write this as a whole; there are no field-level
/// updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub workflow_id: String,
    pub status: RunStatus,
    pub current_step: Option<NodeId>,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub history: Vec<NodeId>,
    pub error: Option<String>,
}

impl RunState {
    pub fn pending(run_id: impl Into<RunId>, workflow_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            status: RunStatus::Pending,
            current_step: None,
            payload,
            history: Vec::new(),
            error: None,
        }
    }

    /// Append a node to the execution history. Every node calls this
    /// exactly once per invocation.
    pub fn record_visit(&mut self, node_id: impl Into<NodeId>) {
        self.history.push(node_id.into());
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(message.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Get a payload string or fail the step
    pub fn require_str(&self, key: &str) -> Result<&str, NodeError> {
        match self.payload.get(key) {
            None | Some(Value::Null) => Err(NodeError::MissingPayload(key.to_string())),
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(NodeError::InvalidPayloadType {
                field: key.to_string(),
                expected: "string".to_string(),
                actual: json_type_name(other).to_string(),
            }),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.payload.insert(key.into(), value.into());
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_upper_case() {
        let s = serde_json::to_string(&RunStatus::Stuck).unwrap();
        assert_eq!(s, "\"STUCK\"");
        let back: RunStatus = serde_json::from_str("\"RUNNING\"").unwrap();
        assert_eq!(back, RunStatus::Running);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Stuck.is_terminal());
    }

    #[test]
    fn pending_state_is_empty() {
        let state = RunState::pending("run-1", "wf", Payload::new());
        assert_eq!(state.status, RunStatus::Pending);
        assert!(state.current_step.is_none());
        assert!(state.history.is_empty());
        assert!(state.error.is_none());
    }

    #[test]
    fn require_str_reports_type_mismatch() {
        let mut state = RunState::pending("run-1", "wf", Payload::new());
        state.set("count", json!(3));

        assert_eq!(
            state.require_str("missing"),
            Err(NodeError::MissingPayload("missing".to_string()))
        );
        match state.require_str("count") {
            Err(NodeError::InvalidPayloadType { actual, .. }) => assert_eq!(actual, "number"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn fail_sets_error() {
        let mut state = RunState::pending("run-1", "wf", Payload::new());
        state.fail("boom");
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("boom"));
    }
}
