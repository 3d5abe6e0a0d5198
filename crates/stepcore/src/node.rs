use crate::{events::EventEmitter, NodeError, NodeId, RunId, RunState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Behavioral family of a node.
///
/// Only `Agent` nodes decide their own successor; every other kind follows
/// the `next_node` declared in the workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Start,
    Task,
    Agent,
    End,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Start => "start",
            NodeKind::Task => "task",
            NodeKind::Agent => "agent",
            NodeKind::End => "end",
        };
        f.write_str(s)
    }
}

/// Core trait that all executable nodes implement
///
/// A node receives the run state by value and hands it back inside a
/// [`NodeOutcome`]. Implementations must append their own id to
/// `state.history` exactly once, must not touch `run_id`, and must not
/// change `status` (End nodes excepted).
#[async_trait]
pub trait Node: Send + Sync {
    /// Id of this node within its workflow
    fn id(&self) -> &str;

    fn kind(&self) -> NodeKind;

    /// Registered class name (e.g., "StartNode", "RouteUserByTypeNode")
    fn node_type(&self) -> &str;

    /// Execute one step of the run
    async fn execute(&self, ctx: NodeContext, state: RunState) -> Result<NodeOutcome, NodeError>;

    /// Optional: successors an agent may pick, checked at compile time
    fn routes(&self) -> Vec<NodeId> {
        Vec::new()
    }
}

impl fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(id={})", self.node_type(), self.id())
    }
}

/// Result of a successful node execution
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// Follow the successor declared in the workflow definition
    Continue(RunState),

    /// Jump to a successor chosen by the node itself
    Branch(RunState, NodeId),
}

impl NodeOutcome {
    pub fn state(&self) -> &RunState {
        match self {
            NodeOutcome::Continue(state) | NodeOutcome::Branch(state, _) => state,
        }
    }

    pub fn into_parts(self) -> (RunState, Option<NodeId>) {
        match self {
            NodeOutcome::Continue(state) => (state, None),
            NodeOutcome::Branch(state, next) => (state, Some(next)),
        }
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub run_id: RunId,

    pub node_id: NodeId,

    /// Static configuration for this node from the workflow definition
    pub config: Map<String, Value>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the worker pool shuts down
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl NodeContext {
    pub fn new(run_id: impl Into<RunId>, node_id: impl Into<NodeId>, events: EventEmitter) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
            config: Map::new(),
            events,
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    /// Sleep for `duration`, returning `Cancelled` if the worker shuts down first.
    pub async fn pause(&self, duration: std::time::Duration) -> Result<(), NodeError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}
