use crate::{NodeId, NodeKind, RunId, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while runs progress through their graphs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        workflow_id: String,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        run_id: RunId,
        node_id: NodeId,
        node_kind: NodeKind,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        run_id: RunId,
        node_id: NodeId,
        next_node: Option<NodeId>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        run_id: RunId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        timestamp: DateTime<Utc>,
    },
    NodeMessage {
        run_id: RunId,
        node_id: NodeId,
        message: NodeMessage,
        timestamp: DateTime<Utc>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::StepStarted { run_id, .. }
            | RunEvent::StepCompleted { run_id, .. }
            | RunEvent::StepFailed { run_id, .. }
            | RunEvent::RunFinished { run_id, .. }
            | RunEvent::NodeMessage { run_id, .. } => run_id,
        }
    }
}

/// Messages a node reports while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "level")]
pub enum NodeMessage {
    Info { message: String },
    Warning { message: String },
}

/// Event emitter for nodes to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    node_id: NodeId,
    sender: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, node_id: NodeId, sender: broadcast::Sender<RunEvent>) -> Self {
        Self {
            run_id,
            node_id,
            sender,
        }
    }

    /// Emitter with nobody listening, for driving nodes outside an engine
    pub fn detached(run_id: impl Into<RunId>, node_id: impl Into<NodeId>) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(run_id.into(), node_id.into(), sender)
    }

    pub fn emit(&self, message: NodeMessage) {
        let _ = self.sender.send(RunEvent::NodeMessage {
            run_id: self.run_id.clone(),
            node_id: self.node_id.clone(),
            message,
            timestamp: Utc::now(),
        });
    }

    /// Emit info message
    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeMessage::Info {
            message: message.into(),
        });
    }

    /// Emit warning message
    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeMessage::Warning {
            message: message.into(),
        });
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, run_id: &str, node_id: &str) -> EventEmitter {
        EventEmitter::new(run_id.to_string(), node_id.to_string(), self.sender.clone())
    }
}
