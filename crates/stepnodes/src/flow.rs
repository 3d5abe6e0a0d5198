use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use stepcore::{Node, NodeContext, NodeError, NodeKind, NodeOutcome, RunState};
use stepruntime::{NodeFactory, NodeMetadata};

/// Marks the beginning of a workflow
pub struct StartNode {
    id: String,
}

impl StartNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Node for StartNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Start
    }

    fn node_type(&self) -> &str {
        "StartNode"
    }

    async fn execute(&self, _ctx: NodeContext, mut state: RunState) -> Result<NodeOutcome, NodeError> {
        tracing::info!(run_id = %state.run_id, "Executing {}", self.id);
        state.record_visit(&self.id);
        Ok(NodeOutcome::Continue(state))
    }
}

pub struct StartNodeFactory;

impl NodeFactory for StartNodeFactory {
    fn create(&self, node_id: &str, _config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(StartNode::new(node_id)))
    }

    fn node_type(&self) -> &str {
        "StartNode"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Marks the beginning of the workflow".to_string(),
            category: "flow".to_string(),
            kind: NodeKind::Start,
        }
    }
}

/// Marks the end of a workflow and completes the run
pub struct EndNode {
    id: String,
}

impl EndNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Node for EndNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::End
    }

    fn node_type(&self) -> &str {
        "EndNode"
    }

    async fn execute(&self, _ctx: NodeContext, mut state: RunState) -> Result<NodeOutcome, NodeError> {
        tracing::info!(run_id = %state.run_id, "Executing {}", self.id);
        state.record_visit(&self.id);
        state.complete();
        Ok(NodeOutcome::Continue(state))
    }
}

pub struct EndNodeFactory;

impl NodeFactory for EndNodeFactory {
    fn create(&self, node_id: &str, _config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(EndNode::new(node_id)))
    }

    fn node_type(&self) -> &str {
        "EndNode"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Completes the run".to_string(),
            category: "flow".to_string(),
            kind: NodeKind::End,
        }
    }
}
