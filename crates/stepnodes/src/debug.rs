use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use stepcore::{Node, NodeContext, NodeError, NodeKind, NodeOutcome, RunState};
use stepruntime::{NodeFactory, NodeMetadata};

/// Simple debug node that logs the run payload
pub struct DebugNode {
    id: String,
}

#[async_trait]
impl Node for DebugNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Task
    }

    fn node_type(&self) -> &str {
        "DebugNode"
    }

    async fn execute(&self, ctx: NodeContext, mut state: RunState) -> Result<NodeOutcome, NodeError> {
        let message = ctx.config.get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");

        ctx.events.info(format!("DEBUG: {}", message));

        // Also log the payload for visibility
        for (key, value) in &state.payload {
            ctx.events.info(format!("  {}: {}", key, value));
        }

        state.record_visit(&self.id);
        Ok(NodeOutcome::Continue(state))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, node_id: &str, _config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(DebugNode { id: node_id.to_string() }))
    }

    fn node_type(&self) -> &str {
        "DebugNode"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs payload values for debugging".to_string(),
            category: "debug".to_string(),
            kind: NodeKind::Task,
        }
    }
}
