use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use stepcore::{Node, NodeContext, NodeError, NodeKind, NodeOutcome, RunState};
use stepruntime::{NodeFactory, NodeMetadata};
use tokio::time::Duration;

/// Delay the run for a configured duration
pub struct DelayNode {
    id: String,
}

#[async_trait]
impl Node for DelayNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Task
    }

    fn node_type(&self) -> &str {
        "DelayNode"
    }

    async fn execute(&self, ctx: NodeContext, mut state: RunState) -> Result<NodeOutcome, NodeError> {
        let delay_ms = ctx.config.get("delay_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(1000);  // Default to 1 second if not specified

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        ctx.pause(Duration::from_millis(delay_ms)).await?;

        state.record_visit(&self.id);
        Ok(NodeOutcome::Continue(state))
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, node_id: &str, _config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(DelayNode { id: node_id.to_string() }))
    }

    fn node_type(&self) -> &str {
        "DelayNode"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            kind: NodeKind::Task,
        }
    }
}
