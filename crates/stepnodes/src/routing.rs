use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use stepcore::{Node, NodeContext, NodeError, NodeKind, NodeOutcome, RunState};
use stepruntime::{NodeFactory, NodeMetadata};

/// Agent that picks the next step from the user's type.
///
/// `payload[field] == match_value` goes to `premium_route`, anything else
/// (including a missing field) to `standard_route`. The decision reads
/// only the payload, so equal payloads always route the same way.
pub struct RouteUserByTypeNode {
    id: String,
    field: String,
    match_value: String,
    premium_route: String,
    standard_route: String,
}

impl RouteUserByTypeNode {
    pub fn decide(&self, state: &RunState) -> &str {
        if state.get_str(&self.field) == Some(self.match_value.as_str()) {
            &self.premium_route
        } else {
            &self.standard_route
        }
    }
}

#[async_trait]
impl Node for RouteUserByTypeNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Agent
    }

    fn node_type(&self) -> &str {
        "RouteUserByTypeNode"
    }

    async fn execute(&self, ctx: NodeContext, mut state: RunState) -> Result<NodeOutcome, NodeError> {
        state.record_visit(&self.id);

        let next = self.decide(&state).to_string();
        ctx.events.info(format!("Agent decided the next step is: {}", next));
        tracing::debug!(run_id = %state.run_id, next = %next, "Routing decision");

        Ok(NodeOutcome::Branch(state, next))
    }

    fn routes(&self) -> Vec<String> {
        vec![self.premium_route.clone(), self.standard_route.clone()]
    }
}

pub struct RouteUserByTypeNodeFactory;

impl NodeFactory for RouteUserByTypeNodeFactory {
    fn create(&self, node_id: &str, config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        let get = |key: &str, default: &str| -> Result<String, NodeError> {
            match config.get(key) {
                None => Ok(default.to_string()),
                Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
                Some(_) => Err(NodeError::Configuration(format!("'{}' must be a non-empty string", key))),
            }
        };

        Ok(Arc::new(RouteUserByTypeNode {
            id: node_id.to_string(),
            field: get("field", "user_type")?,
            match_value: get("match", "premium")?,
            premium_route: get("premium_route", "step_escalate")?,
            standard_route: get("standard_route", "step_standard_process")?,
        }))
    }

    fn node_type(&self) -> &str {
        "RouteUserByTypeNode"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Route premium users to escalation, everyone else to standard processing"
                .to_string(),
            category: "agent".to_string(),
            kind: NodeKind::Agent,
        }
    }
}
