use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use stepcore::{Node, NodeContext, NodeError, NodeKind, NodeOutcome, NodeSpec, RunState, WorkflowDefinition};
use stepruntime::{NodeFactory, NodeMetadata};

fn config_str(config: &Map<String, Value>, key: &str, default: &str) -> String {
    config
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn config_ms(config: &Map<String, Value>, key: &str, default: u64) -> Result<u64, NodeError> {
    match config.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| NodeError::Configuration(format!("'{}' must be a non-negative integer", key))),
    }
}

/// Looks up the signing-up user (simulated) and stores their details
pub struct GetUserDataNode {
    id: String,
    user_name: String,
    user_email: String,
    user_type: String,
    delay: Duration,
}

#[async_trait]
impl Node for GetUserDataNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Task
    }

    fn node_type(&self) -> &str {
        "GetUserDataNode"
    }

    async fn execute(&self, ctx: NodeContext, mut state: RunState) -> Result<NodeOutcome, NodeError> {
        ctx.events.info("Fetching user data");
        ctx.pause(self.delay).await?;

        state.set("user_name", self.user_name.clone());
        state.set("user_email", self.user_email.clone());
        state.set("user_type", self.user_type.clone());
        state.record_visit(&self.id);
        Ok(NodeOutcome::Continue(state))
    }
}

pub struct GetUserDataNodeFactory;

impl NodeFactory for GetUserDataNodeFactory {
    fn create(&self, node_id: &str, config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(GetUserDataNode {
            id: node_id.to_string(),
            user_name: config_str(config, "user_name", "Alex"),
            user_email: config_str(config, "user_email", "Alex@example.com"),
            user_type: config_str(config, "user_type", "standard"),
            delay: Duration::from_millis(config_ms(config, "delay_ms", 1000)?),
        }))
    }

    fn node_type(&self) -> &str {
        "GetUserDataNode"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Fetch user name, email and type into the payload".to_string(),
            category: "onboarding".to_string(),
            kind: NodeKind::Task,
        }
    }
}

/// Sends the welcome email (simulated) to `payload.user_email`
pub struct SendWelcomeEmailNode {
    id: String,
    delay: Duration,
}

#[async_trait]
impl Node for SendWelcomeEmailNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Task
    }

    fn node_type(&self) -> &str {
        "SendWelcomeEmailNode"
    }

    async fn execute(&self, ctx: NodeContext, mut state: RunState) -> Result<NodeOutcome, NodeError> {
        ctx.pause(self.delay).await?;

        let user_name = state.get_str("user_name").unwrap_or("there").to_string();
        match state.get_str("user_email").map(str::to_string) {
            Some(email) => {
                ctx.events
                    .info(format!("Email sent to: {} with body 'Welcome, {}!'", email, user_name));
                state.set("welcome_email_sent_to", email);
            }
            None => {
                ctx.events.warn("No user_email in payload; welcome email not sent");
                state.set("welcome_email_sent_to", Value::Null);
            }
        }

        state.record_visit(&self.id);
        Ok(NodeOutcome::Continue(state))
    }
}

pub struct SendWelcomeEmailNodeFactory;

impl NodeFactory for SendWelcomeEmailNodeFactory {
    fn create(&self, node_id: &str, config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(SendWelcomeEmailNode {
            id: node_id.to_string(),
            delay: Duration::from_millis(config_ms(config, "delay_ms", 500)?),
        }))
    }

    fn node_type(&self) -> &str {
        "SendWelcomeEmailNode"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Send a welcome email to the user".to_string(),
            category: "onboarding".to_string(),
            kind: NodeKind::Task,
        }
    }
}

/// Puts a premium user on the premium support queue
pub struct EscalateToPremiumSupportNode {
    id: String,
}

#[async_trait]
impl Node for EscalateToPremiumSupportNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Task
    }

    fn node_type(&self) -> &str {
        "EscalateToPremiumSupportNode"
    }

    async fn execute(&self, ctx: NodeContext, mut state: RunState) -> Result<NodeOutcome, NodeError> {
        let user_name = state.require_str("user_name")?.to_string();
        ctx.events
            .info(format!("Escalating to premium support queue for user: {}", user_name));

        state.set("support_queue", "premium");
        state.record_visit(&self.id);
        Ok(NodeOutcome::Continue(state))
    }
}

pub struct EscalateToPremiumSupportNodeFactory;

impl NodeFactory for EscalateToPremiumSupportNodeFactory {
    fn create(&self, node_id: &str, _config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(EscalateToPremiumSupportNode {
            id: node_id.to_string(),
        }))
    }

    fn node_type(&self) -> &str {
        "EscalateToPremiumSupportNode"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Route a premium user to premium support".to_string(),
            category: "onboarding".to_string(),
            kind: NodeKind::Task,
        }
    }
}

pub struct ProcessStandardUserNode {
    id: String,
}

#[async_trait]
impl Node for ProcessStandardUserNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Task
    }

    fn node_type(&self) -> &str {
        "ProcessStandardUserNode"
    }

    async fn execute(&self, ctx: NodeContext, mut state: RunState) -> Result<NodeOutcome, NodeError> {
        ctx.events.info("Processing as a standard user");
        state.set("support_queue", "standard");
        state.record_visit(&self.id);
        Ok(NodeOutcome::Continue(state))
    }
}

pub struct ProcessStandardUserNodeFactory;

impl NodeFactory for ProcessStandardUserNodeFactory {
    fn create(&self, node_id: &str, _config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(ProcessStandardUserNode {
            id: node_id.to_string(),
        }))
    }

    fn node_type(&self) -> &str {
        "ProcessStandardUserNode"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Handle a standard user".to_string(),
            category: "onboarding".to_string(),
            kind: NodeKind::Task,
        }
    }
}

/// The agentic user onboarding workflow: fetch the user, route on their
/// type, then converge on the welcome email.
pub fn onboarding_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new("Agentic User Onboarding", "step_start")
        .with_node("step_start", NodeSpec::new("StartNode").with_next("step_get_user"))
        .with_node("step_get_user", NodeSpec::new("GetUserDataNode").with_next("step_route_user"))
        .with_node("step_route_user", NodeSpec::new("RouteUserByTypeNode"))
        .with_node(
            "step_escalate",
            NodeSpec::new("EscalateToPremiumSupportNode").with_next("step_send_email"),
        )
        .with_node(
            "step_standard_process",
            NodeSpec::new("ProcessStandardUserNode").with_next("step_send_email"),
        )
        .with_node("step_send_email", NodeSpec::new("SendWelcomeEmailNode").with_next("step_end"))
        .with_node("step_end", NodeSpec::new("EndNode"))
}
