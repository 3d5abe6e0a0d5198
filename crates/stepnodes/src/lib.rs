//! Standard node library
//!
//! Built-in nodes for the user onboarding flow plus a few generic
//! utilities, registered under their class names.

mod debug;
mod flow;
mod http;
mod onboarding;
mod routing;
mod time;

pub use debug::DebugNode;
pub use flow::{EndNode, StartNode};
pub use http::HttpRequestNode;
pub use onboarding::{
    onboarding_workflow, EscalateToPremiumSupportNode, GetUserDataNode, ProcessStandardUserNode,
    SendWelcomeEmailNode,
};
pub use routing::RouteUserByTypeNode;
pub use time::DelayNode;
use stepruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(flow::StartNodeFactory));
    registry.register(Arc::new(flow::EndNodeFactory));
    registry.register(Arc::new(onboarding::GetUserDataNodeFactory));
    registry.register(Arc::new(onboarding::SendWelcomeEmailNodeFactory));
    registry.register(Arc::new(onboarding::EscalateToPremiumSupportNodeFactory));
    registry.register(Arc::new(onboarding::ProcessStandardUserNodeFactory));
    registry.register(Arc::new(routing::RouteUserByTypeNodeFactory));
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(http::HttpRequestNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
}

/// A registry holding every standard node
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
