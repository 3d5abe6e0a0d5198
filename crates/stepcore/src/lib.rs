//! Core abstractions for the step engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: run state, workflow definitions, the node
//! contract and run events. It has no runtime dependencies.

mod error;
pub mod events;
mod node;
mod state;
mod workflow;

pub use error::{EngineError, NodeError, StoreError, WorkflowError};
pub use events::*;
pub use node::{Node, NodeContext, NodeKind, NodeOutcome};
pub use state::{Payload, RunId, RunState, RunStatus};
pub use workflow::{NodeId, NodeSpec, WorkflowDefinition};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
