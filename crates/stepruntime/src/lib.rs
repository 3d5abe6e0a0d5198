//! Workflow execution runtime
//!
//! This crate provides the engine that advances runs step by step:
//! the node registry and workflow compilation, the run queue, state
//! stores, and the worker pool that drains the queue.

mod compile;
mod executor;
mod queue;
mod registry;
mod runtime;
pub mod store;

pub use compile::CompiledWorkflow;
pub use executor::{transition, ExecutionEngine, StepResult};
pub use queue::RunQueue;
pub use registry::{FnFactory, NodeFactory, NodeMetadata, NodeRegistry};
pub use runtime::{RuntimeConfig, StepRuntime};
pub use store::{FileStateStore, InMemoryStateStore, StateStore};
