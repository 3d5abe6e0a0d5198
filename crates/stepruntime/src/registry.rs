use crate::compile::CompiledWorkflow;
use serde_json::{Map, Value};
use stepcore::{Node, NodeError, NodeKind, WorkflowDefinition, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Create a new instance of the node for `node_id` with given configuration
    fn create(&self, node_id: &str, config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError>;

    /// Class name this factory is registered under
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, kind, category)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub kind: NodeKind,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            kind: NodeKind::Task,
        }
    }
}

type CreateFn = dyn Fn(&str, &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> + Send + Sync;

/// Adapts a closure into a [`NodeFactory`]
pub struct FnFactory {
    node_type: String,
    metadata: NodeMetadata,
    create: Box<CreateFn>,
}

impl FnFactory {
    pub fn new<F>(node_type: impl Into<String>, kind: NodeKind, create: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> + Send + Sync + 'static,
    {
        Self {
            node_type: node_type.into(),
            metadata: NodeMetadata {
                kind,
                ..NodeMetadata::default()
            },
            create: Box::new(create),
        }
    }
}

impl NodeFactory for FnFactory {
    fn create(&self, node_id: &str, config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        (self.create)(node_id, config)
    }

    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        self.metadata.clone()
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::debug!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Register a closure as the constructor for `node_type`
    pub fn register_fn<F>(&mut self, node_type: impl Into<String>, kind: NodeKind, create: F)
    where
        F: Fn(&str, &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnFactory::new(node_type, kind, create)));
    }

    pub fn lookup(&self, node_type: &str) -> Option<&Arc<dyn NodeFactory>> {
        self.factories.get(node_type)
    }

    /// Create a node instance from a node type and config
    pub fn create_node(
        &self,
        node_type: &str,
        node_id: &str,
        config: &Map<String, Value>,
    ) -> Result<Arc<dyn Node>, WorkflowError> {
        let factory = self
            .lookup(node_type)
            .ok_or_else(|| WorkflowError::UnknownNodeType(node_type.to_string()))?;

        factory
            .create(node_id, config)
            .map_err(|e| WorkflowError::Invalid(format!("Failed to create node '{}': {}", node_id, e)))
    }

    /// Compile a definition against this registry
    pub fn compile(&self, definition: WorkflowDefinition) -> Result<CompiledWorkflow, WorkflowError> {
        CompiledWorkflow::compile(definition, self)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
