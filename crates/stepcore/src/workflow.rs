use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type NodeId = String;

/// Complete workflow definition
///
/// Mirrors the submitted document: `{ "name", "start_at", "nodes" }`, with
/// each node naming a registered class and an optional declared successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub start_at: NodeId,
    pub nodes: BTreeMap<NodeId, NodeSpec>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, start_at: impl Into<NodeId>) -> Self {
        Self {
            name: name.into(),
            start_at: start_at.into(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn add_node(&mut self, id: impl Into<NodeId>, spec: NodeSpec) -> &mut Self {
        self.nodes.insert(id.into(), spec);
        self
    }

    /// Builder-style variant of [`add_node`](Self::add_node)
    pub fn with_node(mut self, id: impl Into<NodeId>, spec: NodeSpec) -> Self {
        self.add_node(id, spec);
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    /// Declared successor of a node, if any
    pub fn next_node_of(&self, id: &str) -> Option<&NodeId> {
        self.nodes.get(id).and_then(|spec| spec.next_node.as_ref())
    }

    /// Check the references the document makes to itself.
    ///
    /// Registry lookups happen later, during compilation.
    pub fn validate_references(&self) -> Result<(), WorkflowError> {
        if self.nodes.is_empty() {
            return Err(WorkflowError::Invalid(format!(
                "workflow '{}' declares no nodes",
                self.name
            )));
        }

        if !self.nodes.contains_key(&self.start_at) {
            return Err(WorkflowError::NodeNotFound(self.start_at.clone()));
        }

        for (id, spec) in &self.nodes {
            if let Some(next) = &spec.next_node {
                if !self.nodes.contains_key(next) {
                    return Err(WorkflowError::DanglingReference {
                        from: id.clone(),
                        to: next.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(rename = "class")]
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
}

impl NodeSpec {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            next_node: None,
            config: Map::new(),
        }
    }

    pub fn with_next(mut self, next: impl Into<NodeId>) -> Self {
        self.next_node = Some(next.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}
