use crate::registry::NodeRegistry;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use stepcore::{Node, NodeId, NodeKind, WorkflowDefinition, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// A workflow definition bound to live node instances.
///
/// Immutable once built; runs hold it behind an `Arc` so any number of
/// workers can resolve nodes without locking.
pub struct CompiledWorkflow {
    definition: WorkflowDefinition,
    nodes: HashMap<NodeId, Arc<dyn Node>>,
}

impl CompiledWorkflow {
    /// Instantiate every node of `definition` through `registry`.
    ///
    /// Fails on the first unknown class, dangling `next_node`, missing
    /// start node or dangling agent route.
    pub fn compile(definition: WorkflowDefinition, registry: &NodeRegistry) -> Result<Self, WorkflowError> {
        definition.validate_references()?;

        let mut nodes = HashMap::with_capacity(definition.nodes.len());
        for (node_id, spec) in &definition.nodes {
            let node = registry.create_node(&spec.class, node_id, &spec.config)?;

            for route in node.routes() {
                if !definition.nodes.contains_key(&route) {
                    return Err(WorkflowError::DanglingReference {
                        from: node_id.clone(),
                        to: route,
                    });
                }
            }

            nodes.insert(node_id.clone(), node);
        }

        let compiled = Self { definition, nodes };
        compiled.warn_on_dead_ends();

        tracing::info!(
            workflow = %compiled.definition.name,
            nodes = compiled.nodes.len(),
            "Compiled workflow"
        );

        Ok(compiled)
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn start_at(&self) -> &str {
        &self.definition.start_at
    }

    pub fn node(&self, id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Declared successor of a node
    pub fn next_node_of(&self, id: &str) -> Option<&NodeId> {
        self.definition.next_node_of(id)
    }

    /// Nodes no declared edge leads to from the start node.
    ///
    /// Empty when some reachable agent does not declare its routes, since
    /// its successors can't be known ahead of time.
    pub fn unreachable_nodes(&self) -> Vec<NodeId> {
        match self.reachable() {
            Some(reachable) => {
                let mut missing: Vec<NodeId> = self
                    .nodes
                    .keys()
                    .filter(|id| !reachable.contains(*id))
                    .cloned()
                    .collect();
                missing.sort();
                missing
            }
            None => Vec::new(),
        }
    }

    /// Whether an End node can be reached from the start node.
    ///
    /// `None` when an agent without declared routes makes this unknowable.
    pub fn reaches_end(&self) -> Option<bool> {
        self.reachable().map(|reachable| {
            reachable
                .iter()
                .filter_map(|id| self.nodes.get(id))
                .any(|node| node.kind() == NodeKind::End)
        })
    }

    fn reachable(&self) -> Option<Vec<NodeId>> {
        let (graph, index) = self.build_graph();
        let start = *index.get(&self.definition.start_at)?;

        let mut reachable = Vec::new();
        let mut dfs = Dfs::new(&graph, start);
        while let Some(idx) = dfs.next(&graph) {
            let id = &graph[idx];
            if let Some(node) = self.nodes.get(id) {
                if node.kind() == NodeKind::Agent && node.routes().is_empty() {
                    return None;
                }
            }
            reachable.push(id.clone());
        }
        Some(reachable)
    }

    /// Build the graph of declared edges: `next_node` links and agent routes
    fn build_graph(&self) -> (DiGraph<NodeId, ()>, HashMap<NodeId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for id in self.definition.nodes.keys() {
            index.insert(id.clone(), graph.add_node(id.clone()));
        }

        for (id, node) in &self.nodes {
            let from = index[id];
            let targets = self
                .definition
                .next_node_of(id)
                .cloned()
                .into_iter()
                .chain(node.routes());
            for target in targets {
                if let Some(to) = index.get(&target) {
                    graph.add_edge(from, *to, ());
                }
            }
        }

        (graph, index)
    }

    fn warn_on_dead_ends(&self) {
        let unreachable = self.unreachable_nodes();
        if !unreachable.is_empty() {
            tracing::warn!(
                workflow = %self.definition.name,
                "Nodes unreachable from '{}': {:?}",
                self.definition.start_at,
                unreachable
            );
        }

        if self.reaches_end() == Some(false) {
            tracing::warn!(
                workflow = %self.definition.name,
                "No End node is reachable; runs will finish STUCK"
            );
        }
    }
}

impl std::fmt::Debug for CompiledWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledWorkflow")
            .field("name", &self.definition.name)
            .field("start_at", &self.definition.start_at)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
