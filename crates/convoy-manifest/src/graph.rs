//! Dependency graph management using `petgraph`.
//!
//! Builds a directed graph from container links and resolves a
//! deterministic execution order with Kahn's algorithm.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use convoy_common::error::{ConvoyError, Result};
use petgraph::Direction;
use petgraph::graph::NodeIndex;

use crate::model::Manifest;

/// An ordering constraint: `dependency` must be reconciled before `dependent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    /// The linked-to container.
    pub dependency: String,
    /// The container declaring the link.
    pub dependent: String,
}

/// A dependency graph of containers.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Internal petgraph representation.
    graph: petgraph::Graph<String, ()>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: petgraph::Graph::new(),
        }
    }

    /// Builds the graph for every container and link in a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::Manifest`] if a link names an undeclared container.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        let mut graph = Self::new();
        let mut nodes = HashMap::new();
        for name in manifest.names() {
            let _ = nodes.insert(name, graph.add_container(name));
        }
        for edge in dependency_edges(manifest) {
            let (Some(&dependent), Some(&dependency)) =
                (nodes.get(edge.dependent.as_str()), nodes.get(edge.dependency.as_str()))
            else {
                return Err(ConvoyError::Manifest {
                    message: format!(
                        "container \"{}\" links to \"{}\", which is not defined",
                        edge.dependent, edge.dependency
                    ),
                });
            };
            graph.add_dependency(dependent, dependency);
        }
        Ok(graph)
    }

    /// Adds a container node to the graph.
    pub fn add_container(&mut self, name: impl Into<String>) -> NodeIndex {
        self.graph.add_node(name.into())
    }

    /// Adds a dependency edge: `dependent` depends on `dependency`.
    ///
    /// The graph edge points from `dependency` to `dependent`
    /// so that a topological walk yields dependencies first.
    pub fn add_dependency(&mut self, dependent: NodeIndex, dependency: NodeIndex) {
        let _ = self.graph.update_edge(dependency, dependent, ());
    }

    /// Returns the execution order of all containers.
    ///
    /// Every dependency precedes its dependents. Among containers that are
    /// ready at the same time, the lexicographically smallest name goes
    /// first, so the order is fully deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::DependencyCycle`] naming every container that
    /// could not be ordered.
    pub fn resolve_order(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
            .collect();

        let mut ready: BinaryHeap<Reverse<(&str, NodeIndex)>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&idx, _)| Reverse((self.graph[idx].as_str(), idx)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((name, idx))) = ready.pop() {
            order.push(name.to_string());
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.graph[next].as_str(), next)));
                    }
                }
            }
        }

        if order.len() < self.graph.node_count() {
            let containers: BTreeSet<String> = in_degree
                .into_iter()
                .filter(|&(_, degree)| degree > 0)
                .map(|(idx, _)| self.graph[idx].clone())
                .collect();
            return Err(ConvoyError::DependencyCycle {
                containers: containers.into_iter().collect(),
            });
        }
        Ok(order)
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives one edge per link declaration, in name order.
#[must_use]
pub fn dependency_edges(manifest: &Manifest) -> Vec<DependencyEdge> {
    manifest
        .containers()
        .flat_map(|spec| {
            spec.dependencies().map(|dependency| DependencyEdge {
                dependency: dependency.to_string(),
                dependent: spec.name.clone(),
            })
        })
        .collect()
}

/// Computes the execution order for a manifest.
///
/// # Errors
///
/// Returns an error on dangling links or cycles.
pub fn execution_order(manifest: &Manifest) -> Result<Vec<String>> {
    let order = DependencyGraph::from_manifest(manifest)?.resolve_order()?;
    tracing::info!(?order, "execution order resolved");
    Ok(order)
}

/// Returns every container that transitively links to `name`, sorted.
#[must_use]
pub fn dependents_of(manifest: &Manifest, name: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut pending = vec![name.to_string()];
    while let Some(current) = pending.pop() {
        for spec in manifest.containers() {
            if spec.links.contains_key(&current) && found.insert(spec.name.clone()) {
                pending.push(spec.name.clone());
            }
        }
    }
    found
}
