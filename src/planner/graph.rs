//! Dependency graph and execution ordering.
//!
//! Tasks are ordered so that every task runs after everything it depends on.
//! Ties are broken by declaration order, so the same task set always yields
//! the same order.

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::tasks::{TaskRef, TaskSet};

/// Dependency graph over a [`TaskSet`].
///
/// Edges point from a dependency to the task that needs it. Node indices
/// match declaration positions.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<TaskRef, ()>,
    order: Vec<NodeIndex>,
}

impl TaskGraph {
    /// Builds the graph and computes the execution order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedReference`] if a task references an
    /// undeclared task, or [`ConfigError::CircularDependency`] naming the
    /// members of every cycle.
    pub fn build(tasks: &TaskSet) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        for task in tasks.iter() {
            graph.add_node(task.task_ref());
        }

        for (position, task) in tasks.iter().enumerate() {
            let node = NodeIndex::new(position);
            for dependency in task.dependencies() {
                let Some(dep_position) = tasks.position(&dependency) else {
                    return Err(ConfigError::UnresolvedReference {
                        from: task.task_ref(),
                        missing: dependency,
                    }
                    .into());
                };
                graph.update_edge(NodeIndex::new(dep_position), node, ());
            }
        }

        let order = Self::order_nodes(&graph)?;
        debug!("Ordered {} tasks", order.len());
        Ok(Self { graph, order })
    }

    /// Kahn's algorithm, always releasing the earliest-declared ready task.
    fn order_nodes(graph: &DiGraph<TaskRef, ()>) -> Result<Vec<NodeIndex>> {
        let mut pending: Vec<usize> = graph
            .node_indices()
            .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(graph.node_count());
        while let Some(Reverse(i)) = ready.pop() {
            let node = NodeIndex::new(i);
            order.push(node);
            for next in graph.neighbors_directed(node, Direction::Outgoing) {
                let count = &mut pending[next.index()];
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }

        if order.len() == graph.node_count() {
            return Ok(order);
        }

        let mut members: Vec<String> = tarjan_scc(graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .map(|n| graph[n].to_string())
            .collect();
        members.sort();
        Err(ConfigError::CircularDependency { members }.into())
    }

    /// Tasks in execution order.
    pub fn order(&self) -> impl Iterator<Item = &TaskRef> {
        self.order.iter().map(|&n| &self.graph[n])
    }

    /// Direct dependencies of a task, in declaration order.
    #[must_use]
    pub fn dependencies_of(&self, task: &TaskRef) -> Vec<&TaskRef> {
        let Some(node) = self.graph.node_indices().find(|&n| &self.graph[n] == task) else {
            return Vec::new();
        };
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        deps.sort();
        deps.into_iter().map(|n| &self.graph[n]).collect()
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
