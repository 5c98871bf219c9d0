//! Mutable operation graphs.
//!
//! A [`Graph`] is an arena of nodes addressed by [`NodeId`] plus the
//! dependency relation between them. The relation is acyclic at every point:
//! a new node can only depend on nodes that already exist, and
//! [`Graph::add_dependencies`] rejects any edge that would close a cycle.
//!
//! Graphs are built either by capturing submissions on a queue or
//! explicitly:
//!
//! ```
//! use opgraph_executor::graph::{Graph, HostCallback};
//!
//! let mut graph = Graph::new();
//! let a = graph.add_empty(&[]).unwrap();
//! let b = graph.add_empty(&[a]).unwrap();
//! let frontier = graph.frontier();
//! let done = graph
//!     .add_host_callback(HostCallback::new("done", || {}), &frontier)
//!     .unwrap();
//!
//! assert_eq!(graph.predecessors(done).unwrap(), &[b]);
//! assert_eq!(graph.frontier(), vec![done]);
//! ```
//!
//! A graph has a single writer; share it across threads only behind a lock.

mod node;

pub use node::{GraphNode, HostCallback, NodeKind};

use opgraph_core::error::{OpGraphError, Result};
use opgraph_core::types::{GraphId, NodeId};
use std::collections::VecDeque;
use std::fmt::Write as _;
use tracing::debug;

/// A mutable, acyclic dependency graph of nodes.
#[derive(Debug)]
pub struct Graph {
    id: GraphId,
    nodes: Vec<GraphNode>,
    successors: Vec<Vec<NodeId>>,
    edge_count: usize,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            id: GraphId::next(),
            nodes: Vec::new(),
            successors: Vec::new(),
            edge_count: 0,
        }
    }

    /// The graph's identifier.
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `node` belongs to this graph.
    pub fn contains(&self, node: NodeId) -> bool {
        node.graph() == self.id && (node.index() as usize) < self.nodes.len()
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        if self.contains(id) {
            self.nodes.get(id.index() as usize)
        } else {
            None
        }
    }

    /// Iterate over nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    /// Append a node that depends on every node in `predecessors`.
    ///
    /// Duplicate predecessors are collapsed. Fails with
    /// [`OpGraphError::UnknownPredecessor`] if any predecessor is not a
    /// member of this graph, in which case the graph is unchanged.
    pub fn add_node(&mut self, kind: impl Into<NodeKind>, predecessors: &[NodeId]) -> Result<NodeId> {
        let predecessors = self.checked_predecessors(predecessors)?;
        let kind = kind.into();

        let id = NodeId::new(self.id, self.nodes.len() as u32);
        for pred in &predecessors {
            self.successors[pred.index() as usize].push(id);
        }
        self.edge_count += predecessors.len();

        debug!(
            graph_id = %self.id,
            node_id = %id,
            kind = %kind.label(),
            predecessors = predecessors.len(),
            "Added node"
        );

        self.nodes.push(GraphNode {
            id,
            kind,
            predecessors,
        });
        self.successors.push(Vec::new());
        Ok(id)
    }

    /// Append a node with no work.
    pub fn add_empty(&mut self, predecessors: &[NodeId]) -> Result<NodeId> {
        self.add_node(NodeKind::Empty, predecessors)
    }

    /// Append a host callback node.
    pub fn add_host_callback(
        &mut self,
        callback: HostCallback,
        predecessors: &[NodeId],
    ) -> Result<NodeId> {
        self.add_node(NodeKind::HostCallback(callback), predecessors)
    }

    /// Make an existing node depend on additional predecessors.
    ///
    /// Edges that already exist are ignored. Fails with
    /// [`OpGraphError::UnknownNode`] or [`OpGraphError::UnknownPredecessor`]
    /// for foreign IDs and with [`OpGraphError::CycleRejected`] if `node`
    /// already reaches any of the predecessors (directly or transitively).
    /// On failure the graph is unchanged.
    pub fn add_dependencies(&mut self, node: NodeId, predecessors: &[NodeId]) -> Result<()> {
        if !self.contains(node) {
            return Err(OpGraphError::UnknownNode {
                graph: self.id,
                node,
            });
        }
        let predecessors = self.checked_predecessors(predecessors)?;

        for pred in &predecessors {
            if self.reaches(node, *pred) {
                return Err(OpGraphError::CycleRejected {
                    graph: self.id,
                    from: *pred,
                    to: node,
                });
            }
        }

        let existing = &self.nodes[node.index() as usize].predecessors;
        let new: Vec<NodeId> = predecessors
            .into_iter()
            .filter(|pred| !existing.contains(pred))
            .collect();
        if new.is_empty() {
            return Ok(());
        }

        for pred in &new {
            self.successors[pred.index() as usize].push(node);
        }
        self.edge_count += new.len();

        let slot = &mut self.nodes[node.index() as usize].predecessors;
        slot.extend(new);
        slot.sort_unstable();

        debug!(graph_id = %self.id, node_id = %node, "Added dependencies");
        Ok(())
    }

    fn checked_predecessors(&self, predecessors: &[NodeId]) -> Result<Vec<NodeId>> {
        if let Some(unknown) = predecessors.iter().find(|p| !self.contains(**p)) {
            return Err(OpGraphError::UnknownPredecessor {
                graph: self.id,
                node: *unknown,
            });
        }
        let mut predecessors = predecessors.to_vec();
        predecessors.sort_unstable();
        predecessors.dedup();
        Ok(predecessors)
    }

    /// Predecessors of `node`.
    pub fn predecessors(&self, node: NodeId) -> Result<&[NodeId]> {
        self.node(node)
            .map(GraphNode::predecessors)
            .ok_or(OpGraphError::UnknownNode {
                graph: self.id,
                node,
            })
    }

    /// Direct successors of `node`, in insertion order.
    pub fn successors(&self, node: NodeId) -> Result<&[NodeId]> {
        if !self.contains(node) {
            return Err(OpGraphError::UnknownNode {
                graph: self.id,
                node,
            });
        }
        Ok(&self.successors[node.index() as usize])
    }

    /// Nodes no other node depends on, in ascending order.
    pub fn frontier(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| self.successors[n.id.index() as usize].is_empty())
            .map(|n| n.id)
            .collect()
    }

    /// Nodes with no predecessors, in ascending order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.predecessors.is_empty())
            .map(|n| n.id)
            .collect()
    }

    /// Whether `to` is `from` or a transitive successor of it.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        if !self.contains(from) || !self.contains(to) {
            return false;
        }
        if from == to {
            return true;
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        visited[from.index() as usize] = true;

        while let Some(current) = stack.pop() {
            for next in &self.successors[current.index() as usize] {
                if *next == to {
                    return true;
                }
                let slot = &mut visited[next.index() as usize];
                if !*slot {
                    *slot = true;
                    stack.push(*next);
                }
            }
        }
        false
    }

    /// Order nodes so every node follows all of its predecessors.
    ///
    /// Uses Kahn's algorithm; among ready nodes the lowest index goes first,
    /// so the order is deterministic. Fails with
    /// [`OpGraphError::InvalidGraph`] if the edge set contains a cycle.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.predecessors.len()).collect();

        let mut queue: VecDeque<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.predecessors.is_empty())
            .map(|n| n.id)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(node_id) = queue.pop_front() {
            sorted.push(node_id);

            for succ in &self.successors[node_id.index() as usize] {
                let degree = &mut in_degree[succ.index() as usize];
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*succ);
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let cyclic: Vec<String> = self
                .nodes
                .iter()
                .filter(|n| in_degree[n.id.index() as usize] > 0)
                .map(|n| n.id.to_string())
                .collect();

            return Err(OpGraphError::InvalidGraph {
                graph: self.id,
                cause: format!("cycle among {}", cyclic.join(", ")),
            });
        }

        Ok(sorted)
    }

    /// Render the graph in Graphviz DOT format.
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph {} {{", self.id);
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "    {} [label=\"{}: {}\"];",
                node.id.index(),
                node.id.index(),
                node.kind.label().replace('"', "\\\"")
            );
        }
        for node in &self.nodes {
            for pred in &node.predecessors {
                let _ = writeln!(out, "    {} -> {};", pred.index(), node.id.index());
            }
        }
        out.push_str("}\n");
        out
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(len: usize) -> (Graph, Vec<NodeId>) {
        let mut graph = Graph::new();
        let mut ids = Vec::new();
        for i in 0..len {
            let preds: Vec<NodeId> = if i == 0 { vec![] } else { vec![ids[i - 1]] };
            ids.push(graph.add_empty(&preds).unwrap());
        }
        (graph, ids)
    }

    #[test]
    fn chain_frontier_is_tail() {
        let (graph, ids) = chain(4);
        assert_eq!(graph.frontier(), vec![ids[3]]);
        assert_eq!(graph.roots(), vec![ids[0]]);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn diamond_topological_sort() {
        let mut graph = Graph::new();
        let a = graph.add_empty(&[]).unwrap();
        let b = graph.add_empty(&[a]).unwrap();
        let c = graph.add_empty(&[a]).unwrap();
        let d = graph.add_empty(&[b, c]).unwrap();

        assert_eq!(graph.topological_sort().unwrap(), vec![a, b, c, d]);
        assert_eq!(graph.frontier(), vec![d]);
        assert!(graph.reaches(a, d));
        assert!(!graph.reaches(b, c));
    }

    #[test]
    fn duplicate_predecessors_collapse() {
        let mut graph = Graph::new();
        let a = graph.add_empty(&[]).unwrap();
        let b = graph.add_empty(&[a, a, a]).unwrap();
        assert_eq!(graph.predecessors(b).unwrap(), &[a]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn foreign_predecessor_rejected() {
        let (other, other_ids) = chain(2);
        let mut graph = Graph::new();
        graph.add_empty(&[]).unwrap();

        let err = graph.add_empty(&[other_ids[1]]).unwrap_err();
        assert_eq!(
            err,
            OpGraphError::UnknownPredecessor {
                graph: graph.id(),
                node: other_ids[1],
            }
        );
        assert_eq!(graph.node_count(), 1);
        drop(other);
    }

    #[test]
    fn dependency_cycle_rejected() {
        let (mut graph, ids) = chain(3);
        let err = graph.add_dependencies(ids[0], &[ids[2]]).unwrap_err();
        assert!(matches!(err, OpGraphError::CycleRejected { .. }));
        assert_eq!(graph.edge_count(), 2);

        let err = graph.add_dependencies(ids[1], &[ids[1]]).unwrap_err();
        assert!(matches!(err, OpGraphError::CycleRejected { .. }));
    }

    #[test]
    fn add_dependencies_joins_branches() {
        let mut graph = Graph::new();
        let a = graph.add_empty(&[]).unwrap();
        let b = graph.add_empty(&[]).unwrap();
        graph.add_dependencies(b, &[a]).unwrap();
        graph.add_dependencies(b, &[a]).unwrap();

        assert_eq!(graph.predecessors(b).unwrap(), &[a]);
        assert_eq!(graph.successors(a).unwrap(), &[b]);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.frontier(), vec![b]);
    }

    #[test]
    fn unknown_node_in_add_dependencies() {
        let (mut graph, _) = chain(1);
        let stray = NodeId::new(graph.id(), 10);
        assert!(matches!(
            graph.add_dependencies(stray, &[]),
            Err(OpGraphError::UnknownNode { .. })
        ));
    }

    #[test]
    fn dot_output() {
        let (graph, _) = chain(2);
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph graph_"));
        assert!(dot.contains("0 -> 1;"));
        assert!(dot.contains("1 [label=\"1: empty\"];"));
    }
}
