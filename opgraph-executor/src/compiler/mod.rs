//! Graph compilation.
//!
//! [`GraphCompiler::compile`] validates a [`Graph`] and freezes it into an
//! [`ExecutableGraph`]: node order, dependency indices and buffer bindings
//! are all resolved once, so launches never consult the source graph again.

use crate::graph::{Graph, HostCallback, NodeKind};
use opgraph_core::device::{BoundOperation, Device};
use opgraph_core::error::{OpGraphError, Result};
use opgraph_core::logging::{LogCategory, LogCollector, LogEvent, NullCollector};
use opgraph_core::types::{BufferId, ExecId, GraphId, NodeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, instrument};

/// The bound work of one compiled node.
#[derive(Debug, Clone)]
pub(crate) enum CompiledWork {
    /// A device operation with resolved buffers.
    Device(BoundOperation),
    /// A host callback.
    Host(HostCallback),
    /// No work.
    Empty,
}

/// A node of an executable graph.
#[derive(Debug)]
pub(crate) struct CompiledNode {
    pub(crate) id: NodeId,
    pub(crate) label: String,
    pub(crate) work: CompiledWork,
    /// Number of predecessors.
    pub(crate) in_degree: usize,
    /// Positions of successors in the node list.
    pub(crate) successors: Vec<usize>,
}

struct ExecutableInner {
    id: ExecId,
    source: GraphId,
    nodes: Vec<CompiledNode>,
    launches: AtomicU64,
    destroyed: AtomicBool,
}

/// An immutable, repeatedly launchable snapshot of a graph.
///
/// Cloning is cheap and yields a handle to the same executable. Launches
/// that were already submitted keep the executable alive until they finish,
/// even after [`destroy`](Self::destroy).
#[derive(Clone)]
pub struct ExecutableGraph {
    inner: Arc<ExecutableInner>,
}

impl ExecutableGraph {
    /// The executable's identifier.
    pub fn id(&self) -> ExecId {
        self.inner.id
    }

    /// The graph this executable was compiled from.
    pub fn source_graph(&self) -> GraphId {
        self.inner.source
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Number of launches submitted so far.
    pub fn launch_count(&self) -> u64 {
        self.inner.launches.load(Ordering::Acquire)
    }

    /// Whether [`destroy`](Self::destroy) was called on any handle.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Node IDs in execution order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner.nodes.iter().map(|n| n.id).collect()
    }

    /// Release the executable. Further launches through any handle fail
    /// with [`OpGraphError::InvalidValue`].
    pub fn destroy(self) {
        self.inner.destroyed.store(true, Ordering::Release);
        info!(exec_id = %self.inner.id, "Destroyed executable graph");
    }

    /// The first bound buffer that has been freed since compilation.
    pub fn stale_buffer(&self) -> Option<BufferId> {
        self.inner.nodes.iter().find_map(|node| match &node.work {
            CompiledWork::Device(op) => op.stale_buffer(),
            _ => None,
        })
    }

    pub(crate) fn nodes(&self) -> &[CompiledNode] {
        &self.inner.nodes
    }

    pub(crate) fn record_launch(&self) -> u64 {
        self.inner.launches.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl fmt::Debug for ExecutableGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableGraph")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("nodes", &self.inner.nodes.len())
            .field("launches", &self.launch_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Validates graphs and binds them to a device.
pub struct GraphCompiler {
    device: Arc<dyn Device>,
    collector: Arc<dyn LogCollector>,
}

impl GraphCompiler {
    /// Create a compiler for `device`.
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            collector: Arc::new(NullCollector),
        }
    }

    /// Emit structured log events to `collector`.
    pub fn with_collector(mut self, collector: Arc<dyn LogCollector>) -> Self {
        self.collector = collector;
        self
    }

    /// Compile `graph` into an executable.
    ///
    /// Checks the full edge set for cycles, checks that every referenced
    /// buffer is live and binds each node to the device as it is right now.
    /// Any failure is reported as [`OpGraphError::InvalidGraph`]. The result
    /// does not observe later changes to `graph`.
    #[instrument(skip_all, fields(graph_id = %graph.id(), node_count = graph.node_count()))]
    pub fn compile(&self, graph: &Graph) -> Result<ExecutableGraph> {
        match self.build(graph) {
            Ok(exec) => {
                self.collector.collect(
                    LogEvent::info(LogCategory::Compile, "Graph compiled")
                        .with_field("graph_id", graph.id().to_string())
                        .with_field("exec_id", exec.id().to_string())
                        .with_field_i64("nodes", exec.node_count() as i64),
                );
                info!(exec_id = %exec.id(), "Compiled graph");
                Ok(exec)
            }
            Err(err) => {
                self.collector.collect(
                    LogEvent::error(LogCategory::Compile, "Graph compilation failed")
                        .with_field("graph_id", graph.id().to_string())
                        .with_field("error", err.to_string()),
                );
                tracing::warn!(error = %err, "Graph compilation failed");
                Err(err)
            }
        }
    }

    fn build(&self, graph: &Graph) -> Result<ExecutableGraph> {
        let invalid = |cause: String| OpGraphError::InvalidGraph {
            graph: graph.id(),
            cause,
        };

        let order = graph.topological_sort()?;

        for node in graph.nodes() {
            if let Some(buffer) = node
                .kind()
                .buffers()
                .into_iter()
                .find(|b| !self.device.is_live(*b))
            {
                return Err(invalid(format!(
                    "{} references freed buffer {}",
                    node.id(),
                    buffer
                )));
            }
        }

        let position: HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut nodes = Vec::with_capacity(order.len());
        for id in &order {
            let node = graph
                .node(*id)
                .ok_or_else(|| invalid(format!("{} missing from graph", id)))?;

            let work = match node.kind() {
                NodeKind::Data(_) | NodeKind::Compute(_) => {
                    let op = node
                        .kind()
                        .operation()
                        .ok_or_else(|| invalid(format!("{} has no operation", id)))?;
                    let bound = op
                        .bind(self.device.as_ref())
                        .map_err(|e| invalid(format!("{}: {}", id, e)))?;
                    CompiledWork::Device(bound)
                }
                NodeKind::HostCallback(callback) => CompiledWork::Host(callback.clone()),
                NodeKind::Empty => CompiledWork::Empty,
            };

            let successors = graph
                .successors(*id)?
                .iter()
                .filter_map(|s| position.get(s).copied())
                .collect();

            nodes.push(CompiledNode {
                id: *id,
                label: node.kind().label(),
                work,
                in_degree: node.predecessors().len(),
                successors,
            });
        }

        Ok(ExecutableGraph {
            inner: Arc::new(ExecutableInner {
                id: ExecId::next(),
                source: graph.id(),
                nodes,
                launches: AtomicU64::new(0),
                destroyed: AtomicBool::new(false),
            }),
        })
    }
}

impl fmt::Debug for GraphCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphCompiler")
            .field("device", &self.device.properties().name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opgraph_core::device::{DataOperation, MemoryDevice, MemoryDeviceConfig, MemoryKind};

    fn device() -> Arc<MemoryDevice> {
        Arc::new(MemoryDevice::new(MemoryDeviceConfig::default()))
    }

    #[test]
    fn compile_orders_nodes() {
        let device = device();
        let buffer = device.allocate(64, MemoryKind::Device).unwrap();

        let mut graph = Graph::new();
        let fill = graph
            .add_node(DataOperation::fill(buffer.id(), 64, 1), &[])
            .unwrap();
        let done = graph.add_empty(&[fill]).unwrap();

        let exec = GraphCompiler::new(device).compile(&graph).unwrap();
        assert_eq!(exec.node_count(), 2);
        assert_eq!(exec.node_ids(), vec![fill, done]);
        assert_eq!(exec.source_graph(), graph.id());
        assert_eq!(exec.nodes()[0].successors, vec![1]);
        assert_eq!(exec.nodes()[1].in_degree, 1);
    }

    #[test]
    fn freed_buffer_is_invalid_graph() {
        let device = device();
        let buffer = device.allocate(64, MemoryKind::Device).unwrap();

        let mut graph = Graph::new();
        graph
            .add_node(DataOperation::fill(buffer.id(), 64, 1), &[])
            .unwrap();
        device.free(buffer.id()).unwrap();

        let err = GraphCompiler::new(device).compile(&graph).unwrap_err();
        assert!(matches!(err, OpGraphError::InvalidGraph { .. }));
        assert!(err.to_string().contains("freed buffer"));
    }

    #[test]
    fn bind_failure_is_invalid_graph() {
        let device = device();
        let buffer = device.allocate(8, MemoryKind::Device).unwrap();

        let mut graph = Graph::new();
        graph
            .add_node(DataOperation::fill(buffer.id(), 64, 1), &[])
            .unwrap();

        let err = GraphCompiler::new(device).compile(&graph).unwrap_err();
        assert_eq!(err.code(), "E301");
    }

    #[test]
    fn compile_is_a_snapshot() {
        let device = device();
        let mut graph = Graph::new();
        graph.add_empty(&[]).unwrap();

        let compiler = GraphCompiler::new(device);
        let exec = compiler.compile(&graph).unwrap();
        let frontier = graph.frontier();
        graph.add_empty(&frontier).unwrap();

        assert_eq!(exec.node_count(), 1);
        assert_eq!(compiler.compile(&graph).unwrap().node_count(), 2);
    }

    #[test]
    fn destroy_marks_every_handle() {
        let mut graph = Graph::new();
        graph.add_empty(&[]).unwrap();
        let exec = GraphCompiler::new(device()).compile(&graph).unwrap();
        let other = exec.clone();
        exec.destroy();
        assert!(other.is_destroyed());
    }
}
