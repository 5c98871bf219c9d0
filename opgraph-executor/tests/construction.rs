//! Construction-time errors and their isolation.

mod common;

use common::{counting_callback, test_device, test_log_collector, test_queue};
use opgraph_core::device::{DataOperation, MemoryKind};
use opgraph_core::types::NodeId;
use opgraph_core::{Device, OpGraphError};
use opgraph_executor::compiler::GraphCompiler;
use opgraph_executor::graph::Graph;

#[tokio::test]
async fn unknown_predecessor_leaves_graph_compilable() {
    let device = test_device();
    let buffer = device.allocate(64, MemoryKind::Device).unwrap();

    let mut graph = Graph::new();
    let fill = graph
        .add_node(DataOperation::fill(buffer.id(), 64, 1), &[])
        .unwrap();

    let foreign = NodeId::new(Graph::new().id(), 0);
    let missing = NodeId::new(graph.id(), 99);
    for bad in [foreign, missing] {
        let (callback, _) = counting_callback("orphan");
        let err = graph.add_host_callback(callback, &[fill, bad]).unwrap_err();
        assert_eq!(
            err,
            OpGraphError::UnknownPredecessor {
                graph: graph.id(),
                node: bad
            }
        );
        assert!(err.is_construction_error());
    }

    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.edge_count(), 0);
    let exec = GraphCompiler::new(device.clone()).compile(&graph).unwrap();
    assert_eq!(exec.node_count(), 1);
}

#[test]
fn cycle_is_rejected_and_graph_unchanged() {
    let mut graph = Graph::new();
    let a = graph.add_empty(&[]).unwrap();
    let b = graph.add_empty(&[a]).unwrap();
    let c = graph.add_empty(&[b]).unwrap();
    let d = graph.add_empty(&[]).unwrap();

    let nodes = graph.node_count();
    let edges = graph.edge_count();

    let err = graph.add_dependencies(a, &[d, c]).unwrap_err();
    assert!(matches!(
        err,
        OpGraphError::CycleRejected { from, to, .. } if from == c && to == a
    ));
    assert_eq!(err.code(), "E203");
    assert_eq!(graph.node_count(), nodes);
    assert_eq!(graph.edge_count(), edges);
    assert!(graph.predecessors(a).unwrap().is_empty());

    let err = graph.add_dependencies(b, &[b]).unwrap_err();
    assert!(matches!(err, OpGraphError::CycleRejected { .. }));

    graph.add_dependencies(a, &[d]).unwrap();
    assert_eq!(graph.edge_count(), edges + 1);
    assert_eq!(graph.roots(), vec![d]);
    assert!(graph.topological_sort().is_ok());
}

#[test]
fn unknown_node_in_add_dependencies() {
    let mut graph = Graph::new();
    let a = graph.add_empty(&[]).unwrap();
    let ghost = NodeId::new(graph.id(), 7);

    let err = graph.add_dependencies(ghost, &[a]).unwrap_err();
    assert_eq!(
        err,
        OpGraphError::UnknownNode {
            graph: graph.id(),
            node: ghost
        }
    );
}

#[tokio::test]
async fn second_begin_capture_keeps_first_session() {
    let device = test_device();
    let collector = test_log_collector();
    let queue = test_queue(&device, &collector);
    let buffer = device.allocate(64, MemoryKind::Device).unwrap();

    let session = queue.begin_capture().unwrap();
    queue.fill(buffer.id(), 64, 1).unwrap();
    queue.fill(buffer.id(), 64, 2).unwrap();

    let err = queue.begin_capture().unwrap_err();
    assert_eq!(err, OpGraphError::AlreadyCapturing { queue: queue.id() });
    assert!(err.is_capture_error());

    assert!(session.is_valid());
    queue.fill(buffer.id(), 64, 3).unwrap();
    let graph = session.end().unwrap();
    assert_eq!(graph.node_count(), 3);
}

#[tokio::test]
async fn synchronize_during_capture_aborts() {
    let device = test_device();
    let collector = test_log_collector();
    let queue = test_queue(&device, &collector);
    let buffer = device.allocate(64, MemoryKind::Device).unwrap();

    let session = queue.begin_capture().unwrap();
    queue.fill(buffer.id(), 64, 1).unwrap();

    let err = queue.synchronize().await.unwrap_err();
    assert!(matches!(err, OpGraphError::CaptureAborted { queue: q, .. } if q == queue.id()));

    let err = session.end().unwrap_err();
    assert!(matches!(err, OpGraphError::CaptureAborted { .. }));
    assert!(!queue.is_capturing());
    queue.synchronize().await.unwrap();
}

#[tokio::test]
async fn launch_during_capture_aborts() {
    let device = test_device();
    let collector = test_log_collector();
    let queue = test_queue(&device, &collector);

    let mut graph = Graph::new();
    graph.add_empty(&[]).unwrap();
    let exec = GraphCompiler::new(device.clone()).compile(&graph).unwrap();

    let session = queue.begin_capture().unwrap();
    let err = queue.launch(&exec).unwrap_err();
    assert_eq!(err.code(), "E102");
    assert_eq!(exec.launch_count(), 0);
    assert!(session.end().is_err());

    queue.launch(&exec).unwrap();
    queue.synchronize().await.unwrap();
    assert_eq!(exec.launch_count(), 1);
}

#[test]
fn rejected_dependency_keeps_graph_compilable() {
    let device = test_device();
    let mut graph = Graph::new();
    let a = graph.add_empty(&[]).unwrap();
    graph.add_empty(&[a]).unwrap();

    // A rejected dependency never reaches the compiler.
    let before = graph.edge_count();
    let b = graph.frontier()[0];
    assert!(graph.add_dependencies(a, &[b]).is_err());
    assert_eq!(graph.edge_count(), before);

    let exec = GraphCompiler::new(device).compile(&graph).unwrap();
    assert_eq!(exec.node_ids(), vec![a, b]);
}
