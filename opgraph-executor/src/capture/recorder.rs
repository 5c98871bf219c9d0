//! Capture state shared by every queue in a capture.

use crate::graph::{Graph, NodeKind};
use opgraph_core::error::{OpGraphError, Result};
use opgraph_core::types::{NodeId, QueueId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

struct RecorderState {
    graph: Option<Graph>,
    /// Nodes the next capture on each queue depends on.
    tails: HashMap<QueueId, Vec<NodeId>>,
    /// Why the capture was invalidated, if it was.
    aborted: Option<String>,
    closed: bool,
}

/// Records submissions from capturing queues into one graph.
///
/// Each member queue has a tail: the nodes its next captured submission
/// depends on. Recording a node makes it the queue's only tail node, so the
/// submissions of one queue form a chain. Event waits add to the tail.
pub(crate) struct CaptureRecorder {
    origin: QueueId,
    state: Mutex<RecorderState>,
}

impl CaptureRecorder {
    pub(crate) fn new(origin: QueueId) -> Self {
        let mut tails = HashMap::new();
        tails.insert(origin, Vec::new());
        Self {
            origin,
            state: Mutex::new(RecorderState {
                graph: Some(Graph::new()),
                tails,
                aborted: None,
                closed: false,
            }),
        }
    }

    /// Whether the capture has not yet ended or been abandoned.
    pub(crate) fn is_active(&self) -> bool {
        !self.state.lock().closed
    }

    /// Whether the capture is active and has not been invalidated.
    pub(crate) fn is_valid(&self) -> bool {
        let state = self.state.lock();
        !state.closed && state.aborted.is_none()
    }

    pub(crate) fn node_count(&self) -> usize {
        self.state.lock().graph.as_ref().map_or(0, Graph::node_count)
    }

    /// Append a node for work submitted to `queue`.
    pub(crate) fn record(&self, queue: QueueId, kind: NodeKind) -> Result<NodeId> {
        let mut state = self.state.lock();
        self.check(&state)?;

        let predecessors = state.tails.get(&queue).cloned().unwrap_or_default();
        let node = match state.graph.as_mut() {
            Some(graph) => graph.add_node(kind, &predecessors)?,
            None => return Err(self.aborted("capture already ended")),
        };
        state.tails.insert(queue, vec![node]);
        Ok(node)
    }

    /// The current tail of `queue`.
    pub(crate) fn tail(&self, queue: QueueId) -> Result<Vec<NodeId>> {
        let state = self.state.lock();
        self.check(&state)?;
        Ok(state.tails.get(&queue).cloned().unwrap_or_default())
    }

    /// Add `nodes` to the tail of `queue`.
    pub(crate) fn fold(&self, queue: QueueId, nodes: &[NodeId]) -> Result<()> {
        let mut state = self.state.lock();
        self.check(&state)?;

        let tail = state.tails.entry(queue).or_default();
        for node in nodes {
            if !tail.contains(node) {
                tail.push(*node);
            }
        }
        tail.sort_unstable();
        Ok(())
    }

    /// Start tracking `queue`, forking from the origin queue's tail.
    pub(crate) fn join(&self, queue: QueueId) -> Result<()> {
        let mut state = self.state.lock();
        self.check(&state)?;

        let fork = state.tails.get(&self.origin).cloned().unwrap_or_default();
        state.tails.insert(queue, fork);
        Ok(())
    }

    /// Invalidate the capture and return the error describing why.
    ///
    /// The first cause is kept; later calls report the same cause.
    pub(crate) fn invalidate(&self, cause: impl Into<String>) -> OpGraphError {
        let mut state = self.state.lock();
        let cause = state.aborted.get_or_insert_with(|| cause.into()).clone();
        warn!(queue_id = %self.origin, cause = %cause, "Capture invalidated");
        self.aborted(cause)
    }

    /// Close the capture and hand back its graph.
    ///
    /// Fails if the capture was invalidated or if work captured on a joined
    /// queue was never rejoined into the origin queue.
    pub(crate) fn finish(&self) -> Result<Graph> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.aborted("capture already ended"));
        }
        state.closed = true;

        let graph = state.graph.take();
        if let Some(cause) = state.aborted.clone() {
            return Err(self.aborted(cause));
        }
        let graph = graph.ok_or_else(|| self.aborted("capture already ended"))?;

        let origin_tail = state.tails.get(&self.origin).cloned().unwrap_or_default();
        if let Some(node) = graph
            .frontier()
            .into_iter()
            .find(|node| !origin_tail.contains(node))
        {
            let cause = format!(
                "{} was captured on a joined queue but never rejoined into {}",
                node, self.origin
            );
            state.aborted = Some(cause.clone());
            return Err(self.aborted(cause));
        }

        Ok(graph)
    }

    /// Close the capture and discard its graph.
    pub(crate) fn abandon(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.graph = None;
        state
            .aborted
            .get_or_insert_with(|| "capture was abandoned".to_string());
    }

    fn check(&self, state: &RecorderState) -> Result<()> {
        if let Some(cause) = &state.aborted {
            return Err(self.aborted(cause.clone()));
        }
        if state.closed {
            return Err(self.aborted("capture already ended"));
        }
        Ok(())
    }

    fn aborted(&self, cause: impl Into<String>) -> OpGraphError {
        OpGraphError::CaptureAborted {
            queue: self.origin,
            cause: cause.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_queue_chains() {
        let queue = QueueId::new(1);
        let recorder = CaptureRecorder::new(queue);

        let a = recorder.record(queue, NodeKind::Empty).unwrap();
        let b = recorder.record(queue, NodeKind::Empty).unwrap();
        let c = recorder.record(queue, NodeKind::Empty).unwrap();

        let graph = recorder.finish().unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.predecessors(b).unwrap(), &[a]);
        assert_eq!(graph.predecessors(c).unwrap(), &[b]);
        assert!(!recorder.is_active());
    }

    #[test]
    fn fork_and_fold() {
        let origin = QueueId::new(1);
        let side = QueueId::new(2);
        let recorder = CaptureRecorder::new(origin);

        let a = recorder.record(origin, NodeKind::Empty).unwrap();
        recorder.join(side).unwrap();
        let b = recorder.record(side, NodeKind::Empty).unwrap();
        let c = recorder.record(origin, NodeKind::Empty).unwrap();

        let side_tail = recorder.tail(side).unwrap();
        recorder.fold(origin, &side_tail).unwrap();
        let d = recorder.record(origin, NodeKind::Empty).unwrap();

        let graph = recorder.finish().unwrap();
        assert_eq!(graph.predecessors(b).unwrap(), &[a]);
        assert_eq!(graph.predecessors(c).unwrap(), &[a]);
        assert_eq!(graph.predecessors(d).unwrap(), &[b, c]);
    }

    #[test]
    fn unjoined_work_fails_finish() {
        let origin = QueueId::new(1);
        let side = QueueId::new(2);
        let recorder = CaptureRecorder::new(origin);

        recorder.record(origin, NodeKind::Empty).unwrap();
        recorder.join(side).unwrap();
        recorder.record(side, NodeKind::Empty).unwrap();

        let err = recorder.finish().unwrap_err();
        assert!(matches!(err, OpGraphError::CaptureAborted { .. }));
    }

    #[test]
    fn invalidated_capture_rejects_work() {
        let queue = QueueId::new(1);
        let recorder = CaptureRecorder::new(queue);

        let first = recorder.invalidate("first");
        let second = recorder.invalidate("second");
        assert_eq!(first, second);
        assert!(!recorder.is_valid());
        assert!(recorder.is_active());

        assert!(recorder.record(queue, NodeKind::Empty).is_err());
        assert!(recorder.finish().is_err());
    }
}
