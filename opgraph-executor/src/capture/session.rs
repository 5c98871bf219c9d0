//! Capture sessions.

use super::CaptureRecorder;
use crate::graph::Graph;
use crate::queue::Queue;
use opgraph_core::error::Result;
use opgraph_core::logging::{LogCategory, LogEvent};
use opgraph_core::types::QueueId;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// An in-progress capture.
///
/// Created by [`Queue::begin_capture`]. While the session is alive, work
/// submitted to any member queue is recorded into a graph instead of
/// executing. [`end`](Self::end) hands back the graph; dropping the session
/// without ending it discards the graph and releases every member queue.
#[must_use = "a capture records nothing useful unless ended"]
pub struct CaptureSession {
    recorder: Arc<CaptureRecorder>,
    origin: Queue,
    members: Vec<Queue>,
    ended: bool,
}

impl CaptureSession {
    pub(crate) fn begin(queue: &Queue) -> Result<Self> {
        let recorder = Arc::new(CaptureRecorder::new(queue.id()));
        queue.attach_capture(&recorder)?;

        queue.log().info(LogCategory::Capture, "Capture started");
        info!(queue_id = %queue.id(), "Capture started");

        Ok(Self {
            recorder,
            origin: queue.clone(),
            members: vec![queue.clone()],
            ended: false,
        })
    }

    /// The queue the capture was started on.
    pub fn queue(&self) -> &Queue {
        &self.origin
    }

    /// IDs of every queue taking part, origin first.
    pub fn members(&self) -> Vec<QueueId> {
        self.members.iter().map(Queue::id).collect()
    }

    /// Add `queue` to the capture.
    ///
    /// The queue's first captured submission depends on whatever the origin
    /// queue captured so far. Its work must be rejoined into the origin
    /// queue through an event before [`end`](Self::end). Joining a queue
    /// that is already a member does nothing; joining a queue that belongs
    /// to another capture fails with
    /// [`OpGraphError::AlreadyCapturing`](opgraph_core::OpGraphError::AlreadyCapturing).
    pub fn join(&mut self, queue: &Queue) -> Result<()> {
        if self.members.iter().any(|m| m.id() == queue.id()) {
            return Ok(());
        }

        queue.attach_capture(&self.recorder)?;
        if let Err(err) = self.recorder.join(queue.id()) {
            queue.detach_capture(&self.recorder);
            return Err(err);
        }

        queue.log().log(
            LogEvent::info(LogCategory::Capture, "Queue joined capture")
                .with_field("origin", self.origin.id().to_string()),
        );
        self.members.push(queue.clone());
        Ok(())
    }

    /// Number of nodes captured so far.
    pub fn node_count(&self) -> usize {
        self.recorder.node_count()
    }

    /// Whether the capture is still valid.
    pub fn is_valid(&self) -> bool {
        self.recorder.is_valid()
    }

    /// End the capture and return the recorded graph.
    ///
    /// Every member queue returns to executing work immediately. Fails with
    /// [`OpGraphError::CaptureAborted`](opgraph_core::OpGraphError::CaptureAborted)
    /// when the capture was invalidated or when a joined queue's work was
    /// never rejoined into the origin queue.
    #[instrument(skip(self), fields(queue_id = %self.origin.id()))]
    pub fn end(mut self) -> Result<Graph> {
        self.ended = true;
        self.detach_all();

        match self.recorder.finish() {
            Ok(graph) => {
                self.origin.log().log(
                    LogEvent::info(LogCategory::Capture, "Capture ended")
                        .with_field("graph_id", graph.id().to_string())
                        .with_field_i64("nodes", graph.node_count() as i64),
                );
                info!(graph_id = %graph.id(), nodes = graph.node_count(), "Capture ended");
                Ok(graph)
            }
            Err(err) => {
                self.origin.log().log(
                    LogEvent::error(LogCategory::Capture, "Capture failed")
                        .with_field("error", err.to_string()),
                );
                warn!(error = %err, "Capture failed");
                Err(err)
            }
        }
    }

    fn detach_all(&self) {
        for queue in &self.members {
            queue.detach_capture(&self.recorder);
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        self.detach_all();
        self.recorder.abandon();
        self.origin.log().warn(LogCategory::Capture, "Capture abandoned");
        warn!(queue_id = %self.origin.id(), "Capture abandoned");
    }
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("origin", &self.origin.id())
            .field("members", &self.members())
            .field("nodes", &self.node_count())
            .field("valid", &self.is_valid())
            .finish()
    }
}
