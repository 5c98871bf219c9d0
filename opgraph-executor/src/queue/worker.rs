//! The per-queue worker task.

use super::event::RecordSlot;
use super::host::HostDispatcher;
use crate::compiler::{CompiledWork, ExecutableGraph};
use crate::config::ExecutorConfig;
use crate::executor;
use crate::graph::HostCallback;
use opgraph_core::device::{BoundOperation, Device};
use opgraph_core::error::OpGraphError;
use opgraph_core::logging::{LogCategory, LogContext, LogEvent};
use opgraph_core::types::{LaunchId, QueueId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// A unit of work in a queue's submission stream.
pub(crate) enum Submission {
    /// A bound device operation.
    Operation(BoundOperation),
    /// A host callback.
    Host(HostCallback),
    /// A launch of an executable graph.
    Launch {
        exec: ExecutableGraph,
        launch_id: LaunchId,
    },
    /// Complete an event record.
    RecordEvent(Arc<RecordSlot>),
    /// Hold the queue until another queue's record completes.
    WaitEvent(Arc<RecordSlot>),
    /// Report that everything submitted before it has completed.
    Fence(oneshot::Sender<()>),
}

impl Submission {
    /// Whether the submission counts toward the queue's pending work.
    pub(crate) fn is_work(&self) -> bool {
        !matches!(self, Self::Fence(_))
    }
}

/// State shared between a queue's handles and its worker.
pub(crate) struct QueueShared {
    pub(crate) id: QueueId,
    pub(crate) device: Arc<dyn Device>,
    pub(crate) config: ExecutorConfig,
    pub(crate) log: LogContext,
    pub(crate) host: HostDispatcher,
    /// Failures not yet reported by `synchronize`.
    pub(crate) errors: Mutex<Vec<OpGraphError>>,
    /// Submitted work that has not completed.
    pub(crate) pending: AtomicU64,
}

impl QueueShared {
    /// Record a failure for the next `synchronize`.
    pub(crate) fn fail(&self, err: OpGraphError) {
        error!(queue_id = %self.id, code = err.code(), error = %err, "Queue work failed");
        self.log.log(
            LogEvent::error(LogCategory::Queue, "Queue work failed")
                .with_field("code", err.code())
                .with_field("error", err.to_string()),
        );
        self.errors.lock().push(err);
    }

    /// Take the failures recorded since the last call.
    pub(crate) fn take_errors(&self) -> Vec<OpGraphError> {
        std::mem::take(&mut *self.errors.lock())
    }

    fn execution_error(&self, cause: String) -> OpGraphError {
        OpGraphError::ExecutionError {
            queue: self.id,
            node: None,
            launch: None,
            cause,
        }
    }
}

/// Run submissions in FIFO order until every sender is dropped.
///
/// A failure is recorded and the worker moves on to the next submission.
pub(crate) async fn run(shared: Arc<QueueShared>, mut receiver: mpsc::UnboundedReceiver<Submission>) {
    debug!(queue_id = %shared.id, "Queue worker started");

    while let Some(submission) = receiver.recv().await {
        let counted = submission.is_work();

        match submission {
            Submission::Operation(op) => {
                let name = op.name();
                let work = CompiledWork::Device(op);
                if let Err(cause) =
                    executor::execute_work(work, Arc::clone(&shared.device), shared.host.clone()).await
                {
                    shared.fail(shared.execution_error(format!("{}: {}", name, cause)));
                }
            }
            Submission::Host(callback) => {
                if let Err(cause) = shared.host.dispatch(callback).await {
                    shared.fail(shared.execution_error(cause));
                }
            }
            Submission::Launch { exec, launch_id } => {
                if let Err(err) = executor::run_launch(&shared, &exec, launch_id).await {
                    shared.fail(err);
                }
            }
            Submission::RecordEvent(slot) => slot.complete(),
            Submission::WaitEvent(slot) => slot.wait().await,
            Submission::Fence(done) => {
                let _ = done.send(());
            }
        }

        if counted {
            shared.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    debug!(queue_id = %shared.id, "Queue worker stopped");
}
