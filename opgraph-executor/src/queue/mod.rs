//! Execution queues.
//!
//! A [`Queue`] is an ordered stream of work on one device. Work submitted to
//! a queue runs in submission order on the queue's worker task; `submit`
//! returns as soon as the work is enqueued and failures surface at the next
//! [`Queue::synchronize`]. While the queue is capturing, the same calls
//! append nodes to the capture's graph instead of running anything.

mod event;
pub(crate) mod host;
pub(crate) mod worker;

pub use event::{Event, EventFlags};

use crate::capture::{CaptureRecorder, CaptureSession};
use crate::compiler::ExecutableGraph;
use crate::config::ExecutorConfig;
use crate::graph::{HostCallback, NodeKind};
use event::{CaptureMark, EventRecord, RecordSlot};
use host::HostDispatcher;
use opgraph_core::device::{DataOperation, Device, Kernel, KernelLaunch, LaunchDims, Operation};
use opgraph_core::error::{OpGraphError, Result};
use opgraph_core::logging::{LogCategory, LogCollector, LogContext, LogEvent, NullCollector};
use opgraph_core::types::{BufferId, LaunchId, QueueId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};
use worker::{QueueShared, Submission};

struct QueueInner {
    shared: Arc<QueueShared>,
    sender: mpsc::UnboundedSender<Submission>,
    capture: Mutex<Option<Arc<CaptureRecorder>>>,
}

/// An ordered stream of work on a device.
///
/// Cloning yields another handle to the same queue. The worker stops once
/// every handle has been dropped and the remaining work has run.
///
/// # Example
///
/// ```
/// use opgraph_core::{Device, MemoryDevice, MemoryKind};
/// use opgraph_executor::queue::Queue;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> opgraph_core::Result<()> {
/// let device = Arc::new(MemoryDevice::default());
/// let buffer = device.allocate(16, MemoryKind::Device)?;
///
/// let queue = Queue::new(device.clone())?;
/// queue.fill(buffer.id(), 16, 0xAB)?;
/// queue.synchronize().await?;
///
/// assert_eq!(buffer.to_vec()?, vec![0xAB; 16]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Create a queue with default configuration.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(device: Arc<dyn Device>) -> Result<Self> {
        Self::with_options(device, ExecutorConfig::default(), Arc::new(NullCollector))
    }

    /// Create a queue with explicit configuration and log collector.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_options(
        device: Arc<dyn Device>,
        config: ExecutorConfig,
        collector: Arc<dyn LogCollector>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| OpGraphError::InvalidValue {
            operation: "create queue".to_string(),
            cause: format!("no Tokio runtime: {}", e),
        })?;

        let id = QueueId::next();
        let host = HostDispatcher::spawn(&config.host_thread_name)?;
        let shared = Arc::new(QueueShared {
            id,
            device,
            config,
            log: LogContext::new(collector).with_queue_id(id),
            host,
            errors: Mutex::new(Vec::new()),
            pending: AtomicU64::new(0),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        runtime.spawn(worker::run(Arc::clone(&shared), receiver));

        shared.log.debug(LogCategory::Queue, "Queue created");
        debug!(queue_id = %id, "Created queue");

        Ok(Self {
            inner: Arc::new(QueueInner {
                shared,
                sender,
                capture: Mutex::new(None),
            }),
        })
    }

    /// The queue's identifier.
    pub fn id(&self) -> QueueId {
        self.inner.shared.id
    }

    /// The device this queue runs on.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.inner.shared.device
    }

    /// The queue's configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.shared.config
    }

    /// Whether the queue is part of an active capture.
    pub fn is_capturing(&self) -> bool {
        self.inner.capture.lock().is_some()
    }

    /// Whether all submitted work has completed.
    pub fn query(&self) -> bool {
        self.inner.shared.pending.load(Ordering::Acquire) == 0
    }

    /// Submit a device operation.
    ///
    /// Outside a capture the operation is validated against the device now:
    /// out-of-range regions fail with [`OpGraphError::InvalidValue`] and
    /// freed buffers with [`OpGraphError::ResourceStale`].
    pub fn submit(&self, op: impl Into<Operation>) -> Result<()> {
        let op = op.into();
        let capture = self.inner.capture.lock();
        if let Some(recorder) = capture.as_ref() {
            recorder.record(self.id(), NodeKind::from(op))?;
            return Ok(());
        }

        let bound = op.bind(self.device().as_ref())?;
        self.enqueue(Submission::Operation(bound))
    }

    /// Set `len` bytes of `dst` to `value`.
    pub fn fill(&self, dst: BufferId, len: u64, value: u8) -> Result<()> {
        self.submit(DataOperation::fill(dst, len, value))
    }

    /// Copy `len` bytes from the start of `src` to the start of `dst`.
    pub fn copy(&self, src: BufferId, dst: BufferId, len: u64) -> Result<()> {
        self.submit(DataOperation::copy(src, dst, len))
    }

    /// Write host bytes to the start of `dst`.
    pub fn upload(&self, dst: BufferId, bytes: impl Into<Arc<[u8]>>) -> Result<()> {
        self.submit(DataOperation::upload(dst, bytes))
    }

    /// Launch `kernel` over `dims` with `args` bound as its buffer arguments.
    pub fn launch_kernel(
        &self,
        kernel: Arc<dyn Kernel>,
        dims: LaunchDims,
        args: Vec<BufferId>,
    ) -> Result<()> {
        self.submit(KernelLaunch::new(kernel, dims, args))
    }

    /// Run `callback` on the queue's host thread once all earlier work has
    /// completed. Later work waits for the callback to return.
    pub fn enqueue_host_fn(&self, callback: HostCallback) -> Result<()> {
        let capture = self.inner.capture.lock();
        if let Some(recorder) = capture.as_ref() {
            recorder.record(self.id(), NodeKind::HostCallback(callback))?;
            return Ok(());
        }
        self.enqueue(Submission::Host(callback))
    }

    /// Mark the current end of the queue with `event`.
    ///
    /// Inside a capture the event stands for the nodes at the queue's
    /// current tail instead.
    pub fn record_event(&self, event: &Event) -> Result<()> {
        let capture = self.inner.capture.lock();
        if let Some(recorder) = capture.as_ref() {
            let nodes = recorder.tail(self.id())?;
            event.set_record(EventRecord::Captured(CaptureMark {
                recorder: Arc::downgrade(recorder),
                nodes,
            }));
            return Ok(());
        }

        let slot = RecordSlot::new();
        self.enqueue(Submission::RecordEvent(Arc::clone(&slot)))?;
        event.set_record(EventRecord::Recorded(slot));
        Ok(())
    }

    /// Order all later work on this queue after the most recent record of
    /// `event`.
    ///
    /// Inside a capture, waiting on an event recorded in the same capture
    /// makes the next captured node depend on the event's nodes. Waiting on
    /// an event that belongs to executing work, or to a different capture,
    /// cannot be expressed in the graph and aborts the capture with
    /// [`OpGraphError::CaptureAborted`]. Waiting on a never-recorded event
    /// does nothing.
    pub fn wait_event(&self, event: &Event) -> Result<()> {
        let record = event.snapshot();
        let capture = self.inner.capture.lock();

        if let Some(recorder) = capture.as_ref() {
            return match record {
                EventRecord::Never => Ok(()),
                EventRecord::Captured(mark)
                    if mark
                        .recorder
                        .upgrade()
                        .is_some_and(|r| Arc::ptr_eq(&r, recorder)) =>
                {
                    recorder.fold(self.id(), &mark.nodes)
                }
                EventRecord::Captured(_) => Err(recorder.invalidate(format!(
                    "{} waited on {} from another capture",
                    self.id(),
                    event.id()
                ))),
                EventRecord::Recorded(_) => Err(recorder.invalidate(format!(
                    "{} waited on {} recorded outside the capture",
                    self.id(),
                    event.id()
                ))),
            };
        }

        match record {
            EventRecord::Never => Ok(()),
            EventRecord::Recorded(slot) => self.enqueue(Submission::WaitEvent(slot)),
            EventRecord::Captured(mark) => match mark.recorder.upgrade() {
                Some(recorder) if recorder.is_active() => Err(recorder.invalidate(format!(
                    "{} waited on {} while its capture was in progress",
                    self.id(),
                    event.id()
                ))),
                _ => Ok(()),
            },
        }
    }

    /// Start capturing this queue's submissions into a new graph.
    ///
    /// Fails with [`OpGraphError::AlreadyCapturing`] when the queue is
    /// already part of a capture; that capture is left intact.
    pub fn begin_capture(&self) -> Result<CaptureSession> {
        CaptureSession::begin(self)
    }

    /// Submit a launch of `exec`.
    ///
    /// The launch runs after all earlier work on this queue. Fails with
    /// [`OpGraphError::InvalidValue`] if `exec` was destroyed and with
    /// [`OpGraphError::ResourceStale`] if a buffer it was compiled against
    /// has since been freed. Launching from a capturing queue aborts the
    /// capture.
    #[instrument(skip(self, exec), fields(queue_id = %self.id(), exec_id = %exec.id()))]
    pub fn launch(&self, exec: &ExecutableGraph) -> Result<LaunchId> {
        let capture = self.inner.capture.lock();
        if let Some(recorder) = capture.as_ref() {
            return Err(recorder.invalidate(format!(
                "{} launched {} during capture",
                self.id(),
                exec.id()
            )));
        }

        if exec.is_destroyed() {
            return Err(OpGraphError::InvalidValue {
                operation: "launch".to_string(),
                cause: format!("{} has been destroyed", exec.id()),
            });
        }
        if let Some(buffer) = exec.stale_buffer() {
            return Err(OpGraphError::ResourceStale { buffer });
        }

        let launch_id = LaunchId::new();
        let count = exec.record_launch();
        self.inner.shared.log.log(
            LogEvent::info(LogCategory::Launch, "Launch submitted")
                .with_launch_id(launch_id)
                .with_field("exec_id", exec.id().to_string())
                .with_field_i64("launch_count", count as i64),
        );
        debug!(launch_id = %launch_id, launch_count = count, "Submitting launch");

        self.enqueue(Submission::Launch {
            exec: exec.clone(),
            launch_id,
        })?;
        Ok(launch_id)
    }

    /// Wait for all submitted work to complete.
    ///
    /// Returns the first failure recorded since the previous call; later
    /// failures from the same period are logged and discarded. Calling this
    /// on a capturing queue aborts the capture.
    pub async fn synchronize(&self) -> Result<()> {
        {
            let capture = self.inner.capture.lock();
            if let Some(recorder) = capture.as_ref() {
                return Err(recorder.invalidate(format!(
                    "{} was synchronized during capture",
                    self.id()
                )));
            }
        }

        let (done, fence) = oneshot::channel();
        self.enqueue(Submission::Fence(done))?;
        fence.await.map_err(|_| OpGraphError::QueueClosed { queue: self.id() })?;

        let mut errors = self.inner.shared.take_errors().into_iter();
        match errors.next() {
            Some(first) => {
                let dropped = errors.count();
                if dropped > 0 {
                    info!(queue_id = %self.id(), dropped, "Discarded additional queue failures");
                }
                Err(first)
            }
            None => Ok(()),
        }
    }

    /// Attach this queue to `recorder`.
    pub(crate) fn attach_capture(&self, recorder: &Arc<CaptureRecorder>) -> Result<()> {
        let mut capture = self.inner.capture.lock();
        if capture.is_some() {
            return Err(OpGraphError::AlreadyCapturing { queue: self.id() });
        }
        *capture = Some(Arc::clone(recorder));
        Ok(())
    }

    /// Detach this queue from `recorder`, if it is still attached to it.
    pub(crate) fn detach_capture(&self, recorder: &Arc<CaptureRecorder>) {
        let mut capture = self.inner.capture.lock();
        if capture.as_ref().is_some_and(|r| Arc::ptr_eq(r, recorder)) {
            *capture = None;
        }
    }

    pub(crate) fn log(&self) -> &LogContext {
        &self.inner.shared.log
    }

    fn enqueue(&self, submission: Submission) -> Result<()> {
        let counted = submission.is_work();
        if counted {
            self.inner.shared.pending.fetch_add(1, Ordering::AcqRel);
        }
        self.inner.sender.send(submission).map_err(|_| {
            if counted {
                self.inner.shared.pending.fetch_sub(1, Ordering::AcqRel);
            }
            OpGraphError::QueueClosed { queue: self.id() }
        })
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id())
            .field("device", &self.device().properties().name)
            .field("capturing", &self.is_capturing())
            .field("pending", &self.inner.shared.pending.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opgraph_core::device::{MemoryDevice, MemoryKind};

    fn device() -> Arc<MemoryDevice> {
        Arc::new(MemoryDevice::default())
    }

    #[tokio::test]
    async fn work_runs_in_order() {
        let device = device();
        let a = device.allocate(8, MemoryKind::Device).unwrap();
        let b = device.allocate(8, MemoryKind::Device).unwrap();
        let queue = Queue::new(device.clone()).unwrap();

        queue.fill(a.id(), 8, 7).unwrap();
        queue.copy(a.id(), b.id(), 8).unwrap();
        queue.fill(a.id(), 8, 0).unwrap();
        queue.synchronize().await.unwrap();

        assert_eq!(b.to_vec().unwrap(), vec![7; 8]);
        assert_eq!(a.to_vec().unwrap(), vec![0; 8]);
        assert!(queue.query());
    }

    #[tokio::test]
    async fn invalid_region_fails_at_submit() {
        let device = device();
        let a = device.allocate(8, MemoryKind::Device).unwrap();
        let queue = Queue::new(device.clone()).unwrap();

        let err = queue.fill(a.id(), 64, 1).unwrap_err();
        assert!(matches!(err, OpGraphError::InvalidValue { .. }));

        device.free(a.id()).unwrap();
        let err = queue.fill(a.id(), 8, 1).unwrap_err();
        assert!(matches!(err, OpGraphError::ResourceStale { .. }));
    }

    #[tokio::test]
    async fn host_failure_surfaces_at_synchronize() {
        let queue = Queue::new(device()).unwrap();
        queue
            .enqueue_host_fn(HostCallback::fallible("broken", || Err("nope".to_string())))
            .unwrap();

        let err = queue.synchronize().await.unwrap_err();
        assert_eq!(err.code(), "E401");
        assert!(err.to_string().contains("nope"));

        // The failure is reported once and the queue keeps working.
        queue.synchronize().await.unwrap();
    }

    #[tokio::test]
    async fn wait_on_unrecorded_event_is_noop() {
        let queue = Queue::new(device()).unwrap();
        queue.wait_event(&Event::new()).unwrap();
        queue.synchronize().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = ExecutorConfig {
            max_concurrent_nodes: 0,
            ..ExecutorConfig::default()
        };
        let err = Queue::with_options(device(), config, Arc::new(NullCollector)).unwrap_err();
        assert_eq!(err.code(), "E801");
    }
}
