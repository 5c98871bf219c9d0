//! Graph node kinds and host callbacks.

use opgraph_core::device::{DataOperation, KernelLaunch, Operation};
use opgraph_core::types::{BufferId, NodeId};
use std::fmt;
use std::sync::Arc;

type CallbackFn = dyn Fn() -> std::result::Result<(), String> + Send + Sync;

/// Host-side work run outside the queue's operation pipeline.
///
/// The callback runs on its queue's dedicated host thread, never on the
/// thread that submitted it. It must not submit work to, or wait on, the
/// queue that is executing it: the queue cannot make progress while the
/// callback is running, so doing so deadlocks.
///
/// # Example
///
/// ```
/// use opgraph_executor::graph::HostCallback;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let counter = Arc::new(AtomicUsize::new(0));
/// let seen = Arc::clone(&counter);
/// let callback = HostCallback::new("count", move || {
///     seen.fetch_add(1, Ordering::SeqCst);
/// });
///
/// callback.invoke().unwrap();
/// assert_eq!(counter.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct HostCallback {
    name: Arc<str>,
    body: Arc<CallbackFn>,
}

impl HostCallback {
    /// Create a callback that always succeeds.
    pub fn new<F>(name: impl Into<Arc<str>>, body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(move || {
                body();
                Ok(())
            }),
        }
    }

    /// Create a callback that can report a failure.
    ///
    /// An `Err` surfaces at `synchronize` as an execution error attributed to
    /// the callback's node.
    pub fn fallible<F>(name: impl Into<Arc<str>>, body: F) -> Self
    where
        F: Fn() -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }

    /// Callback name, used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the callback on the current thread.
    pub fn invoke(&self) -> std::result::Result<(), String> {
        (self.body)()
    }
}

impl fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallback")
            .field("name", &self.name)
            .finish()
    }
}

/// The work a node performs.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A memory operation (fill, copy, upload).
    Data(DataOperation),
    /// A compute kernel launch.
    Compute(KernelLaunch),
    /// Host-side work on the queue's callback thread.
    HostCallback(HostCallback),
    /// No work; orders its predecessors before its successors.
    Empty,
}

impl NodeKind {
    /// Short label for logs and graph rendering.
    pub fn label(&self) -> String {
        match self {
            Self::Data(op) => op.name().to_string(),
            Self::Compute(launch) => format!("kernel {}", launch.kernel.name()),
            Self::HostCallback(callback) => format!("host {}", callback.name()),
            Self::Empty => "empty".to_string(),
        }
    }

    /// The device operation this node runs, if any.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Data(op) => Some(Operation::Data(op.clone())),
            Self::Compute(launch) => Some(Operation::Kernel(launch.clone())),
            Self::HostCallback(_) | Self::Empty => None,
        }
    }

    /// Buffers referenced by this node.
    pub fn buffers(&self) -> Vec<BufferId> {
        match self {
            Self::Data(op) => op.buffers(),
            Self::Compute(launch) => launch.args.clone(),
            Self::HostCallback(_) | Self::Empty => Vec::new(),
        }
    }
}

impl From<Operation> for NodeKind {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Data(op) => Self::Data(op),
            Operation::Kernel(launch) => Self::Compute(launch),
        }
    }
}

impl From<DataOperation> for NodeKind {
    fn from(op: DataOperation) -> Self {
        Self::Data(op)
    }
}

impl From<KernelLaunch> for NodeKind {
    fn from(launch: KernelLaunch) -> Self {
        Self::Compute(launch)
    }
}

impl From<HostCallback> for NodeKind {
    fn from(callback: HostCallback) -> Self {
        Self::HostCallback(callback)
    }
}

/// A node in a graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) predecessors: Vec<NodeId>,
}

impl GraphNode {
    /// The node's identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// What the node does.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Nodes that must complete before this one starts, in ascending order.
    pub fn predecessors(&self) -> &[NodeId] {
        &self.predecessors
    }
}
