//! Host callback dispatch.
//!
//! Each queue owns one dedicated OS thread for host callbacks, so host code
//! never runs on the queue's worker task or on a runtime thread. Callbacks
//! run one at a time in dispatch order.

use crate::graph::HostCallback;
use opgraph_core::error::{OpGraphError, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

struct HostJob {
    callback: HostCallback,
    done: oneshot::Sender<std::result::Result<(), String>>,
}

/// Handle to a queue's host callback thread.
///
/// The thread exits once every handle has been dropped.
#[derive(Clone)]
pub(crate) struct HostDispatcher {
    sender: mpsc::UnboundedSender<HostJob>,
}

impl HostDispatcher {
    /// Start the callback thread.
    pub(crate) fn spawn(thread_name: &str) -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<HostJob>();

        std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                debug!("Host callback thread started");
                while let Some(job) = receiver.blocking_recv() {
                    let name = job.callback.name().to_string();
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.callback.invoke()))
                        .unwrap_or_else(|payload| {
                            warn!(callback = %name, "Host callback panicked");
                            Err(format!("panicked: {}", panic_message(payload.as_ref())))
                        });
                    let _ = job.done.send(outcome);
                }
                debug!("Host callback thread stopped");
            })
            .map_err(|e| OpGraphError::InvalidValue {
                operation: "create queue".to_string(),
                cause: format!("cannot spawn host callback thread: {}", e),
            })?;

        Ok(Self { sender })
    }

    /// Run `callback` on the callback thread and wait for it to return.
    pub(crate) async fn dispatch(&self, callback: HostCallback) -> std::result::Result<(), String> {
        let name = callback.name().to_string();
        let (done, outcome) = oneshot::channel();
        self.sender
            .send(HostJob { callback, done })
            .map_err(|_| "host callback thread has stopped".to_string())?;

        match outcome.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(cause)) => Err(format!("host callback {} failed: {}", name, cause)),
            Err(_) => Err("host callback thread has stopped".to_string()),
        }
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_on_named_thread() {
        let dispatcher = HostDispatcher::spawn("test-host").unwrap();
        let name = Arc::new(parking_lot::Mutex::new(None));
        let seen = Arc::clone(&name);

        dispatcher
            .dispatch(HostCallback::new("record", move || {
                *seen.lock() = std::thread::current().name().map(str::to_string);
            }))
            .await
            .unwrap();

        assert_eq!(name.lock().as_deref(), Some("test-host"));
    }

    #[tokio::test]
    async fn failure_and_panic_are_reported() {
        let dispatcher = HostDispatcher::spawn("test-host").unwrap();

        let err = dispatcher
            .dispatch(HostCallback::fallible("fails", || Err("bad input".to_string())))
            .await
            .unwrap_err();
        assert!(err.contains("fails"));
        assert!(err.contains("bad input"));

        let err = dispatcher
            .dispatch(HostCallback::new("panics", || panic!("boom")))
            .await
            .unwrap_err();
        assert!(err.contains("boom"));

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        dispatcher
            .dispatch(HostCallback::new("after", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
