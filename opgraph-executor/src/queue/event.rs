//! Synchronization events.

use crate::capture::CaptureRecorder;
use opgraph_core::error::{OpGraphError, Result};
use opgraph_core::types::{EventId, NodeId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Options for an [`Event`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFlags {
    /// Block the waiting thread instead of spinning while synchronizing.
    pub blocking_sync: bool,
    /// Do not record completion times; [`Event::elapsed`] is unavailable.
    pub disable_timing: bool,
}

impl EventFlags {
    /// Set `blocking_sync`.
    pub fn with_blocking_sync(mut self, enabled: bool) -> Self {
        self.blocking_sync = enabled;
        self
    }

    /// Set `disable_timing`.
    pub fn with_disable_timing(mut self, enabled: bool) -> Self {
        self.disable_timing = enabled;
        self
    }
}

/// Completion marker for one `record` of an event.
pub(crate) struct RecordSlot {
    done: watch::Sender<bool>,
    completed_at: Mutex<Option<Instant>>,
}

impl RecordSlot {
    pub(crate) fn new() -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            done,
            completed_at: Mutex::new(None),
        })
    }

    pub(crate) fn complete(&self) {
        *self.completed_at.lock() = Some(Instant::now());
        self.done.send_replace(true);
    }

    pub(crate) fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    pub(crate) async fn wait(&self) {
        let mut receiver = self.done.subscribe();
        let _ = receiver.wait_for(|done| *done).await;
    }

    fn completed_at(&self) -> Option<Instant> {
        *self.completed_at.lock()
    }
}

/// Nodes an event stands for while it is part of a capture.
#[derive(Clone)]
pub(crate) struct CaptureMark {
    pub(crate) recorder: Weak<CaptureRecorder>,
    pub(crate) nodes: Vec<NodeId>,
}

/// The most recent `record` of an event.
#[derive(Clone)]
pub(crate) enum EventRecord {
    /// Never recorded.
    Never,
    /// Recorded on an executing queue.
    Recorded(Arc<RecordSlot>),
    /// Recorded on a capturing queue.
    Captured(CaptureMark),
}

struct EventInner {
    id: EventId,
    flags: EventFlags,
    record: Mutex<EventRecord>,
}

/// A marker in a queue's submission stream.
///
/// Recording an event on a queue marks the point reached by all work
/// submitted so far; the event completes when that work has completed.
/// Waiting on the event from another queue orders that queue's later work
/// after the marked point. Inside a joint capture the same calls add graph
/// edges instead.
///
/// An event that was never recorded counts as complete.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// Create an event with default flags.
    pub fn new() -> Self {
        Self::with_flags(EventFlags::default())
    }

    /// Create an event with the given flags.
    pub fn with_flags(flags: EventFlags) -> Self {
        Self {
            inner: Arc::new(EventInner {
                id: EventId::next(),
                flags,
                record: Mutex::new(EventRecord::Never),
            }),
        }
    }

    /// The event's identifier.
    pub fn id(&self) -> EventId {
        self.inner.id
    }

    /// The event's flags.
    pub fn flags(&self) -> EventFlags {
        self.inner.flags
    }

    /// Record the event on `queue`. Equivalent to `queue.record_event(self)`.
    pub fn record(&self, queue: &crate::queue::Queue) -> Result<()> {
        queue.record_event(self)
    }

    /// Whether the work preceding the most recent record has completed.
    pub fn query(&self) -> bool {
        match self.snapshot() {
            EventRecord::Recorded(slot) => slot.is_complete(),
            EventRecord::Never | EventRecord::Captured(_) => true,
        }
    }

    /// Whether the most recent record happened inside a capture.
    pub fn is_captured(&self) -> bool {
        matches!(self.snapshot(), EventRecord::Captured(_))
    }

    /// Wait until the work preceding the most recent record has completed.
    ///
    /// Synchronizing an event recorded inside a capture that is still in
    /// progress invalidates that capture and fails with
    /// [`OpGraphError::CaptureAborted`].
    pub async fn synchronize(&self) -> Result<()> {
        match self.snapshot() {
            EventRecord::Never => Ok(()),
            EventRecord::Recorded(slot) => {
                slot.wait().await;
                Ok(())
            }
            EventRecord::Captured(mark) => match mark.recorder.upgrade() {
                Some(recorder) if recorder.is_active() => Err(recorder.invalidate(format!(
                    "{} was synchronized while its capture was in progress",
                    self.id()
                ))),
                _ => Ok(()),
            },
        }
    }

    /// Time between the completion of `start` and the completion of `end`.
    ///
    /// Both events must have timing enabled and have completed.
    pub fn elapsed(start: &Event, end: &Event) -> Result<Duration> {
        let completed_at = |event: &Event| -> Result<Instant> {
            if event.flags().disable_timing {
                return Err(OpGraphError::InvalidValue {
                    operation: "event elapsed time".to_string(),
                    cause: format!("timing is disabled on {}", event.id()),
                });
            }
            match event.snapshot() {
                EventRecord::Recorded(slot) => {
                    slot.completed_at().ok_or_else(|| OpGraphError::InvalidValue {
                        operation: "event elapsed time".to_string(),
                        cause: format!("{} has not completed", event.id()),
                    })
                }
                _ => Err(OpGraphError::InvalidValue {
                    operation: "event elapsed time".to_string(),
                    cause: format!("{} was not recorded on a queue", event.id()),
                }),
            }
        };

        let start_at = completed_at(start)?;
        let end_at = completed_at(end)?;
        Ok(end_at.saturating_duration_since(start_at))
    }

    pub(crate) fn snapshot(&self) -> EventRecord {
        self.inner.record.lock().clone()
    }

    pub(crate) fn set_record(&self, record: EventRecord) {
        *self.inner.record.lock() = record;
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("flags", &self.inner.flags)
            .field("complete", &self.query())
            .finish()
    }
}
