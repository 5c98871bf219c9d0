//! Collectors that retain log events for later correlation.

use super::event::{LogCategory, LogEvent, LogLevel};
use super::filter::LogFilter;
use crate::types::{LaunchId, NodeId, QueueId};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Events retained by [`BufferedCollector::with_default_capacity`].
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// Sink for the events queues, the compiler and launches emit.
pub trait LogCollector: Send + Sync {
    /// Accept one event.
    fn collect(&self, event: LogEvent);

    /// Number of events currently retained.
    fn len(&self) -> usize;

    /// Whether no events are retained.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type LogSubscribers = RwLock<Vec<Arc<dyn Fn(&LogEvent) + Send + Sync>>>;

/// Keeps the most recent events in memory, oldest evicted first.
///
/// Events are numbered in collection order starting at 1. Subscribers run
/// synchronously on the collecting thread, before the event is stored.
pub struct BufferedCollector {
    buffer: RwLock<VecDeque<LogEvent>>,
    capacity: usize,
    next_id: AtomicU64,
    filter: Option<LogFilter>,
    subscribers: LogSubscribers,
}

impl BufferedCollector {
    /// Create a collector keeping at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            next_id: AtomicU64::new(1),
            filter: None,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Create a collector with [`DEFAULT_BUFFER_CAPACITY`].
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }

    /// Drop incoming events that do not match `filter`.
    pub fn with_filter(mut self, filter: LogFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Call `callback` with every event as it is collected.
    pub fn subscribe(&self, callback: Arc<dyn Fn(&LogEvent) + Send + Sync>) {
        self.subscribers.write().push(callback);
    }

    /// Events matching `filter`, oldest first, up to its limit.
    pub fn query(&self, filter: &LogFilter) -> Vec<LogEvent> {
        let buffer = self.buffer.read();
        let matching = buffer.iter().filter(|e| filter.matches(e)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Events logged on behalf of `queue_id`.
    pub fn by_queue(&self, queue_id: QueueId) -> Vec<LogEvent> {
        self.select(|e| e.queue_id == Some(queue_id))
    }

    /// Events belonging to one launch, including its node events.
    pub fn by_launch(&self, launch_id: LaunchId) -> Vec<LogEvent> {
        self.select(|e| e.launch_id == Some(launch_id))
    }

    /// Events at or above `min_level`.
    pub fn by_level(&self, min_level: LogLevel) -> Vec<LogEvent> {
        self.select(|e| e.level >= min_level)
    }

    /// Events of one category.
    pub fn by_category(&self, category: LogCategory) -> Vec<LogEvent> {
        self.select(|e| e.category == category)
    }

    /// Every retained event.
    pub fn all(&self) -> Vec<LogEvent> {
        self.select(|_| true)
    }

    /// Drop every retained event.
    pub fn clear(&self) {
        self.buffer.write().clear();
    }

    fn select(&self, keep: impl Fn(&LogEvent) -> bool) -> Vec<LogEvent> {
        self.buffer.read().iter().filter(|e| keep(e)).cloned().collect()
    }
}

impl LogCollector for BufferedCollector {
    fn collect(&self, mut event: LogEvent) {
        if let Some(ref filter) = self.filter {
            if !filter.matches(&event) {
                return;
            }
        }

        event.id = self.next_id.fetch_add(1, Ordering::SeqCst);

        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                subscriber(&event);
            }
        }

        let mut buffer = self.buffer.write();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event);
    }

    fn len(&self) -> usize {
        self.buffer.read().len()
    }
}

impl Default for BufferedCollector {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// A no-op collector that discards all events.
pub struct NullCollector;

impl LogCollector for NullCollector {
    fn collect(&self, _event: LogEvent) {}

    fn len(&self) -> usize {
        0
    }
}

/// Context for logging on behalf of one queue and, optionally, one launch.
///
/// Fields set on the context are applied to every event that does not
/// already carry them.
#[derive(Clone)]
pub struct LogContext {
    collector: Arc<dyn LogCollector>,
    queue_id: Option<QueueId>,
    node_id: Option<NodeId>,
    launch_id: Option<LaunchId>,
}

impl LogContext {
    /// Create a new log context.
    pub fn new(collector: Arc<dyn LogCollector>) -> Self {
        Self {
            collector,
            queue_id: None,
            node_id: None,
            launch_id: None,
        }
    }

    /// Set the queue ID.
    pub fn with_queue_id(mut self, queue_id: QueueId) -> Self {
        self.queue_id = Some(queue_id);
        self
    }

    /// Set the launch ID.
    pub fn with_launch_id(mut self, launch_id: LaunchId) -> Self {
        self.launch_id = Some(launch_id);
        self
    }

    /// Create a child context for a specific node.
    pub fn for_node(&self, node_id: NodeId) -> Self {
        Self {
            node_id: Some(node_id),
            ..self.clone()
        }
    }

    /// Log an event with context fields automatically applied.
    pub fn log(&self, mut event: LogEvent) {
        if event.queue_id.is_none() {
            event.queue_id = self.queue_id;
        }
        if event.node_id.is_none() {
            event.node_id = self.node_id;
        }
        if event.launch_id.is_none() {
            event.launch_id = self.launch_id;
        }
        self.collector.collect(event);
    }

    /// Log a debug-level message.
    pub fn debug(&self, category: LogCategory, message: impl Into<String>) {
        self.log(LogEvent::debug(category, message));
    }

    /// Log an info-level message.
    pub fn info(&self, category: LogCategory, message: impl Into<String>) {
        self.log(LogEvent::info(category, message));
    }

    /// Log a warn-level message.
    pub fn warn(&self, category: LogCategory, message: impl Into<String>) {
        self.log(LogEvent::warn(category, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_collector_basic() {
        let collector = BufferedCollector::new(100);

        collector.collect(LogEvent::info(LogCategory::System, "Test message"));
        collector.collect(LogEvent::warn(LogCategory::Node, "Warning"));

        assert_eq!(collector.len(), 2);
    }

    #[test]
    fn buffered_collector_capacity() {
        let collector = BufferedCollector::new(3);

        collector.collect(LogEvent::info(LogCategory::System, "Event 1"));
        collector.collect(LogEvent::info(LogCategory::System, "Event 2"));
        collector.collect(LogEvent::info(LogCategory::System, "Event 3"));
        collector.collect(LogEvent::info(LogCategory::System, "Event 4"));

        assert_eq!(collector.len(), 3);

        let events = collector.all();
        assert_eq!(events[0].message, "Event 2");
        assert_eq!(events[2].message, "Event 4");
    }

    #[test]
    fn buffered_collector_event_ids() {
        let collector = BufferedCollector::new(100);

        collector.collect(LogEvent::info(LogCategory::System, "Event 1"));
        collector.collect(LogEvent::info(LogCategory::System, "Event 2"));

        let events = collector.all();
        assert_eq!(events[0].id, 1);
        assert_eq!(events[1].id, 2);
    }

    #[test]
    fn buffered_collector_by_launch() {
        let collector = BufferedCollector::new(100);
        let launch_id = LaunchId::new();

        collector.collect(LogEvent::info(LogCategory::System, "Unrelated"));
        collector
            .collect(LogEvent::info(LogCategory::Launch, "Launch event").with_launch_id(launch_id));
        collector.collect(
            LogEvent::debug(LogCategory::Node, "Node event")
                .with_launch_id(launch_id)
                .with_queue_id(QueueId::new(1)),
        );

        assert_eq!(collector.by_launch(launch_id).len(), 2);
        assert_eq!(collector.by_queue(QueueId::new(1)).len(), 1);
    }

    #[test]
    fn buffered_collector_with_filter() {
        let collector =
            BufferedCollector::new(100).with_filter(LogFilter::new().min_level(LogLevel::Warn));

        collector.collect(LogEvent::info(LogCategory::System, "dropped"));
        collector.collect(LogEvent::error(LogCategory::System, "kept"));

        assert_eq!(collector.len(), 1);
        assert_eq!(collector.all()[0].message, "kept");
    }

    #[test]
    fn log_context_applies_ids() {
        let collector = Arc::new(BufferedCollector::new(100));
        let launch_id = LaunchId::new();
        let ctx = LogContext::new(collector.clone())
            .with_queue_id(QueueId::new(5))
            .with_launch_id(launch_id);

        ctx.info(LogCategory::Launch, "started");

        let events = collector.all();
        assert_eq!(events[0].queue_id, Some(QueueId::new(5)));
        assert_eq!(events[0].launch_id, Some(launch_id));
    }

    #[test]
    fn null_collector_discards() {
        let collector = NullCollector;
        collector.collect(LogEvent::info(LogCategory::System, "gone"));
        assert!(collector.is_empty());
    }
}
