//! Events across executing queues.

mod common;

use common::{test_device, test_log_collector, test_queue};
use opgraph_core::device::MemoryKind;
use opgraph_core::{Device, OpGraphError};
use opgraph_executor::graph::HostCallback;
use opgraph_executor::queue::{Event, EventFlags};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_orders_work_across_queues() {
    let device = test_device();
    let collector = test_log_collector();
    let producer = test_queue(&device, &collector);
    let consumer = test_queue(&device, &collector);
    let source = device.allocate(512, MemoryKind::Device).unwrap();
    let target = device.allocate(512, MemoryKind::Device).unwrap();

    // Hold the producer until the consumer has already queued its copy.
    let gate = Arc::new(std::sync::Barrier::new(2));
    let waiter = Arc::clone(&gate);
    producer
        .enqueue_host_fn(HostCallback::new("gate", move || {
            waiter.wait();
        }))
        .unwrap();
    producer.fill(source.id(), 512, 0x3C).unwrap();
    let filled = Event::new();
    producer.record_event(&filled).unwrap();

    consumer.wait_event(&filled).unwrap();
    consumer.copy(source.id(), target.id(), 512).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!filled.query());
    assert!(!consumer.query());

    let releaser = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || releaser.wait()).await.unwrap();

    consumer.synchronize().await.unwrap();
    assert!(filled.query());
    assert_eq!(target.to_vec().unwrap(), vec![0x3C; 512]);
    producer.synchronize().await.unwrap();
}

#[tokio::test]
async fn event_synchronize_and_elapsed() {
    let device = test_device();
    let collector = test_log_collector();
    let queue = test_queue(&device, &collector);

    let start = Event::new();
    let end = Event::with_flags(EventFlags::default().with_blocking_sync(true));
    queue.record_event(&start).unwrap();
    queue
        .enqueue_host_fn(HostCallback::new("sleep", || {
            std::thread::sleep(Duration::from_millis(15));
        }))
        .unwrap();
    queue.record_event(&end).unwrap();

    end.synchronize().await.unwrap();
    assert!(start.query());
    let elapsed = Event::elapsed(&start, &end).unwrap();
    assert!(elapsed >= Duration::from_millis(15));
}

#[tokio::test]
async fn elapsed_rejects_untimed_events() {
    let device = test_device();
    let collector = test_log_collector();
    let queue = test_queue(&device, &collector);

    let start = Event::with_flags(EventFlags::default().with_disable_timing(true));
    let end = Event::new();
    queue.record_event(&start).unwrap();
    queue.record_event(&end).unwrap();
    queue.synchronize().await.unwrap();

    let err = Event::elapsed(&start, &end).unwrap_err();
    assert_eq!(err.code(), "E502");
}

#[tokio::test]
async fn rerecording_moves_the_event() {
    let device = test_device();
    let collector = test_log_collector();
    let queue = test_queue(&device, &collector);
    let event = Event::new();

    queue.record_event(&event).unwrap();
    queue.synchronize().await.unwrap();
    assert!(event.query());

    let gate = Arc::new(std::sync::Barrier::new(2));
    let waiter = Arc::clone(&gate);
    queue
        .enqueue_host_fn(HostCallback::new("gate", move || {
            waiter.wait();
        }))
        .unwrap();
    queue.record_event(&event).unwrap();
    assert!(!event.query());

    let releaser = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || releaser.wait()).await.unwrap();
    event.synchronize().await.unwrap();
    assert!(event.query());
}

#[tokio::test]
async fn synchronizing_captured_event_aborts_capture() {
    let device = test_device();
    let collector = test_log_collector();
    let queue = test_queue(&device, &collector);
    let buffer = device.allocate(32, MemoryKind::Device).unwrap();

    let session = queue.begin_capture().unwrap();
    queue.fill(buffer.id(), 32, 1).unwrap();
    let captured = Event::new();
    queue.record_event(&captured).unwrap();
    assert!(captured.query());

    let err = captured.synchronize().await.unwrap_err();
    assert!(matches!(err, OpGraphError::CaptureAborted { .. }));
    assert!(!session.is_valid());
    assert!(session.end().is_err());
}

#[tokio::test]
async fn wait_within_same_capture_adds_edge() {
    let device = test_device();
    let collector = test_log_collector();
    let queue = test_queue(&device, &collector);
    let buffer = device.allocate(32, MemoryKind::Device).unwrap();

    let session = queue.begin_capture().unwrap();
    queue.fill(buffer.id(), 32, 1).unwrap();
    let marker = Event::new();
    queue.record_event(&marker).unwrap();
    queue.fill(buffer.id(), 32, 2).unwrap();
    queue.wait_event(&marker).unwrap();
    queue.fill(buffer.id(), 32, 3).unwrap();
    let graph = session.end().unwrap();

    let ids: Vec<_> = graph.nodes().map(|n| n.id()).collect();
    assert_eq!(graph.predecessors(ids[2]).unwrap(), &[ids[0], ids[1]]);
    assert_eq!(graph.frontier(), vec![ids[2]]);
}
