//! Common test utilities for integration tests.

#![allow(dead_code)]

use opgraph_core::device::{FnKernel, Kernel, MemoryDevice, MemoryDeviceConfig};
use opgraph_core::error::OpGraphError;
use opgraph_core::logging::BufferedCollector;
use opgraph_core::testing::ChaosConfig;
use opgraph_executor::config::ExecutorConfig;
use opgraph_executor::graph::HostCallback;
use opgraph_executor::queue::Queue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Create an in-process device for testing.
pub fn test_device() -> Arc<MemoryDevice> {
    Arc::new(MemoryDevice::new(
        MemoryDeviceConfig::default().with_total_memory(16 * 1024 * 1024),
    ))
}

/// Create a device whose operations always fail.
pub fn failing_device(seed: u64) -> Arc<MemoryDevice> {
    Arc::new(MemoryDevice::new(
        MemoryDeviceConfig::default().with_chaos(ChaosConfig::failing(1.0).with_seed(seed)),
    ))
}

/// Create a default executor config for testing.
pub fn test_config() -> ExecutorConfig {
    ExecutorConfig::default()
        .with_max_concurrent_nodes(4)
        .with_node_timeout_ms(5_000)
        .with_host_thread_name("opgraph-test-host")
}

/// Create a log collector for testing.
pub fn test_log_collector() -> Arc<BufferedCollector> {
    Arc::new(BufferedCollector::with_default_capacity())
}

/// Create a queue on `device` with the test config and `collector`.
pub fn test_queue(device: &Arc<MemoryDevice>, collector: &Arc<BufferedCollector>) -> Queue {
    Queue::with_options(device.clone(), test_config(), collector.clone()).unwrap()
}

/// A host callback that counts its invocations.
pub fn counting_callback(name: &str) -> (HostCallback, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let callback = HostCallback::new(name, move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (callback, count)
}

/// A kernel that fails every time it runs.
pub fn trap_kernel() -> Arc<dyn Kernel> {
    Arc::new(FnKernel::new("trap", |_, _| {
        Err(OpGraphError::InvalidValue {
            operation: "trap".to_string(),
            cause: "illegal address".to_string(),
        })
    }))
}

/// A kernel that adds 1.0 to every element of its first argument.
pub fn increment_kernel() -> Arc<dyn Kernel> {
    Arc::new(FnKernel::new("increment", |dims, args| {
        let data = args.buffer(0)?;
        let values = data.read_f32s()?;
        for (i, value) in values.iter().enumerate().take(dims.total_threads() as usize) {
            data.write_f32(i, value + 1.0)?;
        }
        Ok(())
    }))
}
