//! In-process simulated device.

use super::{
    BoundOperation, Device, DeviceBuffer, DeviceProperties, MemoryInfo, MemoryKind,
};
use crate::error::{OpGraphError, Result};
use crate::testing::{ChaosConfig, ChaosEngine, ChaosFault};
use crate::types::BufferId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Allocation granularity of simulated addresses.
const ALLOCATION_ALIGNMENT: u64 = 256;

/// Base of the simulated device address space.
const DEVICE_ADDRESS_BASE: u64 = 0x7000_0000_0000;

/// Base of the simulated pinned host address space.
const HOST_ADDRESS_BASE: u64 = 0x5000_0000_0000;

/// Configuration for [`MemoryDevice`].
#[derive(Debug, Clone)]
pub struct MemoryDeviceConfig {
    /// Device name.
    pub name: String,
    /// Capacity in bytes shared by device and managed allocations.
    pub total_memory: u64,
    /// Largest permitted block size.
    pub max_threads_per_block: u32,
    /// Reported multiprocessor count.
    pub multiprocessor_count: u32,
    /// Reported PCI bus id.
    pub pci_bus_id: String,
    /// Reported driver version.
    pub driver_version: u32,
    /// Reported runtime version.
    pub runtime_version: u32,
    /// Optional fault injection.
    pub chaos: Option<ChaosConfig>,
}

impl Default for MemoryDeviceConfig {
    fn default() -> Self {
        Self {
            name: "opgraph simulated device".to_string(),
            total_memory: 256 * 1024 * 1024,
            max_threads_per_block: 1024,
            multiprocessor_count: 16,
            pci_bus_id: "0000:00:00.0".to_string(),
            driver_version: 12_040,
            runtime_version: 12_040,
            chaos: None,
        }
    }
}

impl MemoryDeviceConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `OPGRAPH_DEVICE_MEMORY`: Capacity in bytes
    /// - `OPGRAPH_DEVICE_NAME`: Device name
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let total_memory = std::env::var("OPGRAPH_DEVICE_MEMORY")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.total_memory);

        let name = std::env::var("OPGRAPH_DEVICE_NAME").unwrap_or(defaults.name.clone());

        Self {
            name,
            total_memory,
            ..defaults
        }
    }

    /// Set the capacity in bytes.
    pub fn with_total_memory(mut self, bytes: u64) -> Self {
        self.total_memory = bytes;
        self
    }

    /// Set the device name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the block size limit.
    pub fn with_max_threads_per_block(mut self, threads: u32) -> Self {
        self.max_threads_per_block = threads;
        self
    }

    /// Enable fault injection.
    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = Some(chaos);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.total_memory == 0 {
            return Err(OpGraphError::ConfigValue {
                key: "total_memory".to_string(),
                cause: "must be greater than zero".to_string(),
            });
        }
        if self.max_threads_per_block == 0 {
            return Err(OpGraphError::ConfigValue {
                key: "max_threads_per_block".to_string(),
                cause: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// A device whose memory is host memory.
///
/// Device and managed allocations count against `total_memory`; pinned host
/// allocations do not. Every operation runs synchronously on the calling
/// thread.
#[derive(Debug)]
pub struct MemoryDevice {
    properties: DeviceProperties,
    buffers: DashMap<BufferId, DeviceBuffer>,
    used: AtomicU64,
    next_device_address: AtomicU64,
    next_host_address: AtomicU64,
    chaos: Option<ChaosEngine>,
}

impl MemoryDevice {
    /// Create a device.
    pub fn new(config: MemoryDeviceConfig) -> Self {
        Self {
            properties: DeviceProperties {
                name: config.name,
                total_memory: config.total_memory,
                max_threads_per_block: config.max_threads_per_block,
                multiprocessor_count: config.multiprocessor_count,
                pci_bus_id: config.pci_bus_id,
                driver_version: config.driver_version,
                runtime_version: config.runtime_version,
            },
            buffers: DashMap::new(),
            used: AtomicU64::new(0),
            next_device_address: AtomicU64::new(DEVICE_ADDRESS_BASE),
            next_host_address: AtomicU64::new(HOST_ADDRESS_BASE),
            chaos: config.chaos.map(ChaosEngine::new),
        }
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.buffers.len()
    }

    /// The fault injection engine, if enabled.
    pub fn chaos(&self) -> Option<&ChaosEngine> {
        self.chaos.as_ref()
    }

    fn counts_against_capacity(kind: MemoryKind) -> bool {
        !matches!(kind, MemoryKind::HostPinned)
    }

    fn reserve(&self, size: u64) -> Result<()> {
        let total = self.properties.total_memory;
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|next| *next <= total)
            })
            .map(|_| ())
            .map_err(|used| OpGraphError::OutOfMemory {
                requested: size,
                available: total.saturating_sub(used),
            })
    }

    fn inject_fault(&self, op: &BoundOperation) -> Result<()> {
        let Some(chaos) = &self.chaos else {
            return Ok(());
        };

        match chaos.maybe_fail_operation(op.name()) {
            Ok(()) => Ok(()),
            Err(ChaosFault::SlowOperation { latency_ms, .. }) => {
                std::thread::sleep(Duration::from_millis(latency_ms));
                Ok(())
            }
            Err(fault) => {
                warn!(operation = op.name(), fault = fault.name(), "Injected device fault");
                Err(OpGraphError::DeviceFault {
                    operation: op.name().to_string(),
                    cause: format!("injected {}", fault.name()),
                })
            }
        }
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new(MemoryDeviceConfig::default())
    }
}

impl Device for MemoryDevice {
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn allocate(&self, size: u64, kind: MemoryKind) -> Result<DeviceBuffer> {
        if size == 0 {
            return Err(OpGraphError::InvalidValue {
                operation: "allocate".to_string(),
                cause: "size must be greater than zero".to_string(),
            });
        }

        if Self::counts_against_capacity(kind) {
            self.reserve(size)?;
        }

        let span = size.div_ceil(ALLOCATION_ALIGNMENT) * ALLOCATION_ALIGNMENT;
        let base_address = match kind {
            MemoryKind::HostPinned => self.next_host_address.fetch_add(span, Ordering::Relaxed),
            _ => self.next_device_address.fetch_add(span, Ordering::Relaxed),
        };

        let buffer = DeviceBuffer::new(BufferId::next(), size, kind, base_address);
        debug!(
            buffer_id = %buffer.id(),
            size,
            kind = kind.as_str(),
            "Allocated buffer"
        );
        self.buffers.insert(buffer.id(), buffer.clone());
        Ok(buffer)
    }

    fn free(&self, id: BufferId) -> Result<()> {
        let (_, buffer) = self
            .buffers
            .remove(&id)
            .ok_or(OpGraphError::ResourceStale { buffer: id })?;

        if Self::counts_against_capacity(buffer.kind()) {
            self.used.fetch_sub(buffer.size(), Ordering::AcqRel);
        }
        buffer.release();
        debug!(buffer_id = %id, "Freed buffer");
        Ok(())
    }

    fn buffer(&self, id: BufferId) -> Result<DeviceBuffer> {
        self.buffers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(OpGraphError::ResourceStale { buffer: id })
    }

    fn is_live(&self, id: BufferId) -> bool {
        self.buffers.contains_key(&id)
    }

    fn execute(&self, op: &BoundOperation) -> Result<()> {
        self.inject_fault(op)?;
        op.apply()
    }

    fn memory_info(&self) -> MemoryInfo {
        let total = self.properties.total_memory;
        MemoryInfo {
            free: total.saturating_sub(self.used.load(Ordering::Acquire)),
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DataOperation, Operation};

    fn small_device() -> MemoryDevice {
        MemoryDevice::new(MemoryDeviceConfig::default().with_total_memory(4096))
    }

    #[test]
    fn allocation_accounting() {
        let device = small_device();
        let buffer = device.allocate(1024, MemoryKind::Device).unwrap();
        assert_eq!(device.memory_info().free, 3072);

        device.free(buffer.id()).unwrap();
        assert_eq!(device.memory_info().free, 4096);
        assert_eq!(device.allocation_count(), 0);
    }

    #[test]
    fn out_of_memory() {
        let device = small_device();
        let err = device.allocate(8192, MemoryKind::Managed).unwrap_err();
        assert_eq!(
            err,
            OpGraphError::OutOfMemory {
                requested: 8192,
                available: 4096
            }
        );
    }

    #[test]
    fn pinned_memory_does_not_count() {
        let device = small_device();
        let pinned = device.allocate(8192, MemoryKind::HostPinned).unwrap();
        assert_eq!(device.memory_info().free, 4096);
        assert_eq!(
            device.pointer_attributes(pinned.id()).unwrap().kind,
            MemoryKind::HostPinned
        );
    }

    #[test]
    fn zero_sized_allocation_is_invalid() {
        let device = small_device();
        assert!(matches!(
            device.allocate(0, MemoryKind::Device),
            Err(OpGraphError::InvalidValue { .. })
        ));
    }

    #[test]
    fn double_free_is_stale() {
        let device = small_device();
        let buffer = device.allocate(16, MemoryKind::Device).unwrap();
        device.free(buffer.id()).unwrap();
        assert_eq!(
            device.free(buffer.id()).unwrap_err(),
            OpGraphError::ResourceStale {
                buffer: buffer.id()
            }
        );
    }

    #[test]
    fn addresses_do_not_overlap() {
        let device = small_device();
        let a = device.allocate(100, MemoryKind::Device).unwrap();
        let b = device.allocate(100, MemoryKind::Device).unwrap();
        let (base_a, size_a) = device.address_range(a.id()).unwrap();
        let (base_b, _) = device.address_range(b.id()).unwrap();
        assert!(base_a + size_a <= base_b);
        assert_eq!(base_a % ALLOCATION_ALIGNMENT, 0);
    }

    #[test]
    fn execute_fill() {
        let device = small_device();
        let buffer = device.allocate(8, MemoryKind::Device).unwrap();
        let op = Operation::from(DataOperation::fill(buffer.id(), 8, 7))
            .bind(&device)
            .unwrap();
        device.execute(&op).unwrap();
        assert_eq!(device.read(buffer.id()).unwrap(), vec![7; 8]);
    }

    #[test]
    fn injected_fault_is_device_fault() {
        let device = MemoryDevice::new(
            MemoryDeviceConfig::default().with_chaos(ChaosConfig::failing(1.0).with_seed(1)),
        );
        let buffer = device.allocate(8, MemoryKind::Device).unwrap();
        let op = Operation::from(DataOperation::fill(buffer.id(), 8, 7))
            .bind(&device)
            .unwrap();
        assert!(matches!(
            device.execute(&op),
            Err(OpGraphError::DeviceFault { .. })
        ));
        assert_eq!(device.chaos().map(|c| c.injection_count()), Some(1));
    }

    #[test]
    fn config_validation() {
        assert!(MemoryDeviceConfig::default().validate().is_ok());
        let err = MemoryDeviceConfig::default()
            .with_total_memory(0)
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), "E801");
    }
}
