//! The runtime collaborator consumed by the engine.
//!
//! The engine never performs device work itself. Queues hand primitive
//! operations to a [`Device`], which reports success or a typed failure, and
//! the compiler asks it whether referenced buffers are still live.
//!
//! [`MemoryDevice`] is an in-process implementation that keeps every buffer
//! in host memory.

mod buffer;
mod kernel;
mod memory;
pub mod ops;

pub use buffer::DeviceBuffer;
pub use kernel::{FnKernel, Kernel, KernelArgs, KernelAttributes, LaunchDims};
pub use memory::{MemoryDevice, MemoryDeviceConfig};
pub use ops::{BoundOperation, DataOperation, KernelLaunch, Operation};

use crate::error::Result;
use crate::types::BufferId;
use serde::{Deserialize, Serialize};

/// Where an allocation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Device-local memory.
    Device,
    /// Memory migrated on demand between host and device.
    Managed,
    /// Page-locked host memory visible to the device.
    HostPinned,
}

impl MemoryKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Managed => "managed",
            Self::HostPinned => "host_pinned",
        }
    }
}

/// Static description of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Marketing name.
    pub name: String,
    /// Total memory in bytes.
    pub total_memory: u64,
    /// Largest block size any kernel may use.
    pub max_threads_per_block: u32,
    /// Number of multiprocessors.
    pub multiprocessor_count: u32,
    /// PCI bus identifier (`domain:bus:device.function`).
    pub pci_bus_id: String,
    /// Driver version, encoded as `1000 * major + 10 * minor`.
    pub driver_version: u32,
    /// Runtime version, encoded as `1000 * major + 10 * minor`.
    pub runtime_version: u32,
}

/// Free and total device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    /// Bytes available for allocation.
    pub free: u64,
    /// Total bytes.
    pub total: u64,
}

/// Attributes of the allocation a buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerAttributes {
    /// The buffer queried.
    pub buffer: BufferId,
    /// Memory kind of the allocation.
    pub kind: MemoryKind,
    /// Device ordinal owning the allocation.
    pub device_ordinal: u32,
    /// Base address of the allocation.
    pub base_address: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
}

/// A compute device.
///
/// Implementations must be shareable across threads: queues execute
/// operations from worker tasks while callers allocate and free buffers.
pub trait Device: Send + Sync {
    /// Static device description.
    fn properties(&self) -> &DeviceProperties;

    /// Allocate `size` bytes of the given kind.
    ///
    /// Fails with `InvalidValue` for a zero size and `OutOfMemory` when the
    /// device cannot satisfy the request.
    fn allocate(&self, size: u64, kind: MemoryKind) -> Result<DeviceBuffer>;

    /// Free an allocation. Freeing an unknown or already-freed buffer fails
    /// with `ResourceStale`.
    fn free(&self, id: BufferId) -> Result<()>;

    /// Look up a live buffer.
    fn buffer(&self, id: BufferId) -> Result<DeviceBuffer>;

    /// Whether `id` names a live allocation.
    fn is_live(&self, id: BufferId) -> bool;

    /// Run one bound operation to completion.
    fn execute(&self, op: &BoundOperation) -> Result<()>;

    /// Synchronously copy a whole buffer to the host.
    fn read(&self, id: BufferId) -> Result<Vec<u8>> {
        self.buffer(id)?.to_vec()
    }

    /// Free and total memory.
    fn memory_info(&self) -> MemoryInfo;

    /// Attributes of the allocation `id` belongs to.
    fn pointer_attributes(&self, id: BufferId) -> Result<PointerAttributes> {
        let buffer = self.buffer(id)?;
        Ok(PointerAttributes {
            buffer: id,
            kind: buffer.kind(),
            device_ordinal: 0,
            base_address: buffer.base_address(),
            size: buffer.size(),
        })
    }

    /// Base address and size of the allocation `id` belongs to.
    fn address_range(&self, id: BufferId) -> Result<(u64, u64)> {
        let buffer = self.buffer(id)?;
        Ok((buffer.base_address(), buffer.size()))
    }
}
