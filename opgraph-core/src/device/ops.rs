//! Primitive asynchronous operations.
//!
//! An [`Operation`] names buffers by [`BufferId`]. Binding it against a
//! [`Device`] resolves those IDs to live [`DeviceBuffer`] handles and checks
//! every range, producing a [`BoundOperation`] that can be executed without
//! further lookups.

use super::{Device, DeviceBuffer, Kernel, KernelArgs, LaunchDims};
use crate::error::{OpGraphError, Result};
use crate::types::BufferId;
use std::fmt;
use std::sync::Arc;

/// A memory operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DataOperation {
    /// Set `len` bytes of `dst` starting at `offset` to `value`.
    Fill {
        /// Destination buffer.
        dst: BufferId,
        /// Byte offset into `dst`.
        offset: u64,
        /// Number of bytes to set.
        len: u64,
        /// Byte value.
        value: u8,
    },
    /// Copy `len` bytes between two device buffers.
    Copy {
        /// Source buffer.
        src: BufferId,
        /// Destination buffer.
        dst: BufferId,
        /// Byte offset into `src`.
        src_offset: u64,
        /// Byte offset into `dst`.
        dst_offset: u64,
        /// Number of bytes to copy.
        len: u64,
    },
    /// Copy host bytes into a device buffer.
    Upload {
        /// Destination buffer.
        dst: BufferId,
        /// Byte offset into `dst`.
        offset: u64,
        /// Bytes to write.
        bytes: Arc<[u8]>,
    },
}

impl DataOperation {
    /// Fill the whole of `len` bytes from offset 0.
    pub fn fill(dst: BufferId, len: u64, value: u8) -> Self {
        Self::Fill {
            dst,
            offset: 0,
            len,
            value,
        }
    }

    /// Copy `len` bytes from the start of `src` to the start of `dst`.
    pub fn copy(src: BufferId, dst: BufferId, len: u64) -> Self {
        Self::Copy {
            src,
            dst,
            src_offset: 0,
            dst_offset: 0,
            len,
        }
    }

    /// Upload `bytes` to the start of `dst`.
    pub fn upload(dst: BufferId, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Upload {
            dst,
            offset: 0,
            bytes: bytes.into(),
        }
    }

    /// Operation name (`"fill"`, `"copy"` or `"upload"`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fill { .. } => "fill",
            Self::Copy { .. } => "copy",
            Self::Upload { .. } => "upload",
        }
    }

    /// Buffers this operation touches.
    pub fn buffers(&self) -> Vec<BufferId> {
        match self {
            Self::Fill { dst, .. } | Self::Upload { dst, .. } => vec![*dst],
            Self::Copy { src, dst, .. } => vec![*src, *dst],
        }
    }

    fn bind(&self, device: &dyn Device) -> Result<BoundOperation> {
        match self {
            Self::Fill {
                dst,
                offset,
                len,
                value,
            } => {
                let dst = device.buffer(*dst)?;
                dst.check_range("fill", *offset, *len)?;
                Ok(BoundOperation::Fill {
                    dst,
                    offset: *offset,
                    len: *len,
                    value: *value,
                })
            }
            Self::Copy {
                src,
                dst,
                src_offset,
                dst_offset,
                len,
            } => {
                let src = device.buffer(*src)?;
                let dst = device.buffer(*dst)?;
                src.check_range("copy", *src_offset, *len)?;
                dst.check_range("copy", *dst_offset, *len)?;
                Ok(BoundOperation::Copy {
                    src,
                    dst,
                    src_offset: *src_offset,
                    dst_offset: *dst_offset,
                    len: *len,
                })
            }
            Self::Upload { dst, offset, bytes } => {
                let dst = device.buffer(*dst)?;
                dst.check_range("upload", *offset, bytes.len() as u64)?;
                Ok(BoundOperation::Upload {
                    dst,
                    offset: *offset,
                    bytes: Arc::clone(bytes),
                })
            }
        }
    }
}

/// A compute kernel launch.
#[derive(Clone)]
pub struct KernelLaunch {
    /// The kernel to run.
    pub kernel: Arc<dyn Kernel>,
    /// Launch grid.
    pub dims: LaunchDims,
    /// Buffer arguments, in order.
    pub args: Vec<BufferId>,
}

impl KernelLaunch {
    /// Create a kernel launch.
    pub fn new(kernel: Arc<dyn Kernel>, dims: LaunchDims, args: Vec<BufferId>) -> Self {
        Self { kernel, dims, args }
    }

    fn bind(&self, device: &dyn Device) -> Result<BoundOperation> {
        if self.dims.is_empty() {
            return Err(OpGraphError::InvalidValue {
                operation: format!("kernel {}", self.kernel.name()),
                cause: "launch grid has a zero dimension".to_string(),
            });
        }

        let limit = device
            .properties()
            .max_threads_per_block
            .min(self.kernel.attributes().max_threads_per_block);
        if self.dims.threads_per_block() > limit as u64 {
            return Err(OpGraphError::InvalidValue {
                operation: format!("kernel {}", self.kernel.name()),
                cause: format!(
                    "block of {} threads exceeds limit of {}",
                    self.dims.threads_per_block(),
                    limit
                ),
            });
        }

        let buffers = self
            .args
            .iter()
            .map(|id| device.buffer(*id))
            .collect::<Result<Vec<_>>>()?;

        Ok(BoundOperation::Kernel {
            kernel: Arc::clone(&self.kernel),
            dims: self.dims,
            args: KernelArgs::new(buffers),
        })
    }
}

impl fmt::Debug for KernelLaunch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelLaunch")
            .field("kernel", &self.kernel.name())
            .field("dims", &self.dims)
            .field("args", &self.args)
            .finish()
    }
}

/// Any primitive operation a queue can run.
#[derive(Debug, Clone)]
pub enum Operation {
    /// A memory operation.
    Data(DataOperation),
    /// A compute kernel launch.
    Kernel(KernelLaunch),
}

impl Operation {
    /// Operation name, used for logs and fault selection.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Data(op) => op.name(),
            Self::Kernel(_) => "kernel",
        }
    }

    /// Buffers this operation touches.
    pub fn buffers(&self) -> Vec<BufferId> {
        match self {
            Self::Data(op) => op.buffers(),
            Self::Kernel(launch) => launch.args.clone(),
        }
    }

    /// Resolve buffer IDs against `device` and validate every range.
    ///
    /// Fails with [`OpGraphError::ResourceStale`] when a buffer has been
    /// freed and with [`OpGraphError::InvalidValue`] for out-of-range
    /// accesses or oversized kernel blocks.
    pub fn bind(&self, device: &dyn Device) -> Result<BoundOperation> {
        match self {
            Self::Data(op) => op.bind(device),
            Self::Kernel(launch) => launch.bind(device),
        }
    }
}

impl From<DataOperation> for Operation {
    fn from(op: DataOperation) -> Self {
        Self::Data(op)
    }
}

impl From<KernelLaunch> for Operation {
    fn from(launch: KernelLaunch) -> Self {
        Self::Kernel(launch)
    }
}

/// An operation whose buffers have been resolved to live handles.
#[derive(Debug, Clone)]
pub enum BoundOperation {
    /// Bound fill.
    Fill {
        /// Destination buffer.
        dst: DeviceBuffer,
        /// Byte offset.
        offset: u64,
        /// Number of bytes.
        len: u64,
        /// Byte value.
        value: u8,
    },
    /// Bound device-to-device copy.
    Copy {
        /// Source buffer.
        src: DeviceBuffer,
        /// Destination buffer.
        dst: DeviceBuffer,
        /// Byte offset into `src`.
        src_offset: u64,
        /// Byte offset into `dst`.
        dst_offset: u64,
        /// Number of bytes.
        len: u64,
    },
    /// Bound host-to-device upload.
    Upload {
        /// Destination buffer.
        dst: DeviceBuffer,
        /// Byte offset.
        offset: u64,
        /// Bytes to write.
        bytes: Arc<[u8]>,
    },
    /// Bound kernel launch.
    Kernel {
        /// The kernel to run.
        kernel: Arc<dyn Kernel>,
        /// Launch grid.
        dims: LaunchDims,
        /// Bound arguments.
        args: KernelArgs,
    },
}

impl BoundOperation {
    /// Operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fill { .. } => "fill",
            Self::Copy { .. } => "copy",
            Self::Upload { .. } => "upload",
            Self::Kernel { .. } => "kernel",
        }
    }

    /// The first bound buffer that has been freed since binding, if any.
    pub fn stale_buffer(&self) -> Option<BufferId> {
        let stale = |buf: &DeviceBuffer| (!buf.is_live()).then(|| buf.id());
        match self {
            Self::Fill { dst, .. } | Self::Upload { dst, .. } => stale(dst),
            Self::Copy { src, dst, .. } => stale(src).or_else(|| stale(dst)),
            Self::Kernel { args, .. } => args.iter().find_map(stale),
        }
    }

    /// Perform the operation on the bound buffers.
    ///
    /// Devices call this from [`Device::execute`] after their own checks.
    pub fn apply(&self) -> Result<()> {
        if let Some(buffer) = self.stale_buffer() {
            return Err(OpGraphError::ResourceStale { buffer });
        }

        match self {
            Self::Fill {
                dst,
                offset,
                len,
                value,
            } => dst.fill(*offset, *len, *value),
            Self::Copy {
                src,
                dst,
                src_offset,
                dst_offset,
                len,
            } => {
                if src.same_allocation(dst) {
                    let (from, to, len) =
                        (*src_offset as usize, *dst_offset as usize, *len as usize);
                    dst.with_bytes_mut(|bytes| bytes.copy_within(from..from + len, to))
                } else {
                    let data = src.read_range(*src_offset, *len)?;
                    dst.write(*dst_offset, &data)
                }
            }
            Self::Upload { dst, offset, bytes } => dst.write(*offset, bytes),
            Self::Kernel { kernel, dims, args } => {
                kernel
                    .run(dims, args)
                    .map_err(|e| match e {
                        OpGraphError::DeviceFault { .. } => e,
                        other => OpGraphError::DeviceFault {
                            operation: format!("kernel {}", kernel.name()),
                            cause: other.to_string(),
                        },
                    })
            }
        }
    }
}

impl fmt::Debug for dyn Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kernel({})", self.name())
    }
}
