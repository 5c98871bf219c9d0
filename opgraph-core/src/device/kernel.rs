//! Compute kernels.
//!
//! Kernel numerics are opaque to the engine: a [`Kernel`] is any value that
//! can run over a launch grid with a list of bound buffers.

use super::DeviceBuffer;
use crate::error::{OpGraphError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Grid and block dimensions of a kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchDims {
    /// Number of blocks in each dimension.
    pub grid: (u32, u32, u32),
    /// Number of threads per block in each dimension.
    pub block: (u32, u32, u32),
}

impl LaunchDims {
    /// Create launch dimensions.
    pub fn new(grid: (u32, u32, u32), block: (u32, u32, u32)) -> Self {
        Self { grid, block }
    }

    /// One-dimensional launch of `blocks` blocks with `threads` threads each.
    pub fn linear(blocks: u32, threads: u32) -> Self {
        Self::new((blocks, 1, 1), (threads, 1, 1))
    }

    /// Threads in one block.
    pub fn threads_per_block(&self) -> u64 {
        self.block.0 as u64 * self.block.1 as u64 * self.block.2 as u64
    }

    /// Blocks in the grid.
    pub fn block_count(&self) -> u64 {
        self.grid.0 as u64 * self.grid.1 as u64 * self.grid.2 as u64
    }

    /// Threads across the whole grid.
    pub fn total_threads(&self) -> u64 {
        self.threads_per_block() * self.block_count()
    }

    /// Whether any dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.total_threads() == 0
    }
}

impl Default for LaunchDims {
    fn default() -> Self {
        Self::linear(1, 1)
    }
}

/// Static resource usage of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelAttributes {
    /// Largest block size the kernel can be launched with.
    pub max_threads_per_block: u32,
    /// Registers used per thread.
    pub num_regs: u32,
    /// Statically allocated shared memory per block.
    pub shared_size_bytes: u64,
    /// Constant memory used by the kernel.
    pub const_size_bytes: u64,
    /// Local memory per thread.
    pub local_size_bytes: u64,
}

impl Default for KernelAttributes {
    fn default() -> Self {
        Self {
            max_threads_per_block: 1024,
            num_regs: 0,
            shared_size_bytes: 0,
            const_size_bytes: 0,
            local_size_bytes: 0,
        }
    }
}

/// Buffers bound to a kernel launch, in argument order.
#[derive(Debug, Clone, Default)]
pub struct KernelArgs {
    buffers: Vec<DeviceBuffer>,
}

impl KernelArgs {
    /// Wrap bound buffers.
    pub fn new(buffers: Vec<DeviceBuffer>) -> Self {
        Self { buffers }
    }

    /// The buffer at argument position `index`.
    pub fn buffer(&self, index: usize) -> Result<&DeviceBuffer> {
        self.buffers
            .get(index)
            .ok_or_else(|| OpGraphError::InvalidValue {
                operation: "kernel".to_string(),
                cause: format!(
                    "argument {} requested but only {} bound",
                    index,
                    self.buffers.len()
                ),
            })
    }

    /// Number of bound arguments.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no arguments are bound.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Iterate over the bound buffers.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceBuffer> {
        self.buffers.iter()
    }
}

/// A compute kernel.
pub trait Kernel: Send + Sync {
    /// Kernel name, used in logs and errors.
    fn name(&self) -> &str;

    /// Static resource usage.
    fn attributes(&self) -> KernelAttributes {
        KernelAttributes::default()
    }

    /// Execute the kernel over `dims`.
    fn run(&self, dims: &LaunchDims, args: &KernelArgs) -> Result<()>;
}

type KernelFn = dyn Fn(&LaunchDims, &KernelArgs) -> Result<()> + Send + Sync;

/// A kernel backed by a closure.
///
/// # Example
///
/// ```
/// use opgraph_core::device::{FnKernel, Kernel, KernelArgs, LaunchDims};
///
/// let kernel = FnKernel::new("store_one", |_dims, args| {
///     args.buffer(0)?.write_f32(0, 1.0)
/// });
/// assert_eq!(kernel.name(), "store_one");
/// ```
#[derive(Clone)]
pub struct FnKernel {
    name: String,
    attributes: KernelAttributes,
    body: Arc<KernelFn>,
}

impl FnKernel {
    /// Create a kernel from a closure.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&LaunchDims, &KernelArgs) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            attributes: KernelAttributes::default(),
            body: Arc::new(body),
        }
    }

    /// Override the reported attributes.
    pub fn with_attributes(mut self, attributes: KernelAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl Kernel for FnKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> KernelAttributes {
        self.attributes
    }

    fn run(&self, dims: &LaunchDims, args: &KernelArgs) -> Result<()> {
        (self.body)(dims, args)
    }
}

impl fmt::Debug for FnKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnKernel").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_dims_counts() {
        let dims = LaunchDims::new((2, 3, 1), (32, 2, 1));
        assert_eq!(dims.threads_per_block(), 64);
        assert_eq!(dims.block_count(), 6);
        assert_eq!(dims.total_threads(), 384);
        assert!(LaunchDims::linear(0, 32).is_empty());
    }

    #[test]
    fn missing_argument_is_invalid_value() {
        let args = KernelArgs::default();
        assert!(matches!(
            args.buffer(0),
            Err(OpGraphError::InvalidValue { .. })
        ));
    }

    #[test]
    fn fn_kernel_attributes() {
        let kernel = FnKernel::new("noop", |_, _| Ok(())).with_attributes(KernelAttributes {
            max_threads_per_block: 256,
            ..KernelAttributes::default()
        });
        assert_eq!(kernel.attributes().max_threads_per_block, 256);
        assert!(kernel.run(&LaunchDims::default(), &KernelArgs::default()).is_ok());
    }
}
