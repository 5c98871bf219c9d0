//! Device buffer handles.

use super::MemoryKind;
use crate::error::{OpGraphError, Result};
use crate::types::BufferId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Backing storage shared by every handle to one allocation.
struct Storage {
    bytes: Mutex<Vec<u8>>,
    live: AtomicBool,
}

/// A handle to one device allocation.
///
/// Handles are cheap to clone; all clones refer to the same bytes. Once the
/// allocation is freed every handle reports [`is_live`](Self::is_live) as
/// `false` and byte access fails with [`OpGraphError::ResourceStale`].
#[derive(Clone)]
pub struct DeviceBuffer {
    id: BufferId,
    size: u64,
    kind: MemoryKind,
    base_address: u64,
    storage: Arc<Storage>,
}

impl DeviceBuffer {
    /// Create a zero-initialized buffer.
    pub fn new(id: BufferId, size: u64, kind: MemoryKind, base_address: u64) -> Self {
        Self {
            id,
            size,
            kind,
            base_address,
            storage: Arc::new(Storage {
                bytes: Mutex::new(vec![0u8; size as usize]),
                live: AtomicBool::new(true),
            }),
        }
    }

    /// The buffer's identifier.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Memory kind the buffer was allocated with.
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Simulated device address of the first byte.
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Whether the allocation has not been freed.
    pub fn is_live(&self) -> bool {
        self.storage.live.load(Ordering::Acquire)
    }

    /// Mark the allocation as freed. All handles observe the change.
    pub(crate) fn release(&self) {
        self.storage.live.store(false, Ordering::Release);
        self.storage.bytes.lock().clear();
    }

    /// Check that `[offset, offset + len)` lies within the buffer.
    pub fn check_range(&self, operation: &str, offset: u64, len: u64) -> Result<()> {
        let end = offset.checked_add(len);
        match end {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(OpGraphError::InvalidValue {
                operation: operation.to_string(),
                cause: format!(
                    "range {}..{} exceeds {} of {} bytes",
                    offset,
                    offset.saturating_add(len),
                    self.id,
                    self.size
                ),
            }),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(OpGraphError::ResourceStale { buffer: self.id })
        }
    }

    /// Run `f` with shared access to the buffer's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.ensure_live()?;
        let bytes = self.storage.bytes.lock();
        Ok(f(&bytes))
    }

    /// Run `f` with exclusive access to the buffer's bytes.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.ensure_live()?;
        let mut bytes = self.storage.bytes.lock();
        Ok(f(&mut bytes))
    }

    /// Copy `len` bytes starting at `offset` out of the buffer.
    pub fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.check_range("read", offset, len)?;
        self.with_bytes(|bytes| bytes[offset as usize..(offset + len) as usize].to_vec())
    }

    /// Copy the whole buffer out.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.with_bytes(|bytes| bytes.to_vec())
    }

    /// Write `data` at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_range("write", offset, data.len() as u64)?;
        self.with_bytes_mut(|bytes| {
            bytes[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        })
    }

    /// Set `len` bytes starting at `offset` to `value`.
    pub fn fill(&self, offset: u64, len: u64, value: u8) -> Result<()> {
        self.check_range("fill", offset, len)?;
        self.with_bytes_mut(|bytes| {
            bytes[offset as usize..(offset + len) as usize].fill(value);
        })
    }

    /// Store one `f32` at element `index` (native endianness).
    pub fn write_f32(&self, index: usize, value: f32) -> Result<()> {
        self.write((index * 4) as u64, &value.to_ne_bytes())
    }

    /// Read the buffer as a sequence of `f32` values.
    pub fn read_f32s(&self) -> Result<Vec<f32>> {
        self.with_bytes(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect()
        })
    }

    /// Whether two handles refer to the same allocation.
    pub fn same_allocation(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("kind", &self.kind)
            .field("base_address", &format_args!("{:#x}", self.base_address))
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(size: u64) -> DeviceBuffer {
        DeviceBuffer::new(BufferId::next(), size, MemoryKind::Device, 0x1000)
    }

    #[test]
    fn fill_and_read() {
        let buf = buffer(16);
        buf.fill(4, 8, 0xAB).unwrap();
        let bytes = buf.to_vec().unwrap();
        assert_eq!(bytes[3], 0);
        assert_eq!(bytes[4], 0xAB);
        assert_eq!(bytes[11], 0xAB);
        assert_eq!(bytes[12], 0);
    }

    #[test]
    fn out_of_range_is_invalid_value() {
        let buf = buffer(8);
        let err = buf.fill(4, 8, 1).unwrap_err();
        assert!(matches!(err, OpGraphError::InvalidValue { .. }));
        assert!(buf.check_range("fill", u64::MAX, 2).is_err());
    }

    #[test]
    fn released_buffer_is_stale_for_all_clones() {
        let buf = buffer(8);
        let clone = buf.clone();
        buf.release();
        assert!(!clone.is_live());
        assert_eq!(
            clone.to_vec().unwrap_err(),
            OpGraphError::ResourceStale { buffer: buf.id() }
        );
    }

    #[test]
    fn f32_round_trip() {
        let buf = buffer(8);
        buf.write_f32(1, 1.0).unwrap();
        assert_eq!(buf.read_f32s().unwrap(), vec![0.0, 1.0]);
    }
}
