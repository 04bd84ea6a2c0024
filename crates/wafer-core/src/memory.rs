//! Device-resident buffers of `f32`.
//!
//! Cells are stored as raw bit patterns in `AtomicU32`, so host threads
//! and worker lanes can touch a buffer without locking. Individual loads
//! and stores are relaxed; ordering between kernel writes and host reads
//! comes from the queue's synchronization points, never from the cells
//! themselves. Allocations count against the owning device's memory
//! budget and release it on drop of the last handle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::device::{Device, DeviceShared};
use crate::error::DeviceError;

const BYTES_PER_ELEM: usize = 4;

struct BufInner {
    cells: Box<[AtomicU32]>,
    device: Arc<DeviceShared>,
}

impl Drop for BufInner {
    fn drop(&mut self) {
        let bytes = self.cells.len() * BYTES_PER_ELEM;
        self.device.mem_used.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// Handle to a device allocation. Clones share the same cells; the
/// allocation is released when the last handle drops.
#[derive(Clone)]
pub struct DeviceBuffer {
    inner: Arc<BufInner>,
}

impl DeviceBuffer {
    /// Allocate `len` zeroed elements on `device`.
    pub fn alloc(device: &Device, len: usize) -> Result<Self, DeviceError> {
        let shared = Arc::clone(device.shared());
        let capacity = shared.config.memory_bytes;
        let bytes = len.checked_mul(BYTES_PER_ELEM).ok_or_else(|| {
            DeviceError::OutOfMemory {
                requested: usize::MAX,
                available: capacity.saturating_sub(shared.mem_used.load(Ordering::Relaxed)),
            }
        })?;

        let prev = shared.mem_used.fetch_add(bytes, Ordering::Relaxed);
        if prev.saturating_add(bytes) > capacity {
            shared.mem_used.fetch_sub(bytes, Ordering::Relaxed);
            return Err(DeviceError::OutOfMemory {
                requested: bytes,
                available: capacity.saturating_sub(prev),
            });
        }

        let cells: Box<[AtomicU32]> = (0..len).map(|_| AtomicU32::new(0)).collect();
        trace!(device = shared.id, len, bytes, "buffer allocated");
        Ok(Self {
            inner: Arc::new(BufInner { cells, device: shared }),
        })
    }

    /// Allocate and fill from a host slice in one step.
    pub fn from_host(device: &Device, data: &[f32]) -> Result<Self, DeviceError> {
        let buf = Self::alloc(device, data.len())?;
        buf.copy_from_host(data)?;
        Ok(buf)
    }

    /// Copy a host slice into the buffer. Lengths must match exactly.
    pub fn copy_from_host(&self, data: &[f32]) -> Result<(), DeviceError> {
        if data.len() != self.len() {
            return Err(DeviceError::TransferSize {
                expected: self.len(),
                got: data.len(),
            });
        }
        for (cell, &v) in self.inner.cells.iter().zip(data) {
            cell.store(v.to_bits(), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy the buffer back to the host.
    ///
    /// Call [`synchronize`](crate::queue::DeviceQueue::synchronize) first
    /// if a kernel writing this buffer may still be in flight.
    pub fn to_host(&self) -> Vec<f32> {
        self.inner
            .cells
            .iter()
            .map(|c| f32::from_bits(c.load(Ordering::Relaxed)))
            .collect()
    }

    /// Number of `f32` elements.
    pub fn len(&self) -> usize {
        self.inner.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.cells.is_empty()
    }

    /// Allocation size in bytes.
    pub fn byte_size(&self) -> usize {
        self.len() * BYTES_PER_ELEM
    }

    /// Identifier of the device this buffer lives on.
    pub fn device_id(&self) -> usize {
        self.inner.device.id
    }

    /// True when this is the only handle to the allocation.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    pub(crate) fn cell(&self, index: usize) -> Option<&AtomicU32> {
        self.inner.cells.get(index)
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device_id())
            .field("len", &self.len())
            .finish()
    }
}
