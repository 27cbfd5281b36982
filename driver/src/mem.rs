/// DMA-safe buffer type.
///
/// Wraps a platform page allocation. Guarantees:
/// - Physically contiguous memory
/// - Known physical address (for PRP entries and queue base registers)
/// - Uncached mapping, so the controller and CPU agree without snooping
use core::ptr;
use core::slice;

use crate::hal::{AllocError, DmaRegion, PhysAddr, Platform, PAGE_SIZE};

/// A DMA buffer backed by physically contiguous uncached pages.
pub struct DmaBuf {
    region: DmaRegion,
    len: usize,
    platform: &'static dyn Platform,
}

impl DmaBuf {
    /// Allocate a DMA buffer of at least `size` bytes.
    /// Actual allocation is rounded up to the next page boundary.
    pub fn alloc(platform: &'static dyn Platform, size: usize) -> Result<Self, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }

        let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
        let region = platform.alloc_dma_pages(pages)?;

        Ok(Self {
            region,
            len: size,
            platform,
        })
    }

    /// Physical base address of the buffer.
    #[inline]
    pub fn phys_addr(&self) -> PhysAddr {
        self.region.phys
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.region.virt.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.region.virt.as_ptr()
    }

    /// Usable length in bytes (may be less than allocated pages).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }

    /// Zero the whole buffer.
    pub fn clear(&mut self) {
        unsafe {
            ptr::write_bytes(self.as_mut_ptr(), 0, self.len);
        }
    }

    /// Copy `data` into the buffer at offset 0.
    pub fn copy_from_slice(&mut self, data: &[u8]) {
        assert!(data.len() <= self.len, "data exceeds DMA buffer capacity");
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.as_mut_ptr(), data.len());
        }
    }

    /// Write back the buffer for the device.
    pub fn flush_for_device(&self) {
        self.platform.flush_for_device(self.as_ptr(), self.len);
    }

    /// Invalidate the buffer after the device wrote it.
    pub fn flush_for_cpu(&self) {
        self.platform.flush_for_cpu(self.as_ptr(), self.len);
    }
}

impl Drop for DmaBuf {
    fn drop(&mut self) {
        unsafe { self.platform.free_dma_pages(&self.region) };
    }
}

// DmaBuf is Send but NOT Sync: one owner at a time. The queue pair wraps
// its buffers in locks of its own.
unsafe impl Send for DmaBuf {}
