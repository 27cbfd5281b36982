/// Fixed pool of DMA pages for multi-page PRP lists.
///
/// One contiguous uncached allocation carved into page-sized slots, with a
/// 64-bit bitmap tracking ownership: bit set = free, bit clear = owned by
/// exactly one in-flight CID.
use spin::Mutex;

use crate::command::NvmeError;
use crate::hal::{PhysAddr, Platform, PAGE_SIZE};
use crate::mem::DmaBuf;

/// Pool size in pages. A `u64` bitmap word covers the whole pool.
pub const PRP_POOL_PAGES: usize = 64;

pub struct PrpPool {
    pages: DmaBuf,
    bitmap: Mutex<u64>,
}

impl PrpPool {
    pub fn new(platform: &'static dyn Platform) -> Result<Self, NvmeError> {
        let mut pages = DmaBuf::alloc(platform, PRP_POOL_PAGES * PAGE_SIZE)?;
        pages.clear();

        Ok(Self {
            pages,
            bitmap: Mutex::new(u64::MAX),
        })
    }

    /// Take the first free page. `None` means the pool is exhausted, a
    /// transient condition; the caller surfaces BUSY upstream.
    pub fn alloc(&self) -> Option<u8> {
        let mut bitmap = self.bitmap.lock();
        if *bitmap == 0 {
            return None;
        }
        let index = bitmap.trailing_zeros() as u8;
        *bitmap &= !(1u64 << index);
        Some(index)
    }

    /// Return a page to the pool. Double-free is a programming error and
    /// is reported, not tolerated.
    pub fn free(&self, index: u8) {
        debug_assert!((index as usize) < PRP_POOL_PAGES);
        let mut bitmap = self.bitmap.lock();
        let mask = 1u64 << index;
        if *bitmap & mask != 0 {
            log::warn!("nvme: PRP pool double free of page {}", index);
        }
        *bitmap |= mask;
    }

    pub fn page_phys(&self, index: u8) -> PhysAddr {
        self.pages.phys_addr().add(index as u64 * PAGE_SIZE as u64)
    }

    pub fn page_ptr(&self, index: u8) -> *mut u8 {
        unsafe { self.pages.as_mut_ptr().add(index as usize * PAGE_SIZE) }
    }

    /// Free pages remaining.
    pub fn free_count(&self) -> u32 {
        self.bitmap.lock().count_ones()
    }
}
