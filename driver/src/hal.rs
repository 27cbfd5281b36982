/// Platform services the embedding kernel provides to the driver.
///
/// The controller core is portable; everything machine-specific enters
/// through the [`Platform`] trait: uncached DMA page allocation, cache
/// maintenance for non-coherent DMA, posted-MMIO draining, address
/// translation for scatter-gather building, and a busy-wait delay used by
/// the polled bring-up path. Cache-coherent platforms implement the flush
/// hooks as no-ops.
use core::fmt;
use core::ptr::NonNull;

/// NVMe memory page size used by this driver (CC.MPS = 0).
pub const PAGE_SIZE: usize = 4096;

/// A physical (bus) address as programmed into PRP entries and queue
/// base registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysAddr(u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// DMA allocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Zero-length or otherwise invalid request.
    InvalidSize,
    /// The platform could not supply contiguous pages.
    NoMemory,
}

/// A run of physically contiguous, uncached pages handed out by the
/// platform. `virt` is the kernel mapping, `phys` the bus address the
/// controller DMAs through.
pub struct DmaRegion {
    pub virt: NonNull<u8>,
    pub phys: PhysAddr,
    pub pages: usize,
}

/// Machine services supplied by the embedding kernel.
///
/// One implementation per platform; the driver holds a `&'static dyn`
/// reference threaded through every structure that touches DMA memory
/// or MMIO ordering.
pub trait Platform: Send + Sync {
    /// Allocate `pages` physically contiguous, uncached pages, zeroed.
    fn alloc_dma_pages(&self, pages: usize) -> Result<DmaRegion, AllocError>;

    /// Return a region obtained from [`Platform::alloc_dma_pages`].
    ///
    /// # Safety
    /// The region must not be referenced afterwards, by the CPU or the
    /// device.
    unsafe fn free_dma_pages(&self, region: &DmaRegion);

    /// Write back (and invalidate) CPU cache lines covering `[virt, virt+len)`
    /// so the device observes CPU writes. No-op on coherent platforms.
    fn flush_for_device(&self, virt: *const u8, len: usize);

    /// Invalidate CPU cache lines covering `[virt, virt+len)` so the CPU
    /// observes device writes. No-op on coherent platforms.
    fn flush_for_cpu(&self, virt: *const u8, len: usize);

    /// Drain posted MMIO writes. Bridges that buffer writes must not let a
    /// doorbell linger behind this call.
    fn flush_posted_writes(&self);

    /// Translate a kernel-virtual address to its physical address, or
    /// `None` if the address is not mapped.
    fn kvirt_to_phys(&self, virt: usize) -> Option<PhysAddr>;

    /// Translate a user-virtual address (pinned by the upstream layer) to
    /// its physical address.
    fn uvirt_to_phys(&self, virt: usize) -> Option<PhysAddr>;

    /// Busy-wait for at least `us` microseconds. Only used on polled
    /// paths (bring-up, quiesce).
    fn delay_us(&self, us: u64);
}
