/// Scatter-gather list preparation and traversal.
///
/// A prepared request yields an [`SgCursor`] that hands out chunks of at
/// most a page, each physically addressable, in buffer order. The PRP
/// builder walks the cursor; sub-commands of a split request consume
/// consecutive stretches of the same cursor.
use alloc::vec::Vec;

use spin::{Mutex, MutexGuard};

use crate::command::NvmeError;
use crate::hal::{PhysAddr, Platform, PAGE_SIZE};
use crate::scsi::{BufDesc, RequestFlags, ScsiRequest};

/// One physically contiguous run of bytes.
#[derive(Debug, Clone, Copy)]
pub struct SgSegment {
    pub phys: PhysAddr,
    pub len: u32,
}

/// A scatter-gather list. The driver owns one pre-allocated list, reused
/// (under its lock) for requests that arrive without one.
pub struct SgList {
    segs: Vec<SgSegment>,
}

impl SgList {
    pub fn new() -> Self {
        Self { segs: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            segs: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.segs.clear();
    }

    pub fn push(&mut self, seg: SgSegment) {
        self.segs.push(seg);
    }

    pub fn segments(&self) -> &[SgSegment] {
        &self.segs
    }

    pub fn total_len(&self) -> u64 {
        self.segs.iter().map(|s| s.len as u64).sum()
    }

    pub fn cursor(&self) -> SgCursor<'_> {
        SgCursor {
            list: self,
            seg: 0,
            offset: 0,
        }
    }

    /// Fill the list from a virtual address range, translating page by
    /// page through `translate`.
    fn fill_from_virt(
        &mut self,
        virt: usize,
        len: u32,
        translate: impl Fn(usize) -> Option<PhysAddr>,
    ) -> Result<(), NvmeError> {
        self.segs.clear();
        let mut va = virt;
        let mut remaining = len as usize;
        while remaining > 0 {
            let chunk = remaining.min(PAGE_SIZE - (va & (PAGE_SIZE - 1)));
            let phys = translate(va).ok_or(NvmeError::SgTranslation)?;
            self.segs.push(SgSegment {
                phys,
                len: chunk as u32,
            });
            va += chunk;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Fill the list from a buffer descriptor's page array.
    fn fill_from_desc(&mut self, desc: &BufDesc) -> Result<(), NvmeError> {
        self.segs.clear();
        if desc.pages.is_null() {
            return Err(NvmeError::SgTranslation);
        }

        let pages = unsafe { core::slice::from_raw_parts(desc.pages, desc.page_count) };
        let mut remaining = desc.len as usize;
        let mut offset = desc.offset as usize;
        for &page in pages {
            if remaining == 0 {
                break;
            }
            let chunk = remaining.min(PAGE_SIZE - offset);
            self.segs.push(SgSegment {
                phys: page.add(offset as u64),
                len: chunk as u32,
            });
            remaining -= chunk;
            offset = 0;
        }

        if remaining > 0 {
            // Descriptor pages do not cover the stated length.
            return Err(NvmeError::SgTranslation);
        }
        Ok(())
    }
}

impl Default for SgList {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks an [`SgList`] in chunks of bounded size.
pub struct SgCursor<'a> {
    list: &'a SgList,
    seg: usize,
    offset: u32,
}

impl SgCursor<'_> {
    /// Fetch the next chunk of up to `max_len` bytes. `None` once the list
    /// is exhausted.
    pub fn next(&mut self, max_len: u32) -> Option<(PhysAddr, u32)> {
        let seg = self.list.segs.get(self.seg)?;
        let avail = seg.len - self.offset;
        let take = avail.min(max_len);
        let phys = seg.phys.add(self.offset as u64);

        if take == avail {
            self.seg += 1;
            self.offset = 0;
        } else {
            self.offset += take;
        }
        Some((phys, take))
    }
}

/// A prepared scatter-gather source for one request.
///
/// Requests that arrive without their own list borrow the driver's shared
/// list; the lock is held for the life of this value (across the PRP walk
/// of every sub-command) and released when it drops.
pub enum PreparedSg<'a> {
    /// No data transfer.
    None,
    /// Upstream-provided prebuilt list; used directly, no locking.
    External(*const SgList),
    /// Driver-owned shared list, locked.
    Shared(MutexGuard<'a, SgList>),
}

impl PreparedSg<'_> {
    /// The list to walk, if the request moves data.
    ///
    /// For `External`, the upstream guarantees the list outlives the
    /// request; the borrow is tied to this guard's lifetime.
    pub fn list(&self) -> Option<&SgList> {
        match self {
            PreparedSg::None => None,
            PreparedSg::External(list) => Some(unsafe { &**list }),
            PreparedSg::Shared(guard) => Some(&**guard),
        }
    }
}

/// Build the scatter-gather view of `req`'s data buffer.
///
/// Mode is selected by the request flags: a prebuilt list is used as-is;
/// the buffer-descriptor and virtual-address forms synthesize into the
/// shared list under its lock. Kernel- and user-virtual forms require
/// dword alignment of both pointer and length, and honor the flush flag
/// with write-back (outbound) or invalidate (inbound).
pub fn prepare<'a>(
    platform: &'static dyn Platform,
    shared: &'a Mutex<SgList>,
    req: &ScsiRequest,
) -> Result<PreparedSg<'a>, NvmeError> {
    if req.buffer_len == 0 {
        return Ok(PreparedSg::None);
    }

    if req.flags.contains(RequestFlags::PREBUILT_SG) {
        if req.sg_list.is_null() {
            log::warn!("nvme: prebuilt SG flag with no list");
            return Err(NvmeError::SgTranslation);
        }
        return Ok(PreparedSg::External(req.sg_list));
    }

    let mut list = shared.lock();

    if req.flags.contains(RequestFlags::MAP_BUFFER) {
        if req.buf_desc.is_null() {
            return Err(NvmeError::SgTranslation);
        }
        let desc = unsafe { &*req.buf_desc };
        if req.flags.contains(RequestFlags::FLUSH) && !desc.base.is_null() {
            if req.flags.contains(RequestFlags::DIR_IN) {
                platform.flush_for_cpu(desc.base, desc.len as usize);
            } else {
                platform.flush_for_device(desc.base, desc.len as usize);
            }
        }
        list.fill_from_desc(desc)?;
    } else if req
        .flags
        .intersects(RequestFlags::MAP_KERNEL | RequestFlags::MAP_USER)
    {
        let va = req.buffer as usize;
        if va & 0x3 != 0 || req.buffer_len & 0x3 != 0 {
            log::warn!(
                "nvme: buffer not dword-aligned (addr={:#x}, len={})",
                va,
                req.buffer_len
            );
            return Err(NvmeError::Misaligned);
        }

        if req.flags.contains(RequestFlags::FLUSH) {
            if req.flags.contains(RequestFlags::DIR_IN) {
                platform.flush_for_cpu(req.buffer, req.buffer_len as usize);
            } else {
                platform.flush_for_device(req.buffer, req.buffer_len as usize);
            }
        }

        if req.flags.contains(RequestFlags::MAP_USER) {
            list.fill_from_virt(va, req.buffer_len, |addr| platform.uvirt_to_phys(addr))?;
        } else {
            list.fill_from_virt(va, req.buffer_len, |addr| platform.kvirt_to_phys(addr))?;
        }
    } else {
        log::warn!(
            "nvme: no buffer mapping flag set (flags={:#x})",
            req.flags.bits()
        );
        return Err(NvmeError::SgTranslation);
    }

    Ok(PreparedSg::Shared(list))
}
