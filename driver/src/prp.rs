/// PRP construction for one sub-command.
///
/// NVMe PRP rules:
/// - transfer within one page: PRP1 only, PRP2 = 0
/// - transfer within two pages: PRP1 + PRP2 as direct addresses
/// - anything larger: PRP1 + PRP2 pointing at a PRP list
///
/// A list page holds `PAGE_SIZE / 8` entries; when another list page
/// follows, the last entry is the physical address of the next page, so a
/// chained page carries one fewer data pointer. List pages come from the
/// pool and are recorded against the sub-command's CID, which frees them
/// when that sub-command completes.
use core::ptr;

use crate::cid::CidTable;
use crate::command::{NvmeError, SubmissionEntry};
use crate::hal::{Platform, PAGE_SIZE};
use crate::prp_pool::PrpPool;
use crate::sg::SgCursor;

/// PRP entries per list page.
pub(crate) const LIST_ENTRIES: usize = PAGE_SIZE / 8;

/// Fill `cmd.prp1`/`cmd.prp2` for a sub-command of `len` bytes, consuming
/// chunks from `cursor`.
///
/// Pool exhaustion is transient ([`NvmeError::PrpExhausted`], upstream
/// BUSY); a cursor that runs dry or misshapen is a hard error
/// ([`NvmeError::SgTranslation`], upstream CHECK).
pub fn build_prps(
    platform: &'static dyn Platform,
    pool: &PrpPool,
    cids: &CidTable,
    cmd: &mut SubmissionEntry,
    cursor: &mut SgCursor<'_>,
    len: u32,
    cid: u16,
) -> Result<(), NvmeError> {
    cmd.prp1 = 0;
    cmd.prp2 = 0;

    let mut remaining = len;
    if remaining == 0 {
        return Ok(());
    }

    let fetch = remaining.min(PAGE_SIZE as u32);
    let (first, first_len) = cursor.next(fetch).ok_or(NvmeError::SgTranslation)?;
    cmd.prp1 = first.as_u64();
    remaining -= first_len;

    if remaining == 0 {
        return Ok(());
    }

    if remaining <= PAGE_SIZE as u32 {
        let (second, second_len) = cursor.next(remaining).ok_or(NvmeError::SgTranslation)?;
        if second_len < remaining {
            return Err(NvmeError::SgTranslation);
        }
        cmd.prp2 = second.as_u64();
        return Ok(());
    }

    // PRP list path.
    let mut list_ptr: *mut u64 = ptr::null_mut();
    let mut entry = LIST_ENTRIES - 1; // force allocation on first pass
    let mut pages = 0usize;

    while remaining > 0 {
        let fetch = remaining.min(PAGE_SIZE as u32);
        let (phys, chunk_len) = cursor.next(fetch).ok_or(NvmeError::SgTranslation)?;

        if entry >= LIST_ENTRIES - 1 {
            let index = match pool.alloc() {
                Some(index) => index,
                None => {
                    log::warn!("nvme: PRP pool exhausted building CID {}", cid);
                    return Err(NvmeError::PrpExhausted);
                }
            };
            if let Err(e) = cids.attach_prp(cid, index) {
                pool.free(index);
                return Err(e);
            }

            let page_phys = pool.page_phys(index);
            if pages == 0 {
                cmd.prp2 = page_phys.as_u64();
            } else {
                // Chain from the previous page's last slot.
                unsafe {
                    ptr::write_volatile(list_ptr.add(LIST_ENTRIES - 1), page_phys.as_u64())
                };
                platform.flush_for_device(list_ptr as *const u8, PAGE_SIZE);
            }

            list_ptr = pool.page_ptr(index) as *mut u64;
            entry = 0;
            pages += 1;
        }

        unsafe { ptr::write_volatile(list_ptr.add(entry), phys.as_u64()) };
        entry += 1;
        remaining -= chunk_len;
    }

    platform.flush_for_device(list_ptr as *const u8, entry * 8);
    Ok(())
}
