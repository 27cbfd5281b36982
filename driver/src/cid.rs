/// Command identifier table.
///
/// Maps each in-flight I/O CID to its upstream request and the PRP list
/// pages that sub-command owns. A request split over K sub-commands holds
/// K CIDs referencing one group; the group's refcount gates the single
/// upstream notification.
///
/// The refcount lives here, in a driver-owned group table, so the upstream
/// request type stays opaque to the driver.
use spin::Mutex;

use crate::command::NvmeError;
use crate::prp_pool::PrpPool;
use crate::scsi::ScsiRequest;

/// I/O CID range is 0..IO_CID_COUNT; reserved CIDs live above it.
pub const IO_CID_COUNT: usize = 256;

/// Maximum PRP list pages a single sub-command may own: enough for a
/// maximally fragmented transfer at the 16-bit block-count cap with
/// 512-byte blocks (one list entry per data page, 511 entries per
/// chained page). The transfer-limit derivation keeps every sub-command
/// within what these pages can scatter.
pub const MAX_PRPS_PER_CMD: usize = 17;

const BITMAP_WORDS: usize = IO_CID_COUNT / 32;

#[derive(Clone, Copy)]
struct Slot {
    group: u16,
    prps: [Option<u8>; MAX_PRPS_PER_CMD],
}

const EMPTY_SLOT: Slot = Slot {
    group: 0,
    prps: [None; MAX_PRPS_PER_CMD],
};

#[derive(Clone, Copy)]
struct Group {
    req: *mut ScsiRequest,
    /// Outstanding sub-commands. Zero means the group slot is free.
    refcount: u16,
    /// Set when the submit path abandoned part of the split sequence;
    /// the final completion then reports BUSY instead of the device status.
    abandoned: bool,
}

const EMPTY_GROUP: Group = Group {
    req: core::ptr::null_mut(),
    refcount: 0,
    abandoned: false,
};

struct Inner {
    /// 1 = occupied, 0 = free.
    bitmap: [u32; BITMAP_WORDS],
    slots: [Slot; IO_CID_COUNT],
    groups: [Group; IO_CID_COUNT],
}

pub struct CidTable {
    inner: Mutex<Inner>,
}

/// Outcome of completing one CID.
pub enum Completion {
    /// The CID was not allocated; no state was changed.
    Spurious,
    /// Other sub-commands of the same request remain in flight.
    Pending,
    /// Final sub-command of the request.
    Done {
        req: *mut ScsiRequest,
        abandoned: bool,
    },
}

// Raw request pointers are opaque tokens here; the table never dereferences
// them. All state sits behind the mutex.
unsafe impl Send for CidTable {}
unsafe impl Sync for CidTable {}

impl CidTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                bitmap: [0; BITMAP_WORDS],
                slots: [EMPTY_SLOT; IO_CID_COUNT],
                groups: [EMPTY_GROUP; IO_CID_COUNT],
            }),
        }
    }

    /// Reserve `count` CIDs for `req`, all or nothing, writing them to
    /// `out[..count]`. The CIDs share one group with refcount `count`.
    pub fn alloc(
        &self,
        req: *mut ScsiRequest,
        count: usize,
        out: &mut [u16],
    ) -> Result<(), NvmeError> {
        assert!(count > 0 && count <= out.len());

        let mut inner = self.inner.lock();

        let Some(gid) = inner.groups.iter().position(|g| g.refcount == 0) else {
            return Err(NvmeError::CidExhausted);
        };

        // Gather free CIDs first; commit only if all were found.
        let mut found = 0;
        'scan: for word_idx in 0..BITMAP_WORDS {
            let word = inner.bitmap[word_idx];
            if word == u32::MAX {
                continue;
            }
            for bit_idx in 0..32 {
                if word & (1 << bit_idx) == 0 {
                    out[found] = (word_idx * 32 + bit_idx) as u16;
                    found += 1;
                    if found == count {
                        break 'scan;
                    }
                }
            }
        }

        if found < count {
            log::warn!(
                "nvme: CID allocation short (requested {}, found {})",
                count,
                found
            );
            return Err(NvmeError::CidExhausted);
        }

        for &cid in &out[..count] {
            inner.bitmap[cid as usize / 32] |= 1 << (cid % 32);
            inner.slots[cid as usize] = Slot {
                group: gid as u16,
                prps: [None; MAX_PRPS_PER_CMD],
            };
        }
        inner.groups[gid] = Group {
            req,
            refcount: count as u16,
            abandoned: false,
        };

        Ok(())
    }

    /// Record ownership of one PRP pool page by `cid`.
    pub fn attach_prp(&self, cid: u16, pool_index: u8) -> Result<(), NvmeError> {
        let mut inner = self.inner.lock();
        debug_assert!(inner.bitmap[cid as usize / 32] & (1 << (cid % 32)) != 0);

        let slot = &mut inner.slots[cid as usize];
        match slot.prps.iter_mut().find(|p| p.is_none()) {
            Some(entry) => {
                *entry = Some(pool_index);
                Ok(())
            }
            None => Err(NvmeError::PrpOverflow),
        }
    }

    /// Release `cid`: free its PRP pages back to `pool`, clear the slot,
    /// and decrement the group refcount. Yields the upstream request only
    /// when the last sub-command of the group completes.
    pub fn complete(&self, cid: u16, pool: &PrpPool) -> Completion {
        if cid as usize >= IO_CID_COUNT {
            log::warn!("nvme: completion for out-of-range CID {}", cid);
            return Completion::Spurious;
        }

        let (prps, result) = {
            let mut inner = self.inner.lock();
            let mask = 1u32 << (cid % 32);
            if inner.bitmap[cid as usize / 32] & mask == 0 {
                log::warn!("nvme: spurious completion for CID {}", cid);
                return Completion::Spurious;
            }

            let slot = inner.slots[cid as usize];
            inner.slots[cid as usize] = EMPTY_SLOT;
            inner.bitmap[cid as usize / 32] &= !mask;

            let group = &mut inner.groups[slot.group as usize];
            group.refcount -= 1;
            let result = if group.refcount == 0 {
                let done = Completion::Done {
                    req: group.req,
                    abandoned: group.abandoned,
                };
                *group = EMPTY_GROUP;
                done
            } else {
                Completion::Pending
            };

            (slot.prps, result)
        };

        // PRP pool lock taken after the table lock is released; the
        // completion path never nests the two.
        for index in prps.into_iter().flatten() {
            pool.free(index);
        }

        result
    }

    /// Unwind CIDs whose sub-commands were never submitted, after a
    /// mid-sequence submit failure. Marks the group so the eventual final
    /// completion reports BUSY. Returns the request if the unwind itself
    /// dropped the refcount to zero (nothing remains in flight).
    pub fn abandon(&self, cids: &[u16], pool: &PrpPool) -> Option<*mut ScsiRequest> {
        if let Some(&first) = cids.first() {
            let mut inner = self.inner.lock();
            let gid = inner.slots[first as usize].group;
            inner.groups[gid as usize].abandoned = true;
        }

        let mut finished = None;
        for &cid in cids {
            if let Completion::Done { req, .. } = self.complete(cid, pool) {
                finished = Some(req);
            }
        }
        finished
    }

    /// Occupied CID count (diagnostics and invariant checks).
    pub fn in_flight(&self) -> usize {
        let inner = self.inner.lock();
        inner.bitmap.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl Default for CidTable {
    fn default() -> Self {
        Self::new()
    }
}
