/// SCSI request contract, CDB translation, and sense data.
///
/// The upstream midlayer hands the driver a [`ScsiRequest`]; the driver
/// reads the CDB and buffer description, and writes status, residual,
/// sense bytes, and finally invokes the notify hook exactly once per
/// accepted request.
use bitflags::bitflags;

use crate::command::{status_code, status_type, NvmeError};
use crate::hal::PhysAddr;
use crate::sg::SgList;

bitflags! {
    /// Buffer mapping and transfer flags on an upstream request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestFlags: u32 {
        /// Transfer is device-to-host.
        const DIR_IN = 1 << 0;
        /// `buffer` is a kernel-virtual address.
        const MAP_KERNEL = 1 << 1;
        /// `buffer` is a user-virtual address (pinned by the upstream).
        const MAP_USER = 1 << 2;
        /// `buf_desc` describes the data (buffer-pointer form).
        const MAP_BUFFER = 1 << 3;
        /// `sg_list` points at a prebuilt scatter-gather list.
        const PREBUILT_SG = 1 << 4;
        /// Perform cache maintenance around the transfer.
        const FLUSH = 1 << 5;
        /// Ordered barrier: a flush is issued ahead of this command.
        const ORDERED = 1 << 6;
        /// Head-of-queue barrier, treated like ORDERED.
        const HEAD_OF_QUEUE = 1 << 7;
    }
}

/// Adapter-level outcome, distinct from the SCSI status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Good,
    /// The request itself was rejected or failed inside the adapter.
    RequestError,
    Timeout,
}

/// SCSI status byte values the driver produces.
pub mod scsi_status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
    pub const BUSY: u8 = 0x08;
}

/// Buffer-pointer form of a data buffer: the physical pages backing it,
/// plus the byte offset into the first page. `base` is the kernel mapping
/// when one exists (used for cache maintenance), else null.
pub struct BufDesc {
    pub pages: *const PhysAddr,
    pub page_count: usize,
    pub offset: u32,
    pub len: u32,
    pub base: *mut u8,
}

/// The fields of the upstream request this driver reads and writes.
pub struct ScsiRequest {
    // Read by the driver:
    pub cdb: [u8; 16],
    pub cdb_len: u8,
    pub flags: RequestFlags,
    pub buffer: *mut u8,
    pub buffer_len: u32,
    pub buf_desc: *const BufDesc,
    pub sg_list: *const SgList,
    pub sense: *mut u8,
    pub sense_len: u8,
    /// Completion hook; invoked exactly once with no driver locks held.
    pub notify: Option<fn(&mut ScsiRequest)>,
    /// Upstream's own cookie; the driver never touches it.
    pub context: usize,

    // Written by the driver:
    pub adapter_status: AdapterStatus,
    pub scsi_status: u8,
    pub resid: u32,
    pub sense_gotten: u8,
    /// Reserved for the adapter while the request is in flight; cleared
    /// before notify.
    pub driver_private: usize,
}

impl ScsiRequest {
    /// A zeroed request with no buffer. The upstream fills in what it uses.
    pub fn empty() -> Self {
        Self {
            cdb: [0; 16],
            cdb_len: 0,
            flags: RequestFlags::empty(),
            buffer: core::ptr::null_mut(),
            buffer_len: 0,
            buf_desc: core::ptr::null(),
            sg_list: core::ptr::null(),
            sense: core::ptr::null_mut(),
            sense_len: 0,
            notify: None,
            context: 0,
            adapter_status: AdapterStatus::Good,
            scsi_status: scsi_status::GOOD,
            resid: 0,
            sense_gotten: 0,
            driver_private: 0,
        }
    }
}

/// Success: GOOD status, nothing residual, no sense.
pub fn set_success(req: &mut ScsiRequest) {
    req.adapter_status = AdapterStatus::Good;
    req.scsi_status = scsi_status::GOOD;
    req.resid = 0;
    req.sense_gotten = 0;
}

/// Transient failure: BUSY, full residual, sense untouched.
pub fn set_busy(req: &mut ScsiRequest) {
    req.adapter_status = AdapterStatus::RequestError;
    req.scsi_status = scsi_status::BUSY;
    req.resid = req.buffer_len;
    req.sense_gotten = 0;
}

/// Adapter-internal hard failure without device sense.
pub fn set_adapter_error(req: &mut ScsiRequest) {
    req.adapter_status = AdapterStatus::RequestError;
    req.scsi_status = scsi_status::CHECK_CONDITION;
    req.resid = req.buffer_len;
    req.sense_gotten = 0;
}

/// CHECK CONDITION with fixed-format sense data.
///
/// Sense is written only when the upstream provided at least 18 bytes;
/// otherwise the sense length is zeroed and only the status reports the
/// failure.
pub fn set_sense(req: &mut ScsiRequest, key: u8, asc: u8, ascq: u8) {
    req.adapter_status = AdapterStatus::Good;
    req.scsi_status = scsi_status::CHECK_CONDITION;
    req.resid = req.buffer_len;

    if !req.sense.is_null() && req.sense_len >= 18 {
        unsafe {
            core::ptr::write_bytes(req.sense, 0, req.sense_len as usize);
            *req.sense = 0x70; // current error, fixed format
            *req.sense.add(2) = key;
            *req.sense.add(7) = 10; // additional sense length
            *req.sense.add(12) = asc;
            *req.sense.add(13) = ascq;
        }
        req.sense_gotten = 18;
    } else {
        req.sense_gotten = 0;
    }
}

/// Sense keys used by the status mapping.
pub mod sense_key {
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const HARDWARE_ERROR: u8 = 0x04;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const ABORTED_COMMAND: u8 = 0x0B;
}

/// Map an NVMe completion status to SCSI sense and write it to `req`.
/// The ASCQ defaults to the raw NVMe status code.
pub fn map_nvme_status(req: &mut ScsiRequest, sct: u8, sc: u8) {
    let (key, asc) = match sct {
        status_type::GENERIC => match sc {
            status_code::INVALID_OPCODE | status_code::INVALID_FIELD | status_code::INVALID_NS => {
                (sense_key::ILLEGAL_REQUEST, 0x20)
            }
            status_code::DATA_XFER_ERROR | status_code::INTERNAL => {
                (sense_key::HARDWARE_ERROR, 0x44)
            }
            status_code::LBA_RANGE => (sense_key::ILLEGAL_REQUEST, 0x21),
            _ => (sense_key::ABORTED_COMMAND, 0x00),
        },
        status_type::MEDIA => (sense_key::MEDIUM_ERROR, 0x11),
        // Command-specific and vendor types map coarsely.
        _ => (sense_key::ABORTED_COMMAND, 0x00),
    };

    set_sense(req, key, asc, sc);
}

/// SCSI CDB opcodes translated by this driver.
pub mod cdb_op {
    pub const READ_6: u8 = 0x08;
    pub const WRITE_6: u8 = 0x0A;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
    pub const READ_16: u8 = 0x88;
    pub const WRITE_16: u8 = 0x8A;
}

/// A parsed READ/WRITE CDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RwCdb {
    pub lba: u64,
    pub blocks: u32,
    pub is_write: bool,
}

/// Parse a READ/WRITE 6/10/16 CDB into LBA, block count, and direction.
///
/// READ(6)/WRITE(6) carry a 21-bit LBA and an 8-bit length where 0 means
/// 256 blocks.
pub fn parse_rw_cdb(cdb: &[u8; 16]) -> Result<RwCdb, NvmeError> {
    match cdb[0] {
        cdb_op::READ_6 | cdb_op::WRITE_6 => {
            let lba = ((cdb[1] as u64 & 0x1F) << 16) | ((cdb[2] as u64) << 8) | cdb[3] as u64;
            let blocks = match cdb[4] {
                0 => 256,
                n => n as u32,
            };
            Ok(RwCdb {
                lba,
                blocks,
                is_write: cdb[0] == cdb_op::WRITE_6,
            })
        }
        cdb_op::READ_10 | cdb_op::WRITE_10 => {
            let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]) as u64;
            let blocks = u16::from_be_bytes([cdb[7], cdb[8]]) as u32;
            Ok(RwCdb {
                lba,
                blocks,
                is_write: cdb[0] == cdb_op::WRITE_10,
            })
        }
        cdb_op::READ_16 | cdb_op::WRITE_16 => {
            let lba = u64::from_be_bytes([
                cdb[2], cdb[3], cdb[4], cdb[5], cdb[6], cdb[7], cdb[8], cdb[9],
            ]);
            let blocks = u32::from_be_bytes([cdb[10], cdb[11], cdb[12], cdb[13]]);
            Ok(RwCdb {
                lba,
                blocks,
                is_write: cdb[0] == cdb_op::WRITE_16,
            })
        }
        op => {
            log::warn!("nvme: unsupported CDB opcode {:#04x}", op);
            Err(NvmeError::UnsupportedOpcode(op))
        }
    }
}

/// Number of sub-commands a transfer of `total` blocks needs under
/// `max_blocks` per command.
pub fn split_count(total: u32, max_blocks: u32) -> u32 {
    total.div_ceil(max_blocks)
}

/// LBA and block count of sub-command `index` in a split sequence.
pub fn sub_command_range(rw: &RwCdb, index: u32, max_blocks: u32) -> (u64, u32) {
    let lba = rw.lba + index as u64 * max_blocks as u64;
    let remaining = rw.blocks - index * max_blocks;
    (lba, remaining.min(max_blocks))
}
