/// NVMe command and completion wire formats, opcodes, and errors.
///
/// Per NVMe spec 1.x:
/// - Submission Queue Entry (SQE): 64 bytes
/// - Completion Queue Entry (CQE): 16 bytes
/// All fields little-endian as the controller reads them.
use core::fmt;

use crate::hal::PhysAddr;

/// NVMe admin command opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOpcode {
    DeleteIoSq = 0x00,
    CreateIoSq = 0x01,
    DeleteIoCq = 0x04,
    CreateIoCq = 0x05,
    Identify = 0x06,
}

/// NVMe NVM I/O command opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmOpcode {
    Flush = 0x00,
    Write = 0x01,
    Read = 0x02,
}

/// Identify CNS values (CDW10).
pub const CNS_NAMESPACE: u32 = 0x00;
pub const CNS_CONTROLLER: u32 = 0x01;

/// Reserved admin CIDs. Each admin command kind carries a fixed CID so the
/// admin completion dispatcher can switch on it.
pub mod admin_cid {
    pub const IDENTIFY_CONTROLLER: u16 = 0x01;
    pub const IDENTIFY_NAMESPACE: u16 = 0x02;
    pub const CREATE_CQ: u16 = 0x03;
    pub const CREATE_SQ: u16 = 0x04;
    pub const DELETE_SQ: u16 = 0x05;
    pub const DELETE_CQ: u16 = 0x06;
}

/// Reserved I/O CID for barrier flushes not bound to any upstream request.
/// Lies above the allocatable I/O CID range (0..256).
pub const IO_CID_FLUSH: u16 = 0x100;

/// CREATE_CQ / CREATE_SQ CDW11 flag bits.
pub const QUEUE_PHYS_CONTIG: u32 = 1 << 0;
pub const QUEUE_IRQ_ENABLED: u32 = 1 << 1;

/// Generic status codes (SCT 0) this driver interprets.
pub mod status_code {
    pub const SUCCESS: u8 = 0x00;
    pub const INVALID_OPCODE: u8 = 0x01;
    pub const INVALID_FIELD: u8 = 0x02;
    pub const DATA_XFER_ERROR: u8 = 0x04;
    pub const INTERNAL: u8 = 0x06;
    pub const INVALID_NS: u8 = 0x0B;
    pub const LBA_RANGE: u8 = 0x80;
}

/// Status code types (CQE DW3 bits 27:25).
pub mod status_type {
    pub const GENERIC: u8 = 0;
    pub const COMMAND_SPECIFIC: u8 = 1;
    pub const MEDIA: u8 = 2;
}

/// NVMe Submission Queue Entry — 64 bytes, on-wire layout.
#[repr(C, align(64))]
#[derive(Clone, Copy)]
pub struct SubmissionEntry {
    /// Command Dword 0: Opcode[7:0], FUSE[9:8], PSDT[15:14], CID[31:16]
    pub cdw0: u32,
    /// Namespace Identifier
    pub nsid: u32,
    /// Reserved
    pub cdw2: u32,
    pub cdw3: u32,
    /// Metadata Pointer
    pub mptr: u64,
    /// PRP Entry 1
    pub prp1: u64,
    /// PRP Entry 2 or PRP List Pointer
    pub prp2: u64,
    /// Command-specific Dwords 10-15
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<SubmissionEntry>(), 64);

impl SubmissionEntry {
    pub const fn zeroed() -> Self {
        Self {
            cdw0: 0,
            nsid: 0,
            cdw2: 0,
            cdw3: 0,
            mptr: 0,
            prp1: 0,
            prp2: 0,
            cdw10: 0,
            cdw11: 0,
            cdw12: 0,
            cdw13: 0,
            cdw14: 0,
            cdw15: 0,
        }
    }

    /// CID carried in CDW0 bits 31:16.
    pub fn cid(&self) -> u16 {
        (self.cdw0 >> 16) as u16
    }

    pub fn opcode(&self) -> u8 {
        self.cdw0 as u8
    }

    /// Stamp the CID into CDW0.
    pub fn set_cid(&mut self, cid: u16) {
        self.cdw0 = (self.cdw0 & 0xFFFF) | ((cid as u32) << 16);
    }

    /// Identify command (admin opcode 0x06) with its reserved CID.
    /// `cns`: [`CNS_NAMESPACE`] or [`CNS_CONTROLLER`].
    pub fn identify(nsid: u32, cns: u32, cid: u16, data_phys: PhysAddr) -> Self {
        Self {
            cdw0: AdminOpcode::Identify as u32 | ((cid as u32) << 16),
            nsid,
            prp1: data_phys.as_u64(),
            cdw10: cns,
            ..Self::zeroed()
        }
    }

    /// Create I/O Completion Queue (admin opcode 0x05).
    ///
    /// `size` is the entry count; the wire field is 0-based. `vector` is the
    /// interrupt vector the completion queue raises.
    pub fn create_io_cq(qid: u16, size: u16, cq_phys: PhysAddr, vector: u16) -> Self {
        Self {
            cdw0: AdminOpcode::CreateIoCq as u32 | ((admin_cid::CREATE_CQ as u32) << 16),
            prp1: cq_phys.as_u64(),
            // CDW10: QSIZE[31:16] (0-based) | QID[15:0]
            cdw10: ((size as u32 - 1) << 16) | qid as u32,
            cdw11: QUEUE_PHYS_CONTIG | QUEUE_IRQ_ENABLED | ((vector as u32) << 16),
            ..Self::zeroed()
        }
    }

    /// Create I/O Submission Queue (admin opcode 0x01) bound to `cqid`.
    pub fn create_io_sq(qid: u16, size: u16, sq_phys: PhysAddr, cqid: u16) -> Self {
        Self {
            cdw0: AdminOpcode::CreateIoSq as u32 | ((admin_cid::CREATE_SQ as u32) << 16),
            prp1: sq_phys.as_u64(),
            cdw10: ((size as u32 - 1) << 16) | qid as u32,
            // CDW11: CQID[31:16] | QPRIO=0 | PC=1
            cdw11: QUEUE_PHYS_CONTIG | ((cqid as u32) << 16),
            ..Self::zeroed()
        }
    }

    /// Delete I/O Submission Queue (admin opcode 0x00).
    pub fn delete_io_sq(qid: u16) -> Self {
        Self {
            cdw0: AdminOpcode::DeleteIoSq as u32 | ((admin_cid::DELETE_SQ as u32) << 16),
            cdw10: qid as u32,
            ..Self::zeroed()
        }
    }

    /// Delete I/O Completion Queue (admin opcode 0x04).
    pub fn delete_io_cq(qid: u16) -> Self {
        Self {
            cdw0: AdminOpcode::DeleteIoCq as u32 | ((admin_cid::DELETE_CQ as u32) << 16),
            cdw10: qid as u32,
            ..Self::zeroed()
        }
    }

    /// NVM Read command (I/O opcode 0x02). `nlb0` is the 0-based block count.
    pub fn read(nsid: u32, lba: u64, nlb0: u16) -> Self {
        Self {
            cdw0: NvmOpcode::Read as u32,
            nsid,
            cdw10: lba as u32,
            cdw11: (lba >> 32) as u32,
            cdw12: nlb0 as u32,
            ..Self::zeroed()
        }
    }

    /// NVM Write command (I/O opcode 0x01). `nlb0` is the 0-based block count.
    pub fn write(nsid: u32, lba: u64, nlb0: u16) -> Self {
        Self {
            cdw0: NvmOpcode::Write as u32,
            nsid,
            cdw10: lba as u32,
            cdw11: (lba >> 32) as u32,
            cdw12: nlb0 as u32,
            ..Self::zeroed()
        }
    }

    /// NVM Flush command (I/O opcode 0x00).
    pub fn flush(nsid: u32, cid: u16) -> Self {
        Self {
            cdw0: NvmOpcode::Flush as u32 | ((cid as u32) << 16),
            nsid,
            ..Self::zeroed()
        }
    }
}

/// NVMe Completion Queue Entry — 16 bytes.
///
/// DW2: SQ Head[15:0] | SQ ID[31:16].
/// DW3: CID[15:0] | Phase[16] | Status Code[23:17] | Status Type[27:25] |
/// More[30] | DNR[31].
#[repr(C, align(16))]
#[derive(Clone, Copy)]
pub struct CompletionEntry {
    pub dw0: u32,
    pub dw1: u32,
    pub dw2: u32,
    pub dw3: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<CompletionEntry>(), 16);

impl CompletionEntry {
    pub const fn zeroed() -> Self {
        Self {
            dw0: 0,
            dw1: 0,
            dw2: 0,
            dw3: 0,
        }
    }

    /// SQ head pointer consumed by the controller.
    pub fn sq_head(&self) -> u16 {
        self.dw2 as u16
    }

    pub fn sq_id(&self) -> u16 {
        (self.dw2 >> 16) as u16
    }

    pub fn cid(&self) -> u16 {
        self.dw3 as u16
    }

    pub fn phase(&self) -> u32 {
        (self.dw3 >> 16) & 1
    }

    pub fn status_code(&self) -> u8 {
        ((self.dw3 >> 17) & 0x7F) as u8
    }

    pub fn status_type(&self) -> u8 {
        ((self.dw3 >> 25) & 0x7) as u8
    }

    pub fn more(&self) -> bool {
        self.dw3 & (1 << 30) != 0
    }

    pub fn do_not_retry(&self) -> bool {
        self.dw3 & (1 << 31) != 0
    }

    pub fn is_success(&self) -> bool {
        self.status_type() == status_type::GENERIC && self.status_code() == status_code::SUCCESS
    }
}

/// Driver error kinds. Transient errors surface BUSY upstream and may be
/// retried; permanent errors surface CHECK CONDITION with sense data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmeError {
    /// Controller reported fatal status (CSTS.CFS).
    ControllerFatal,
    /// Timed out waiting for the controller (bring-up or polled admin).
    Timeout,
    /// NVMe command completed with non-zero status (type, code).
    CommandFailed(u8, u8),
    /// Submission queue full.
    QueueFull,
    /// No free command identifiers.
    CidExhausted,
    /// PRP list page pool exhausted.
    PrpExhausted,
    /// Sub-command needed more PRP list pages than a CID slot can track.
    PrpOverflow,
    /// Scatter-gather translation failed.
    SgTranslation,
    /// Buffer pointer or length not dword-aligned.
    Misaligned,
    /// CDB opcode this driver does not translate.
    UnsupportedOpcode(u8),
    /// DMA memory allocation failed.
    OutOfMemory,
    /// Driver not initialized or namespace not identified.
    NotInitialized,
}

impl NvmeError {
    /// Transient errors surface BUSY and never touch sense data.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NvmeError::QueueFull | NvmeError::CidExhausted | NvmeError::PrpExhausted
        )
    }
}

impl fmt::Display for NvmeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvmeError::ControllerFatal => write!(f, "controller fatal status"),
            NvmeError::Timeout => write!(f, "command timeout"),
            NvmeError::CommandFailed(sct, sc) => {
                write!(f, "command failed: type {} code {:#x}", sct, sc)
            }
            NvmeError::QueueFull => write!(f, "submission queue full"),
            NvmeError::CidExhausted => write!(f, "no free command identifiers"),
            NvmeError::PrpExhausted => write!(f, "PRP page pool exhausted"),
            NvmeError::PrpOverflow => write!(f, "PRP page limit exceeded for one command"),
            NvmeError::SgTranslation => write!(f, "scatter-gather translation failed"),
            NvmeError::Misaligned => write!(f, "buffer not dword-aligned"),
            NvmeError::UnsupportedOpcode(op) => write!(f, "unsupported CDB opcode {:#04x}", op),
            NvmeError::OutOfMemory => write!(f, "DMA allocation failed"),
            NvmeError::NotInitialized => write!(f, "driver not initialized"),
        }
    }
}

impl From<crate::hal::AllocError> for NvmeError {
    fn from(_: crate::hal::AllocError) -> Self {
        NvmeError::OutOfMemory
    }
}
