/// NVMe controller context: bring-up, SCSI submit path, completion engine.
///
/// One `NvmeController` per PCI function. The embedding kernel discovers
/// the device, maps BAR0 uncached, then calls [`NvmeController::new`].
/// I/O submission and I/O completion handling take `&self` and may run
/// concurrently from multiple threads and the interrupt path; admin-side
/// operations (bring-up, teardown, admin completions) take `&mut self`.
use spin::Mutex;

use crate::cid::{CidTable, Completion, IO_CID_COUNT, MAX_PRPS_PER_CMD};
use crate::command::{
    admin_cid, CompletionEntry, NvmeError, SubmissionEntry, CNS_CONTROLLER, CNS_NAMESPACE,
    IO_CID_FLUSH,
};
use crate::hal::{Platform, PAGE_SIZE};
use crate::mem::DmaBuf;
use crate::prp;
use crate::prp_pool::PrpPool;
use crate::queue::QueuePair;
use crate::scsi::{
    self, parse_rw_cdb, sense_key, set_adapter_error, set_busy, set_sense, set_success,
    RequestFlags, ScsiRequest,
};
use crate::sg::{self, SgList};

/// NVMe controller BAR0 register offsets.
mod regs {
    pub const CAP: usize = 0x00; // Controller Capabilities
    pub const CC: usize = 0x14; // Controller Configuration
    pub const CSTS: usize = 0x1C; // Controller Status
    pub const AQA: usize = 0x24; // Admin Queue Attributes
    pub const ASQ: usize = 0x28; // Admin Submission Queue Base Address
    pub const ACQ: usize = 0x30; // Admin Completion Queue Base Address
    pub const SQ0TDBL: usize = 0x1000; // Doorbell region base
}

const CSTS_RDY: u32 = 1 << 0;
const CSTS_CFS: u32 = 1 << 1;

/// Identify data offsets consumed by the completion handlers.
mod identify {
    // Identify Controller
    pub const SERIAL: usize = 4; // 20 bytes, space-padded ASCII
    pub const MODEL: usize = 24; // 40 bytes
    pub const FIRMWARE: usize = 64; // 8 bytes
    pub const MDTS: usize = 77;
    pub const NN: usize = 516; // number of namespaces

    // Identify Namespace
    pub const NSZE: usize = 0;
    pub const FLBAS: usize = 26;
    pub const LBAF_TABLE: usize = 128; // 4 bytes per entry, LBADS in bits 23:16
}

const ADMIN_QUEUE_DEPTH: u16 = 32;
const IO_QUEUE_DEPTH: u16 = 256;

/// Cap keeping the 0-based block count within its 16-bit command field;
/// also the limit applied when MDTS = 0 reports "no limit".
const MAX_TRANSFER_CAP: u32 = 0xFFFF;

/// Controller identification state filled by Identify Controller.
pub struct ControllerInfo {
    pub serial: [u8; 20],
    pub model: [u8; 40],
    pub firmware: [u8; 8],
    pub num_namespaces: u32,
    pub mdts: u8,
    /// Largest sub-command in logical blocks, derived from MDTS.
    pub max_transfer_blocks: u32,
}

impl ControllerInfo {
    fn empty() -> Self {
        Self {
            serial: [0; 20],
            model: [0; 40],
            firmware: [0; 8],
            num_namespaces: 0,
            mdts: 0,
            max_transfer_blocks: MAX_TRANSFER_CAP,
        }
    }
}

/// Namespace identification state filled by Identify Namespace.
#[derive(Debug, Clone)]
pub struct NamespaceInfo {
    pub nsid: u32,
    pub block_count: u64,
    pub block_size: u32,
    pub lba_shift: u32,
}

pub struct NvmeController {
    bar0: *mut u8,
    doorbell_stride: usize,
    timeout_500ms: u32,
    /// log2 of the controller's minimum page size (12 + CAP.MPSMIN).
    mps_shift: u32,
    platform: &'static dyn Platform,
    admin: QueuePair,
    io: Option<QueuePair>,
    /// 4 KiB buffer receiving admin data transfers (identify results).
    util_buf: DmaBuf,
    info: ControllerInfo,
    ns: Option<NamespaceInfo>,
    cids: CidTable,
    prp_pool: PrpPool,
    /// Pre-allocated scatter-gather list for requests arriving without one.
    shared_sg: Mutex<SgList>,
}

// bar0 targets device MMIO; interior driver state is lock-guarded. Fields
// mutated without locks (info, ns, util_buf) are only touched through
// `&mut self` admin paths.
unsafe impl Send for NvmeController {}
unsafe impl Sync for NvmeController {}

impl NvmeController {
    /// Bring up a controller whose BAR0 is mapped at `bar0`.
    ///
    /// # Safety
    /// `bar0` must point to the NVMe controller's register region, mapped
    /// uncached, and remain valid for the controller's lifetime.
    pub unsafe fn new(
        platform: &'static dyn Platform,
        bar0: *mut u8,
    ) -> Result<Self, NvmeError> {
        let cap = core::ptr::read_volatile(bar0.add(regs::CAP) as *const u64);
        let doorbell_stride = 4usize << ((cap >> 32) & 0xF);
        let max_queue_entries = ((cap & 0xFFFF) + 1) as u32;
        let timeout_500ms = ((cap >> 24) & 0xFF) as u32;
        let mps_shift = 12 + ((cap >> 48) & 0xF) as u32;

        let admin = QueuePair::new(
            platform,
            0,
            ADMIN_QUEUE_DEPTH,
            doorbell_ptr(bar0, doorbell_stride, 0, false),
            doorbell_ptr(bar0, doorbell_stride, 0, true),
        )?;
        let util_buf = DmaBuf::alloc(platform, PAGE_SIZE)?;
        let prp_pool = PrpPool::new(platform)?;

        let mut ctrl = Self {
            bar0,
            doorbell_stride,
            timeout_500ms,
            mps_shift,
            platform,
            admin,
            io: None,
            util_buf,
            info: ControllerInfo::empty(),
            ns: None,
            cids: CidTable::new(),
            prp_pool,
            shared_sg: Mutex::new(SgList::with_capacity(64)),
        };

        ctrl.init_controller(max_queue_entries)?;
        Ok(ctrl)
    }

    /// Full initialization sequence: disable, program admin queue, enable,
    /// identify controller, create the I/O queue pair, identify namespace 1.
    unsafe fn init_controller(&mut self, max_queue_entries: u32) -> Result<(), NvmeError> {
        self.write_reg32(regs::CC, 0);
        self.wait_for_ready(false)?;

        let aq = ADMIN_QUEUE_DEPTH as u32;
        self.write_reg32(regs::AQA, ((aq - 1) << 16) | (aq - 1));
        self.write_reg64(regs::ASQ, self.admin.sq_phys().as_u64());
        self.write_reg64(regs::ACQ, self.admin.cq_phys().as_u64());

        // CC: IOCQES=4 (16B), IOSQES=6 (64B), MPS=0 (4K), CSS=0 (NVM), EN=1
        self.write_reg32(regs::CC, (4 << 20) | (6 << 16) | 1);
        self.wait_for_ready(true)?;

        self.identify_controller()?;

        let depth = floor_pow2(max_queue_entries.min(IO_QUEUE_DEPTH as u32)) as u16;
        self.create_io_queues(depth)?;

        self.identify_namespace(1)?;

        Ok(())
    }

    /// Wait for CSTS.RDY to reach the desired state, bounded by CAP.TO.
    unsafe fn wait_for_ready(&self, ready: bool) -> Result<(), NvmeError> {
        let target = if ready { CSTS_RDY } else { 0 };
        // CAP.TO is in 500 ms units; poll in 100 µs steps.
        let max_polls = (self.timeout_500ms.max(1) as u64) * 5000;
        for _ in 0..max_polls {
            let csts = self.read_reg32(regs::CSTS);
            if csts & CSTS_CFS != 0 {
                return Err(NvmeError::ControllerFatal);
            }
            if csts & CSTS_RDY == target {
                return Ok(());
            }
            self.platform.delay_us(100);
        }
        Err(NvmeError::Timeout)
    }

    unsafe fn identify_controller(&mut self) -> Result<(), NvmeError> {
        self.util_buf.clear();
        self.util_buf.flush_for_device();
        let cmd = SubmissionEntry::identify(
            0,
            CNS_CONTROLLER,
            admin_cid::IDENTIFY_CONTROLLER,
            self.util_buf.phys_addr(),
        );
        self.admin_submit_wait(cmd, admin_cid::IDENTIFY_CONTROLLER)
    }

    unsafe fn identify_namespace(&mut self, nsid: u32) -> Result<(), NvmeError> {
        self.util_buf.clear();
        self.util_buf.flush_for_device();
        let cmd = SubmissionEntry::identify(
            nsid,
            CNS_NAMESPACE,
            admin_cid::IDENTIFY_NAMESPACE,
            self.util_buf.phys_addr(),
        );
        self.admin_submit_wait(cmd, admin_cid::IDENTIFY_NAMESPACE)
    }

    /// Create the I/O queue pair: CQ first, then SQ, per spec.
    unsafe fn create_io_queues(&mut self, depth: u16) -> Result<(), NvmeError> {
        let qp = QueuePair::new(
            self.platform,
            1,
            depth,
            doorbell_ptr(self.bar0, self.doorbell_stride, 1, false),
            doorbell_ptr(self.bar0, self.doorbell_stride, 1, true),
        )?;

        let cmd = SubmissionEntry::create_io_cq(1, depth, qp.cq_phys(), 0);
        self.admin_submit_wait(cmd, admin_cid::CREATE_CQ)?;

        let cmd = SubmissionEntry::create_io_sq(1, depth, qp.sq_phys(), 1);
        self.admin_submit_wait(cmd, admin_cid::CREATE_SQ)?;

        self.io = Some(qp);
        Ok(())
    }

    /// Submit an admin command and poll its completion, processing any
    /// other admin completions that drain alongside it.
    fn admin_submit_wait(&mut self, cmd: SubmissionEntry, cid: u16) -> Result<(), NvmeError> {
        self.admin.submit(&cmd)?;

        let max_polls = (self.timeout_500ms.max(1) as u64) * 500;
        for _ in 0..max_polls {
            let mut result = None;
            {
                let info = &mut self.info;
                let ns = &mut self.ns;
                let util = &self.util_buf;
                let mps_shift = self.mps_shift;
                self.admin.process_completions(|cpl| {
                    admin_complete(info, ns, util, mps_shift, cpl);
                    if cpl.cid() == cid {
                        result = Some(if cpl.is_success() {
                            Ok(())
                        } else {
                            Err(NvmeError::CommandFailed(
                                cpl.status_type(),
                                cpl.status_code(),
                            ))
                        });
                    }
                });
            }
            if let Some(result) = result {
                return result;
            }

            let csts = unsafe { self.read_reg32(regs::CSTS) };
            if csts & CSTS_CFS != 0 {
                return Err(NvmeError::ControllerFatal);
            }
            self.platform.delay_us(1000);
        }
        Err(NvmeError::Timeout)
    }

    // ---- Public I/O interface ----

    /// Translate and queue one upstream SCSI request.
    ///
    /// On `Ok`, the request was accepted: its notify hook fires exactly
    /// once when the transfer finishes (or fails). On `Err`, nothing was
    /// queued and the driver holds no reference to the request; transient
    /// conditions (queue, CID, or PRP exhaustion) leave BUSY status with
    /// sense untouched and do not notify, so the upstream can retry, while
    /// permanent failures populate sense and fire the notify hook before
    /// returning.
    pub fn submit_io(&self, req: &mut ScsiRequest) -> Result<(), NvmeError> {
        let Some(ns) = self.ns.as_ref() else {
            set_adapter_error(req);
            finish_request(req);
            return Err(NvmeError::NotInitialized);
        };
        let Some(io) = self.io.as_ref() else {
            set_adapter_error(req);
            finish_request(req);
            return Err(NvmeError::NotInitialized);
        };

        // Ordered / head-of-queue barriers: a flush ahead of the command,
        // on the reserved CID, with no upstream to notify.
        if req
            .flags
            .intersects(RequestFlags::ORDERED | RequestFlags::HEAD_OF_QUEUE)
        {
            if let Err(e) = self.submit_ordered_barrier() {
                apply_submit_error(req, e);
                return Err(e);
            }
        }

        let rw = match parse_rw_cdb(&req.cdb) {
            Ok(rw) => rw,
            Err(e) => {
                apply_submit_error(req, e);
                return Err(e);
            }
        };

        if rw.blocks == 0 {
            set_success(req);
            finish_request(req);
            return Ok(());
        }

        let max_blocks = self.info.max_transfer_blocks.max(1);
        let count = scsi::split_count(rw.blocks, max_blocks) as usize;
        if count > IO_CID_COUNT {
            apply_submit_error(req, NvmeError::CidExhausted);
            return Err(NvmeError::CidExhausted);
        }

        let prepared = match sg::prepare(self.platform, &self.shared_sg, req) {
            Ok(prepared) => prepared,
            Err(e) => {
                apply_submit_error(req, e);
                return Err(e);
            }
        };

        let mut cid_buf = [0u16; IO_CID_COUNT];
        if let Err(e) = self.cids.alloc(req as *mut ScsiRequest, count, &mut cid_buf) {
            apply_submit_error(req, e);
            return Err(e);
        }
        let cids = &cid_buf[..count];

        let mut failure = None;
        {
            let mut cursor = prepared.list().map(|list| list.cursor());
            for (i, &cid) in cids.iter().enumerate() {
                let (lba, blocks) = scsi::sub_command_range(&rw, i as u32, max_blocks);
                let nlb0 = (blocks - 1) as u16;
                let mut cmd = if rw.is_write {
                    SubmissionEntry::write(ns.nsid, lba, nlb0)
                } else {
                    SubmissionEntry::read(ns.nsid, lba, nlb0)
                };
                cmd.set_cid(cid);

                if let Some(cursor) = cursor.as_mut() {
                    let bytes = blocks * ns.block_size;
                    if let Err(e) = prp::build_prps(
                        self.platform,
                        &self.prp_pool,
                        &self.cids,
                        &mut cmd,
                        cursor,
                        bytes,
                        cid,
                    ) {
                        failure = Some((i, e));
                        break;
                    }
                }

                if let Err(e) = io.submit(&cmd) {
                    failure = Some((i, e));
                    break;
                }
            }
        }
        // The shared SG list lock is released before any notify fires.
        drop(prepared);

        let Some((failed, err)) = failure else {
            return Ok(());
        };

        if failed == 0 {
            // Nothing on the wire; the request was never accepted.
            self.cids.abandon(cids, &self.prp_pool);
            apply_submit_error(req, err);
            return Err(err);
        }

        log::warn!(
            "nvme: abandoning sub-commands {}..{} of a split request ({})",
            failed,
            cids.len(),
            err
        );

        // Sub-commands before the failure are on the wire and cannot be
        // recalled: the request is accepted and completes through the
        // engine with BUSY. If the in-flight part already drained, close
        // it out here.
        if self.cids.abandon(&cids[failed..], &self.prp_pool).is_some() {
            set_busy(req);
            finish_request(req);
        }
        Ok(())
    }

    /// Issue a flush on the reserved CID. Nothing upstream is notified;
    /// the completion engine acknowledges and discards it.
    pub fn submit_ordered_barrier(&self) -> Result<(), NvmeError> {
        let io = self.io.as_ref().ok_or(NvmeError::NotInitialized)?;
        let nsid = self.ns.as_ref().map(|ns| ns.nsid).unwrap_or(1);
        io.submit(&SubmissionEntry::flush(nsid, IO_CID_FLUSH))
    }

    /// Drain the I/O completion queue. Interrupt entry point; also usable
    /// as the poll fallback.
    ///
    /// Requests whose final sub-command completed are notified after the
    /// drain, with no driver locks held.
    pub fn handle_io_interrupt(&self) -> usize {
        let Some(io) = self.io.as_ref() else {
            return 0;
        };

        let mut finished: alloc::vec::Vec<*mut ScsiRequest> = alloc::vec::Vec::new();
        let count = io.process_completions(|cpl| {
            if let Some(req) = self.io_complete(cpl) {
                finished.push(req);
            }
        });

        for req in finished {
            // The upstream keeps the request alive until its notify hook
            // fires; this is that single completion point.
            finish_request(unsafe { &mut *req });
        }
        count
    }

    /// Drain the admin completion queue outside bring-up.
    pub fn handle_admin_interrupt(&mut self) -> usize {
        let info = &mut self.info;
        let ns = &mut self.ns;
        let util = &self.util_buf;
        let mps_shift = self.mps_shift;
        self.admin
            .process_completions(|cpl| admin_complete(info, ns, util, mps_shift, cpl))
    }

    /// Poll until every in-flight I/O CID has completed or `timeout_us`
    /// elapses. Returns whether the queues drained.
    pub fn quiesce(&self, timeout_us: u64) -> bool {
        let mut waited = 0u64;
        while self.cids.in_flight() > 0 {
            if self.handle_io_interrupt() == 0 {
                if waited >= timeout_us {
                    return false;
                }
                self.platform.delay_us(100);
                waited += 100;
            }
        }
        true
    }

    /// Tear down the I/O queues (SQ first, then CQ) and disable the
    /// controller.
    pub fn shutdown(&mut self) -> Result<(), NvmeError> {
        if self.io.is_some() {
            self.admin_submit_wait(SubmissionEntry::delete_io_sq(1), admin_cid::DELETE_SQ)?;
            self.admin_submit_wait(SubmissionEntry::delete_io_cq(1), admin_cid::DELETE_CQ)?;
            self.io = None;
        }
        unsafe {
            self.write_reg32(regs::CC, 0);
            self.wait_for_ready(false)
        }
    }

    /// Handle one I/O completion. Returns the upstream request when its
    /// final sub-command just completed; the caller notifies it once all
    /// locks are released.
    fn io_complete(&self, cpl: &CompletionEntry) -> Option<*mut ScsiRequest> {
        let cid = cpl.cid();

        if cid == IO_CID_FLUSH {
            if cpl.is_success() {
                log::debug!("nvme: barrier flush completed");
            } else {
                log::warn!(
                    "nvme: barrier flush failed, type {} code {:#x}",
                    cpl.status_type(),
                    cpl.status_code()
                );
            }
            return None;
        }

        match self.cids.complete(cid, &self.prp_pool) {
            Completion::Spurious | Completion::Pending => None,
            Completion::Done { req, abandoned } => {
                let req_ref = unsafe { &mut *req };
                if abandoned {
                    set_busy(req_ref);
                } else if cpl.is_success() {
                    set_success(req_ref);
                } else {
                    log::warn!(
                        "nvme: CID {} failed, type {} code {:#x}",
                        cid,
                        cpl.status_type(),
                        cpl.status_code()
                    );
                    scsi::map_nvme_status(req_ref, cpl.status_type(), cpl.status_code());
                }
                Some(req)
            }
        }
    }

    // ---- Accessors ----

    pub fn controller_info(&self) -> &ControllerInfo {
        &self.info
    }

    pub fn namespace_info(&self) -> Option<&NamespaceInfo> {
        self.ns.as_ref()
    }

    /// In-flight I/O sub-commands (diagnostics).
    pub fn in_flight(&self) -> usize {
        self.cids.in_flight()
    }

    /// Free PRP pool pages (diagnostics).
    pub fn prp_pages_free(&self) -> u32 {
        self.prp_pool.free_count()
    }

    // ---- MMIO helpers ----

    unsafe fn read_reg32(&self, offset: usize) -> u32 {
        core::ptr::read_volatile(self.bar0.add(offset) as *const u32)
    }

    unsafe fn write_reg32(&self, offset: usize, val: u32) {
        core::ptr::write_volatile(self.bar0.add(offset) as *mut u32, val);
    }

    unsafe fn write_reg64(&self, offset: usize, val: u64) {
        core::ptr::write_volatile(self.bar0.add(offset) as *mut u64, val);
    }
}

/// Doorbell register address for queue `qid`: submission doorbells sit at
/// even stride slots, completion doorbells at odd.
fn doorbell_ptr(bar0: *mut u8, stride: usize, qid: u16, completion: bool) -> *mut u32 {
    let slot = 2 * qid as usize + completion as usize;
    unsafe { bar0.add(regs::SQ0TDBL + slot * stride) as *mut u32 }
}

/// Largest power of two not above `x`.
fn floor_pow2(x: u32) -> u32 {
    debug_assert!(x > 0);
    1 << (31 - x.leading_zeros())
}

/// Clear the adapter word and fire the upstream notify hook.
fn finish_request(req: &mut ScsiRequest) {
    req.driver_private = 0;
    if let Some(notify) = req.notify {
        notify(req);
    }
}

/// Write the status for a request refused on the submit path. Transient
/// failures leave BUSY with sense untouched and do not notify; permanent
/// failures populate sense and fire the notify hook, exactly once.
fn apply_submit_error(req: &mut ScsiRequest, err: NvmeError) {
    if err.is_transient() {
        set_busy(req);
        return;
    }
    match err {
        NvmeError::Misaligned => set_sense(req, sense_key::ILLEGAL_REQUEST, 0x24, 0x00),
        NvmeError::UnsupportedOpcode(_) => set_sense(req, sense_key::ILLEGAL_REQUEST, 0x20, 0x00),
        _ => set_sense(req, sense_key::HARDWARE_ERROR, 0x44, 0x00),
    }
    finish_request(req);
}

/// Admin completion dispatch: switch on the reserved CID and post-process
/// the utility buffer. Failures are logged, never fatal.
fn admin_complete(
    info: &mut ControllerInfo,
    ns: &mut Option<NamespaceInfo>,
    util: &DmaBuf,
    mps_shift: u32,
    cpl: &CompletionEntry,
) {
    let cid = cpl.cid();

    if !cpl.is_success() {
        log::warn!(
            "nvme: admin command failed, CID {}, type {}, code {:#x}",
            cid,
            cpl.status_type(),
            cpl.status_code()
        );
        return;
    }

    match cid {
        admin_cid::IDENTIFY_CONTROLLER => {
            util.flush_for_cpu();
            let data = util.as_slice();

            info.serial
                .copy_from_slice(&data[identify::SERIAL..identify::SERIAL + 20]);
            info.model
                .copy_from_slice(&data[identify::MODEL..identify::MODEL + 40]);
            info.firmware
                .copy_from_slice(&data[identify::FIRMWARE..identify::FIRMWARE + 8]);
            info.num_namespaces = u32::from_le_bytes(
                data[identify::NN..identify::NN + 4].try_into().unwrap(),
            );
            info.mdts = data[identify::MDTS];
            recompute_max_transfer(info, ns.as_ref(), mps_shift);

            log::info!(
                "nvme: controller identified, {} namespaces, MDTS={} ({} blocks max)",
                info.num_namespaces,
                info.mdts,
                info.max_transfer_blocks
            );
        }

        admin_cid::IDENTIFY_NAMESPACE => {
            util.flush_for_cpu();
            let data = util.as_slice();

            let block_count = u64::from_le_bytes(
                data[identify::NSZE..identify::NSZE + 8].try_into().unwrap(),
            );
            let flbas = (data[identify::FLBAS] & 0x0F) as usize;
            let lbaf_offset = identify::LBAF_TABLE + flbas * 4;
            let lbaf =
                u32::from_le_bytes(data[lbaf_offset..lbaf_offset + 4].try_into().unwrap());
            let lba_shift = (lbaf >> 16) & 0xFF;

            *ns = Some(NamespaceInfo {
                nsid: 1,
                block_count,
                block_size: 1 << lba_shift,
                lba_shift,
            });
            recompute_max_transfer(info, ns.as_ref(), mps_shift);

            log::info!(
                "nvme: namespace 1: {} blocks of {} bytes",
                block_count,
                1u32 << lba_shift
            );
        }

        admin_cid::CREATE_CQ => log::debug!("nvme: I/O completion queue created"),
        admin_cid::CREATE_SQ => log::debug!("nvme: I/O submission queue created"),
        admin_cid::DELETE_SQ => log::debug!("nvme: I/O submission queue deleted"),
        admin_cid::DELETE_CQ => log::debug!("nvme: I/O completion queue deleted"),

        other => log::debug!("nvme: admin CID {} completed", other),
    }
}

/// Derive the per-command block limit from MDTS (0 means no controller
/// limit), bounded by the 16-bit block-count field and by what one
/// sub-command's PRP pages can scatter at maximum fragmentation.
fn recompute_max_transfer(info: &mut ControllerInfo, ns: Option<&NamespaceInfo>, mps_shift: u32) {
    let block_size = ns.map(|n| n.block_size).unwrap_or(512) as u64;

    let mdts_bytes = if info.mdts == 0 {
        u64::MAX
    } else {
        1u64 << (info.mdts as u32 + mps_shift).min(63)
    };

    // One data entry per page when the buffer is fully fragmented: each
    // chained list page holds E - 1 entries, the final one E, and PRP1
    // absorbs the lead-in page.
    let prp_bytes =
        (((MAX_PRPS_PER_CMD - 1) * (prp::LIST_ENTRIES - 1) + prp::LIST_ENTRIES) * PAGE_SIZE) as u64;

    info.max_transfer_blocks =
        (mdts_bytes.min(prp_bytes) / block_size).clamp(1, MAX_TRANSFER_CAP as u64) as u32;
}
