/// Submission/completion queue pair with ring discipline and doorbells.
///
/// Producer side: any thread may call [`QueuePair::submit`]; the producer
/// lock covers the tail, the SQ slot write, and the doorbell. Consumer
/// side: exactly one caller drains the CQ at a time (interrupt XOR poll);
/// the consumer lock enforces that, and is distinct from the producer lock
/// so completions never contend with submissions.
use core::mem::size_of;
use core::ptr;
use core::sync::atomic::{fence, AtomicU16, Ordering};

use spin::Mutex;

use crate::command::{CompletionEntry, NvmeError, SubmissionEntry};
use crate::hal::{PhysAddr, Platform};
use crate::mem::DmaBuf;

pub struct QueuePair {
    qid: u16,
    size: u16,
    size_mask: u16,
    size_shift: u32,
    sq: DmaBuf,
    cq: DmaBuf,
    sq_doorbell: *mut u32,
    cq_doorbell: *mut u32,
    /// Controller consumption point, published from CQE SQ-head fields.
    /// Producers may observe a stale value; that only makes the full
    /// check conservative, never unsafe.
    sq_head: AtomicU16,
    /// Producer tail. Guards the SQ slot write and the SQ doorbell.
    producer: Mutex<u16>,
    /// Consumer head, unbounded; wraps only when indexing. Bit
    /// `size_shift` of the head is the expected phase.
    consumer: Mutex<u32>,
    platform: &'static dyn Platform,
}

// Raw doorbell pointers target MMIO registers owned by this queue pair
// for its whole lifetime; all interior state is lock- or atomic-guarded.
unsafe impl Send for QueuePair {}
unsafe impl Sync for QueuePair {}

impl QueuePair {
    /// Allocate SQ and CQ rings for `size` entries (power of two) and bind
    /// them to the given doorbell registers.
    pub fn new(
        platform: &'static dyn Platform,
        qid: u16,
        size: u16,
        sq_doorbell: *mut u32,
        cq_doorbell: *mut u32,
    ) -> Result<Self, NvmeError> {
        debug_assert!(size.is_power_of_two());

        let mut sq = DmaBuf::alloc(platform, size as usize * size_of::<SubmissionEntry>())?;
        let mut cq = DmaBuf::alloc(platform, size as usize * size_of::<CompletionEntry>())?;
        sq.clear();
        cq.clear();
        sq.flush_for_device();
        cq.flush_for_device();

        Ok(Self {
            qid,
            size,
            size_mask: size - 1,
            size_shift: size.trailing_zeros(),
            sq,
            cq,
            sq_doorbell,
            cq_doorbell,
            sq_head: AtomicU16::new(0),
            producer: Mutex::new(0),
            // Start the head one lap in, so the expected phase
            // (cq_head >> size_shift) & 1 begins at 1 as the controller
            // writes it on the first pass.
            consumer: Mutex::new(size as u32),
            platform,
        })
    }

    pub fn id(&self) -> u16 {
        self.qid
    }

    pub fn depth(&self) -> u16 {
        self.size
    }

    pub fn sq_phys(&self) -> PhysAddr {
        self.sq.phys_addr()
    }

    pub fn cq_phys(&self) -> PhysAddr {
        self.cq.phys_addr()
    }

    /// Entries currently in flight, as seen by this producer.
    pub fn in_flight(&self) -> u16 {
        let tail = *self.producer.lock();
        let head = self.sq_head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) & self.size_mask
    }

    /// Place `cmd` in the submission queue and ring the doorbell.
    ///
    /// Refuses with [`NvmeError::QueueFull`] when the tail would catch the
    /// head; the entry is not written and no doorbell is rung.
    pub fn submit(&self, cmd: &SubmissionEntry) -> Result<(), NvmeError> {
        let mut tail = self.producer.lock();

        let next = (*tail + 1) & self.size_mask;
        if next == self.sq_head.load(Ordering::Acquire) & self.size_mask {
            log::warn!("nvme: queue {} full (tail={})", self.qid, *tail);
            return Err(NvmeError::QueueFull);
        }

        let slot = unsafe {
            (self.sq.as_mut_ptr() as *mut SubmissionEntry).add(*tail as usize)
        };
        unsafe { ptr::write_volatile(slot, *cmd) };
        self.platform
            .flush_for_device(slot as *const u8, size_of::<SubmissionEntry>());

        *tail = next;

        // The command words must be globally visible before the doorbell.
        fence(Ordering::SeqCst);
        unsafe { ptr::write_volatile(self.sq_doorbell, next as u32) };
        self.platform.flush_posted_writes();

        Ok(())
    }

    /// Drain the completion queue, invoking `handler` for each entry.
    ///
    /// Returns the number of entries processed. Returns 0 immediately if
    /// another consumer is already draining; per-CQ processing is
    /// single-threaded. The producer lock is never held across `handler`.
    pub fn process_completions(&self, mut handler: impl FnMut(&CompletionEntry)) -> usize {
        let Some(mut head) = self.consumer.try_lock() else {
            return 0;
        };

        let mut count = 0usize;
        loop {
            let idx = (*head as u16 & self.size_mask) as usize;
            let slot = unsafe { (self.cq.as_ptr() as *const CompletionEntry).add(idx) };
            self.platform
                .flush_for_cpu(slot as *const u8, size_of::<CompletionEntry>());

            let cpl = Self::read_completion(slot);
            if cpl.phase() != (*head >> self.size_shift) & 1 {
                break;
            }

            let sq_head = cpl.sq_head();
            if sq_head >= self.size {
                log::warn!(
                    "nvme: queue {} completion carries SQ head {} >= size {}",
                    self.qid,
                    sq_head,
                    self.size
                );
            }
            self.sq_head
                .store(sq_head & self.size_mask, Ordering::Release);

            handler(&cpl);
            *head += 1;
            count += 1;
        }

        if count > 0 {
            unsafe {
                ptr::write_volatile(self.cq_doorbell, (*head as u16 & self.size_mask) as u32)
            };
            self.platform.flush_posted_writes();
        }

        count
    }

    /// Read all four completion dwords through volatile loads, in order.
    fn read_completion(slot: *const CompletionEntry) -> CompletionEntry {
        let src = slot as *const u32;
        unsafe {
            CompletionEntry {
                dw0: ptr::read_volatile(src),
                dw1: ptr::read_volatile(src.add(1)),
                dw2: ptr::read_volatile(src.add(2)),
                dw3: ptr::read_volatile(src.add(3)),
            }
        }
    }
}
