//! NVMe host bus adapter driver.
//!
//! Presents namespace 1 of an NVMe controller to a legacy SCSI-style
//! midlayer: SCSI READ/WRITE/barrier requests are translated into NVMe
//! commands, split over the controller's transfer limit, scattered through
//! PRP lists, and completed back with SCSI status and sense data.
//!
//! The crate is a `no_std` library. Machine specifics (DMA page
//! allocation, cache maintenance, address translation, MMIO posting)
//! enter through the [`hal::Platform`] trait; the embedding kernel maps
//! BAR0 and wires interrupts, then drives [`controller::NvmeController`].
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod cid;
pub mod command;
pub mod controller;
pub mod hal;
pub mod mem;
pub mod prp;
pub mod prp_pool;
pub mod queue;
pub mod scsi;
pub mod sg;


pub use command::{NvmeError, SubmissionEntry};
pub use controller::{ControllerInfo, NamespaceInfo, NvmeController};
pub use hal::{AllocError, DmaRegion, PhysAddr, Platform, PAGE_SIZE};
pub use scsi::{RequestFlags, ScsiRequest};
