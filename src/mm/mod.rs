//! Virtual memory.
//!
//! The pieces, bottom to top:
//!
//! - [`palloc`] — the physical frame pool;
//! - [`pagedir`] — per-space hardware page directories;
//! - [`swap`] — frame-sized slots on the swap device;
//! - [`frame`] — the global frame table with clock-style eviction;
//! - [`page`] — supplemental page tables and the fault handler;
//! - [`mmap`] — file- and segment-backed mappings.
//!
//! [`Vm`] bundles the process-wide parts. The registry of address spaces is
//! guarded by one paging lock (see [`page`]); the frame table and swap have
//! their own locks, taken only below it.

pub mod frame;
pub mod mmap;
pub mod page;
pub mod pagedir;
pub mod palloc;
pub mod swap;

use crate::dev::block::BlockDevice;
use crate::sync::SpinLock;
use alloc::sync::Arc;
use frame::FrameTable;
use page::Spaces;
use palloc::Palloc;
use swap::Swap;

/// Process-wide virtual-memory state.
pub struct Vm {
    /// The physical frame pool.
    pub palloc: Palloc,
    /// The global frame table.
    pub frames: FrameTable,
    /// The swap store.
    pub swap: Swap,
    /// All address spaces, under the paging lock.
    pub registry: SpinLock<Spaces>,
}

impl Vm {
    /// Builds the VM over a pool of `frame_count` frames and a swap device.
    pub fn new(frame_count: usize, swap_dev: Arc<dyn BlockDevice>) -> Vm {
        Vm {
            palloc: Palloc::new(frame_count),
            frames: FrameTable::new(),
            swap: Swap::new(swap_dev),
            registry: SpinLock::new(Spaces::new()),
        }
    }
}
