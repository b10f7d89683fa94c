//! The swap store.
//!
//! A linear array of frame-sized slots on the swap block device. Slots are
//! single-use per residency: `load` gives the slot back to the free list, so
//! a page that is evicted again gets a fresh slot.

use crate::dev::block::{BlockDevice, SECTOR_SIZE, Sector};
use crate::mm::palloc::PageBytes;
use crate::sync::SpinLock;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Sectors per swap slot (one frame).
const SECTORS_PER_SLOT: u32 = (crate::addr::PAGE_SIZE / SECTOR_SIZE) as u32;

/// Index of a swap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(pub u32);

struct SwapInner {
    /// Next never-used slot.
    next: u32,
    /// Slots released by `load` or `free`.
    free: Vec<u32>,
}

/// The swap device and its slot bookkeeping.
pub struct Swap {
    dev: Arc<dyn BlockDevice>,
    capacity: u32,
    inner: SpinLock<SwapInner>,
}

impl Swap {
    /// Wraps a block device as swap space.
    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        let capacity = dev.sector_count() / SECTORS_PER_SLOT;
        Swap {
            dev,
            capacity,
            inner: SpinLock::new(SwapInner {
                next: 0,
                free: Vec::new(),
            }),
        }
    }

    fn take_slot(&self) -> Option<SwapSlot> {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.free.pop() {
            return Some(SwapSlot(slot));
        }
        if inner.next < self.capacity {
            let slot = inner.next;
            inner.next += 1;
            return Some(SwapSlot(slot));
        }
        None
    }

    /// Writes a page to a free slot and returns its index, or `None` when
    /// swap is full.
    pub fn store(&self, page: &PageBytes) -> Option<SwapSlot> {
        let slot = self.take_slot()?;
        let base = Sector(slot.0 * SECTORS_PER_SLOT);
        for i in 0..SECTORS_PER_SLOT {
            let chunk: &[u8; SECTOR_SIZE] = page
                [(i as usize) * SECTOR_SIZE..(i as usize + 1) * SECTOR_SIZE]
                .try_into()
                .unwrap();
            self.dev.write(base + i, chunk);
        }
        Some(slot)
    }

    /// Reads a slot back into `page` and releases the slot.
    pub fn load(&self, slot: SwapSlot, page: &mut PageBytes) {
        let base = Sector(slot.0 * SECTORS_PER_SLOT);
        for i in 0..SECTORS_PER_SLOT {
            let chunk: &mut [u8; SECTOR_SIZE] = (&mut page
                [(i as usize) * SECTOR_SIZE..(i as usize + 1) * SECTOR_SIZE])
                .try_into()
                .unwrap();
            self.dev.read(base + i, chunk);
        }
        self.free(slot);
    }

    /// Releases a slot without reading it.
    pub fn free(&self, slot: SwapSlot) {
        let mut inner = self.inner.lock();
        debug_assert!(slot.0 < inner.next && !inner.free.contains(&slot.0));
        inner.free.push(slot.0);
    }

    /// Number of slots currently holding pages.
    pub fn used_slots(&self) -> u32 {
        let inner = self.inner.lock();
        inner.next - inner.free.len() as u32
    }
}
