//! The physical page allocator.
//!
//! The real allocator hands out 4 KiB frames of machine memory; this hosted
//! stand-in owns a bounded pool of heap-backed frames and issues [`Kpage`]
//! handles to them. Frame contents are reached through [`Palloc::page`],
//! which is how swap and the mmap manager move bytes in and out of "physical
//! memory".

use crate::addr::{Kpage, PAGE_SIZE};
use crate::sync::SpinLock;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;

/// The raw contents of one frame.
pub type PageBytes = [u8; PAGE_SIZE];

bitflags! {
    /// Allocation options.
    pub struct PallocFlags: u32 {
        /// Zero the frame before returning it.
        const ZERO = 1 << 0;
    }
}

struct FrameBox {
    bytes: Arc<SpinLock<PageBytes>>,
    used: bool,
}

struct PallocInner {
    pool: Vec<FrameBox>,
    free: Vec<usize>,
}

/// A bounded pool of physical frames.
pub struct Palloc {
    inner: SpinLock<PallocInner>,
}

impl Palloc {
    /// Creates a pool of `frames` frames.
    pub fn new(frames: usize) -> Self {
        let mut pool = Vec::with_capacity(frames);
        let mut free = Vec::with_capacity(frames);
        for i in 0..frames {
            pool.push(FrameBox {
                bytes: Arc::new(SpinLock::new([0; PAGE_SIZE])),
                used: false,
            });
            free.push(frames - 1 - i);
        }
        Palloc {
            inner: SpinLock::new(PallocInner { pool, free }),
        }
    }

    /// Allocates one frame, or `None` when the pool is exhausted.
    pub fn get_page(&self, flags: PallocFlags) -> Option<Kpage> {
        let mut inner = self.inner.lock();
        let idx = inner.free.pop()?;
        debug_assert!(!inner.pool[idx].used);
        inner.pool[idx].used = true;
        if flags.contains(PallocFlags::ZERO) {
            inner.pool[idx].bytes.lock().fill(0);
        }
        Some(Kpage(idx))
    }

    /// Returns a frame to the pool.
    pub fn free_page(&self, kpage: Kpage) {
        let mut inner = self.inner.lock();
        let frame = &mut inner.pool[kpage.0];
        assert!(frame.used, "double free of frame {kpage:?}");
        frame.used = false;
        inner.free.push(kpage.0);
    }

    /// The contents of an allocated frame.
    pub fn page(&self, kpage: Kpage) -> Arc<SpinLock<PageBytes>> {
        let inner = self.inner.lock();
        let frame = &inner.pool[kpage.0];
        debug_assert!(frame.used, "access to a free frame");
        frame.bytes.clone()
    }

    /// Number of free frames.
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_and_reuse() {
        let palloc = Palloc::new(2);
        let a = palloc.get_page(PallocFlags::empty()).unwrap();
        let b = palloc.get_page(PallocFlags::empty()).unwrap();
        assert_ne!(a, b);
        assert!(palloc.get_page(PallocFlags::empty()).is_none());
        palloc.free_page(a);
        assert_eq!(palloc.free_frames(), 1);
        assert!(palloc.get_page(PallocFlags::ZERO).is_some());
    }

    #[test]
    fn zero_flag_clears_contents() {
        let palloc = Palloc::new(1);
        let k = palloc.get_page(PallocFlags::empty()).unwrap();
        palloc.page(k).lock().fill(0xee);
        palloc.free_page(k);
        let k = palloc.get_page(PallocFlags::ZERO).unwrap();
        assert!(palloc.page(k).lock().iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic]
    fn double_free_asserts() {
        let palloc = Palloc::new(1);
        let k = palloc.get_page(PallocFlags::empty()).unwrap();
        palloc.free_page(k);
        palloc.free_page(k);
    }
}
