//! The frame table.
//!
//! One global table records, for every allocated frame, which `(thread,
//! upage)` owns it and whether it may be evicted. When the physical pool runs
//! dry, [`FrameTable::get`] picks a victim with a clock-style scan over the
//! frame list, stores the victim's page to swap, rewrites the victim's
//! supplemental entry to point at the swap slot, clears its hardware
//! translation and hands the freed frame to the caller.
//!
//! Freshly handed-out frames are not swapable; the caller flips the flag once
//! the install is complete, so a half-installed frame can never be chosen as
//! a victim.
//!
//! The caller holds the paging lock across [`FrameTable::get`], which is what
//! lets eviction rewrite any victim's supplemental entry without taking
//! further locks.

use crate::Tid;
use crate::addr::{Kpage, Upage};
use crate::mm::page::{Backing, Spaces};
use crate::mm::palloc::{Palloc, PallocFlags};
use crate::mm::swap::Swap;
use crate::sync::SpinLock;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// Ownership record for one allocated frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameEntry {
    /// The user page mapped onto this frame.
    pub upage: Upage,
    /// The thread that owns the mapping.
    pub owner: Tid,
    /// Whether the frame may be chosen as an eviction victim.
    pub swapable: bool,
}

struct FrameTableInner {
    entries: BTreeMap<Kpage, FrameEntry>,
    /// Frames in allocation order; the clock hand sweeps this list.
    clock: Vec<Kpage>,
    hand: usize,
}

/// The global frame table.
pub struct FrameTable {
    inner: SpinLock<FrameTableInner>,
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTable {
    /// An empty table.
    pub fn new() -> Self {
        FrameTable {
            inner: SpinLock::new(FrameTableInner {
                entries: BTreeMap::new(),
                clock: Vec::new(),
                hand: 0,
            }),
        }
    }

    /// Allocates a frame for `(owner, upage)`, evicting if the pool is
    /// empty. The new frame starts out non-swapable.
    ///
    /// `spaces` is the address-space registry, reachable because the caller
    /// holds the paging lock; eviction uses it to move the victim's
    /// supplemental entry to swap.
    pub fn get(
        &self,
        palloc: &Palloc,
        swap: &Swap,
        spaces: &mut Spaces,
        flags: PallocFlags,
        upage: Upage,
        owner: Tid,
    ) -> Option<Kpage> {
        let mut inner = self.inner.lock();
        let kpage = match palloc.get_page(flags) {
            Some(k) => k,
            None => self.evict(&mut inner, palloc, swap, spaces, flags)?,
        };
        inner.entries.insert(
            kpage,
            FrameEntry {
                upage,
                owner,
                swapable: false,
            },
        );
        inner.clock.push(kpage);
        Some(kpage)
    }

    /// Picks a swapable victim, swaps it out and returns its frame.
    fn evict(
        &self,
        inner: &mut FrameTableInner,
        palloc: &Palloc,
        swap: &Swap,
        spaces: &mut Spaces,
        flags: PallocFlags,
    ) -> Option<Kpage> {
        let len = inner.clock.len();
        if len == 0 {
            return None;
        }
        let mut found = None;
        for i in 0..len {
            let idx = (inner.hand + i) % len;
            let kpage = inner.clock[idx];
            if inner.entries[&kpage].swapable {
                found = Some((idx, kpage));
                break;
            }
        }
        let (idx, kpage) = found?;
        inner.hand = (idx + 1) % len;

        // Take the victim out of circulation before any I/O.
        let entry = inner.entries.get_mut(&kpage).unwrap();
        entry.swapable = false;
        let (v_upage, v_owner) = (entry.upage, entry.owner);

        let bytes = palloc.page(kpage);
        let slot = match swap.store(&bytes.lock()) {
            Some(slot) => slot,
            None => {
                inner.entries.get_mut(&kpage).unwrap().swapable = true;
                return None;
            }
        };
        crate::kdebug!(
            "frame: evict {:?} of {:?} to swap slot {}",
            v_upage,
            v_owner,
            slot.0
        );

        // Rewrite the victim's supplemental entry and drop its translation.
        let space = spaces
            .get_mut(&v_owner)
            .expect("victim owner has an address space");
        let pslot = space
            .slots
            .get_mut(&v_upage)
            .expect("victim page has a supplemental entry");
        match pslot.backing {
            Backing::Frame(f) => assert_eq!(f, kpage, "frame table and page table disagree"),
            _ => panic!("victim's supplemental entry is not resident"),
        }
        pslot.backing = Backing::Swap(slot);
        space.pagedir.clear_page(v_upage);

        Self::forget(inner, kpage);
        if flags.contains(PallocFlags::ZERO) {
            bytes.lock().fill(0);
        }
        Some(kpage)
    }

    fn forget(inner: &mut FrameTableInner, kpage: Kpage) {
        inner.entries.remove(&kpage);
        if let Some(pos) = inner.clock.iter().position(|&k| k == kpage) {
            inner.clock.remove(pos);
            if pos < inner.hand {
                inner.hand -= 1;
            }
            if inner.hand >= inner.clock.len() {
                inner.hand = 0;
            }
        }
    }

    /// Removes the frame's record and returns it to the physical pool.
    pub fn free(&self, palloc: &Palloc, kpage: Kpage) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.entries.contains_key(&kpage));
        Self::forget(&mut inner, kpage);
        palloc.free_page(kpage);
    }

    /// Flips the eviction flag of an allocated frame.
    pub fn set_swapable(&self, kpage: Kpage, swapable: bool) {
        let mut inner = self.inner.lock();
        inner
            .entries
            .get_mut(&kpage)
            .expect("flag flip on an untracked frame")
            .swapable = swapable;
    }

    /// The ownership record of a frame, if tracked.
    pub fn entry(&self, kpage: Kpage) -> Option<FrameEntry> {
        self.inner.lock().entries.get(&kpage).copied()
    }

    /// Number of tracked frames.
    pub fn tracked(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
