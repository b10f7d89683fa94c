//! Supplemental page tables and the page-fault protocol.
//!
//! Each thread owns a [`VmSpace`]: its hardware page directory plus a map
//! from user page to [`PageSlot`], which records where the page's contents
//! live right now — a resident frame, a swap slot, or a file-backed mapping
//! that has not been materialized yet. The three states are an explicit
//! tagged variant; nothing is punned through raw pointers.
//!
//! All spaces live in one registry guarded by the paging lock. Holding that
//! lock across fault handling, install, unmap and teardown is what allows
//! frame eviction to rewrite a victim entry in *any* space without further
//! locking (and therefore without ordering cycles).
//!
//! The fault protocol, for a faulting access at `vaddr` with stack pointer
//! `esp`:
//!
//! 1. The address must be a user address; a write fault on a read-only entry
//!    fails immediately.
//! 2. In the stack region, an unmapped page is granted a zeroed frame when
//!    the access is at or above `esp - 32`; a swapped-out stack page is
//!    reloaded from swap.
//! 3. Below the stack region an unmapped page is a plain segfault; swapped
//!    pages reload from swap and file-backed pages are populated by the mmap
//!    manager (zero-filled for segment tails).
//! 4. A fault on a page whose entry is already resident means the hardware
//!    and supplemental state disagree: fatal.
//! 5. The new frame becomes swapable only after its translation is
//!    installed.

use crate::Tid;
use crate::addr::{Kpage, STACK_PUSH_MARGIN, Upage, Va};
use crate::fs::FileSys;
use crate::mm::Vm;
use crate::mm::mmap::{self, MmapRef};
use crate::mm::pagedir::PageDir;
use crate::mm::palloc::PallocFlags;
use crate::mm::swap::SwapSlot;
use alloc::collections::BTreeMap;

/// Where a user page's contents currently live.
pub enum Backing {
    /// Resident in a physical frame.
    Frame(Kpage),
    /// Stored in a swap slot.
    Swap(SwapSlot),
    /// Not yet materialized; populated on fault from a mapping.
    File(MmapRef),
}

/// One supplemental page-table entry.
pub struct PageSlot {
    /// Current backing store.
    pub backing: Backing,
    /// Whether user stores are permitted.
    pub writable: bool,
    /// The mapping that originally populated this page, used for write-back
    /// on unmap. `None` for stack pages.
    pub origin: Option<MmapRef>,
}

impl PageSlot {
    /// A resident entry.
    pub fn resident(kpage: Kpage, writable: bool, origin: Option<MmapRef>) -> PageSlot {
        PageSlot {
            backing: Backing::Frame(kpage),
            writable,
            origin,
        }
    }
}

/// A thread's address-space state.
pub struct VmSpace {
    /// The hardware page directory.
    pub pagedir: PageDir,
    /// Supplemental entries, keyed by user page.
    pub slots: BTreeMap<Upage, PageSlot>,
    /// Mappings established in this space, keyed by mapping id.
    pub mmaps: BTreeMap<i32, MmapRef>,
    /// Next mapping id to hand out.
    pub next_mapid: i32,
}

impl Default for VmSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl VmSpace {
    /// An empty address space.
    pub fn new() -> VmSpace {
        VmSpace {
            pagedir: PageDir::new(),
            slots: BTreeMap::new(),
            mmaps: BTreeMap::new(),
            next_mapid: 1,
        }
    }
}

/// The address-space registry; the paging lock guards it as a whole.
pub type Spaces = BTreeMap<Tid, VmSpace>;

/// Whether `upage` could accept a new file mapping in `space`: a user page
/// below the stack region with no entry yet.
pub(crate) fn upage_accessible(space: &VmSpace, upage: Upage) -> bool {
    upage.va().is_user() && !upage.in_stack_region() && !space.slots.contains_key(&upage)
}

impl Vm {
    /// Creates an empty address space for `tid`.
    pub fn create_space(&self, tid: Tid) {
        let mut spaces = self.registry.lock();
        let prev = spaces.insert(tid, VmSpace::new());
        assert!(prev.is_none(), "thread already has an address space");
    }

    /// Whether `tid` has an address space.
    pub fn has_space(&self, tid: Tid) -> bool {
        self.registry.lock().contains_key(&tid)
    }

    /// Handles a page fault at `vaddr`. Returns whether the faulting access
    /// may be retried.
    pub fn page_fault(&self, fs: &FileSys, tid: Tid, vaddr: Va, write: bool, esp: Va) -> bool {
        let mut spaces = self.registry.lock();
        self.fault_locked(fs, &mut spaces, tid, vaddr, write, esp)
    }

    pub(crate) fn fault_locked(
        &self,
        fs: &FileSys,
        spaces: &mut Spaces,
        tid: Tid,
        vaddr: Va,
        write: bool,
        esp: Va,
    ) -> bool {
        if !vaddr.is_user() {
            return false;
        }
        let upage = vaddr.round_down();

        enum Plan {
            NewStack,
            FromSwap(SwapSlot),
            FromFile(MmapRef),
        }

        let Some(space) = spaces.get(&tid) else {
            return false;
        };
        let plan = match space.slots.get(&upage) {
            Some(slot) => {
                if write && !slot.writable {
                    return false;
                }
                match &slot.backing {
                    Backing::Frame(_) => {
                        // The hardware faulted on a page we believe is
                        // mapped; the two tables are out of sync.
                        panic!("page fault on a resident page {upage:?}");
                    }
                    Backing::Swap(s) => Plan::FromSwap(*s),
                    Backing::File(mh) => {
                        if upage.in_stack_region() {
                            return false;
                        }
                        Plan::FromFile(mh.clone())
                    }
                }
            }
            None => {
                if upage.in_stack_region() && vaddr.0 + STACK_PUSH_MARGIN >= esp.0 {
                    Plan::NewStack
                } else {
                    return false;
                }
            }
        };

        let flags = match plan {
            Plan::NewStack => PallocFlags::ZERO,
            _ => PallocFlags::empty(),
        };
        let Some(kpage) = self
            .frames
            .get(&self.palloc, &self.swap, spaces, flags, upage, tid)
        else {
            return false;
        };

        let space = spaces.get_mut(&tid).expect("space checked above");
        match plan {
            Plan::NewStack => {
                space
                    .slots
                    .insert(upage, PageSlot::resident(kpage, true, None));
            }
            Plan::FromSwap(slot) => {
                let bytes = self.palloc.page(kpage);
                self.swap.load(slot, &mut bytes.lock());
                space.slots.get_mut(&upage).unwrap().backing = Backing::Frame(kpage);
            }
            Plan::FromFile(mh) => {
                let bytes = self.palloc.page(kpage);
                mmap::read_file(fs, &mh, upage, &mut bytes.lock());
                space.slots.get_mut(&upage).unwrap().backing = Backing::Frame(kpage);
            }
        }

        let writable = space.slots[&upage].writable;
        assert!(space.pagedir.set_page(upage, kpage, writable));
        self.frames.set_swapable(kpage, true);
        true
    }

    /// Records a file-backed entry for `upage`, if the page is free to take
    /// one. Used by `mmap` and by executable-segment setup.
    pub fn install_file(&self, tid: Tid, upage: Upage, mh: MmapRef) -> bool {
        let mut spaces = self.registry.lock();
        Self::install_file_locked(&mut spaces, tid, upage, mh)
    }

    pub(crate) fn install_file_locked(
        spaces: &mut Spaces,
        tid: Tid,
        upage: Upage,
        mh: MmapRef,
    ) -> bool {
        let Some(space) = spaces.get_mut(&tid) else {
            return false;
        };
        if !upage_accessible(space, upage) {
            return false;
        }
        space.slots.insert(
            upage,
            PageSlot {
                backing: Backing::File(mh.clone()),
                writable: mh.writable,
                origin: Some(mh),
            },
        );
        true
    }

    /// Installs an already-populated frame as a resident entry. Used by
    /// loaders that materialize pages eagerly; `kpage` must come from
    /// [`Vm::alloc_frame`] for the same `(tid, upage)`.
    pub fn install_frame(&self, tid: Tid, upage: Upage, kpage: Kpage, writable: bool) -> bool {
        let mut spaces = self.registry.lock();
        let Some(space) = spaces.get_mut(&tid) else {
            return false;
        };
        if space.slots.contains_key(&upage) {
            return false;
        }
        space
            .slots
            .insert(upage, PageSlot::resident(kpage, writable, None));
        assert!(space.pagedir.set_page(upage, kpage, writable));
        self.frames.set_swapable(kpage, true);
        true
    }

    /// Allocates a pinned frame owned by `(tid, upage)`, for use with
    /// [`Vm::install_frame`].
    pub fn alloc_frame(&self, tid: Tid, upage: Upage, flags: PallocFlags) -> Option<Kpage> {
        let mut spaces = self.registry.lock();
        self.frames
            .get(&self.palloc, &self.swap, &mut spaces, flags, upage, tid)
    }

    /// Removes the entry for `upage`, releasing whatever backs it. A
    /// resident page that is dirty under a writable mapping is written back
    /// through its originating mapping first.
    pub fn unmap(&self, fs: &FileSys, tid: Tid, upage: Upage) -> bool {
        let mut spaces = self.registry.lock();
        self.unmap_locked(fs, &mut spaces, tid, upage)
    }

    pub(crate) fn unmap_locked(
        &self,
        fs: &FileSys,
        spaces: &mut Spaces,
        tid: Tid,
        upage: Upage,
    ) -> bool {
        let Some(space) = spaces.get_mut(&tid) else {
            return false;
        };
        let Some(slot) = space.slots.remove(&upage) else {
            return false;
        };
        match slot.backing {
            Backing::File(_) => true,
            Backing::Swap(s) => {
                self.swap.free(s);
                true
            }
            Backing::Frame(kpage) => {
                if space.pagedir.is_dirty(upage) && slot.writable {
                    if let Some(mh) = &slot.origin {
                        let bytes = self.palloc.page(kpage);
                        let copy = *bytes.lock();
                        mmap::write_file(fs, mh, upage, &copy);
                    }
                }
                space.pagedir.clear_page(upage);
                self.frames.free(&self.palloc, kpage);
                true
            }
        }
    }

    /// Tears down `tid`'s address space: unmaps every mapping (writing back
    /// dirty pages), then releases every remaining frame and swap slot.
    pub fn destroy_space(&self, fs: &FileSys, tid: Tid) {
        let mut spaces = self.registry.lock();
        if !spaces.contains_key(&tid) {
            return;
        }
        let ids: alloc::vec::Vec<i32> =
            spaces.get(&tid).unwrap().mmaps.keys().copied().collect();
        for id in ids {
            mmap::munmap_locked(self, fs, &mut spaces, tid, id);
        }
        let space = spaces.get_mut(&tid).unwrap();
        let leftovers: alloc::vec::Vec<Upage> = space.slots.keys().copied().collect();
        for upage in leftovers {
            let slot = space.slots.remove(&upage).unwrap();
            match slot.backing {
                Backing::Frame(kpage) => {
                    space.pagedir.clear_page(upage);
                    self.frames.free(&self.palloc, kpage);
                }
                Backing::Swap(s) => self.swap.free(s),
                Backing::File(_) => {}
            }
        }
        spaces.remove(&tid);
    }

    /// Looks up the resident frame for `vaddr`, faulting it in if the entry
    /// allows it.
    pub(crate) fn materialize_locked(
        &self,
        fs: &FileSys,
        spaces: &mut Spaces,
        tid: Tid,
        vaddr: Va,
        write: bool,
        esp: Va,
    ) -> Option<Kpage> {
        let upage = vaddr.round_down();
        if let Some(slot) = spaces.get(&tid).and_then(|s| s.slots.get(&upage)) {
            if write && !slot.writable {
                return None;
            }
            if let Backing::Frame(k) = slot.backing {
                return Some(k);
            }
        }
        if !self.fault_locked(fs, spaces, tid, vaddr, write, esp) {
            return None;
        }
        match spaces.get(&tid)?.slots.get(&upage)?.backing {
            Backing::Frame(k) => Some(k),
            _ => None,
        }
    }
}
