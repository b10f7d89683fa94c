//! The hardware page directory, as the kernel sees it.
//!
//! On real hardware this is the MMU-walked page table; the kernel consumes
//! only a handful of operations from it (install, probe, clear, dirty and
//! accessed bits). The hosted stand-in keeps a map of present translations.
//! The user-copy helpers play the part of the MMU and set the accessed and
//! dirty bits as they touch pages.

use crate::addr::{Kpage, Upage};
use alloc::collections::BTreeMap;

/// One present translation.
#[derive(Debug, Clone, Copy)]
pub struct Pte {
    /// The mapped frame.
    pub kpage: Kpage,
    /// Whether user stores are allowed.
    pub writable: bool,
    /// Set when the page has been written through this mapping.
    pub dirty: bool,
    /// Set when the page has been touched through this mapping.
    pub accessed: bool,
}

/// A per-address-space page directory.
pub struct PageDir {
    entries: BTreeMap<Upage, Pte>,
}

impl Default for PageDir {
    fn default() -> Self {
        Self::new()
    }
}

impl PageDir {
    /// An empty directory.
    pub fn new() -> Self {
        PageDir {
            entries: BTreeMap::new(),
        }
    }

    /// The present translation for `upage`, if any.
    pub fn get_page(&self, upage: Upage) -> Option<Pte> {
        self.entries.get(&upage).copied()
    }

    /// Installs a translation. Fails if one is already present.
    pub fn set_page(&mut self, upage: Upage, kpage: Kpage, writable: bool) -> bool {
        if self.entries.contains_key(&upage) {
            return false;
        }
        self.entries.insert(
            upage,
            Pte {
                kpage,
                writable,
                dirty: false,
                accessed: false,
            },
        );
        true
    }

    /// Removes the translation for `upage`, if present.
    pub fn clear_page(&mut self, upage: Upage) {
        self.entries.remove(&upage);
    }

    /// Whether the page has been written since it was mapped.
    pub fn is_dirty(&self, upage: Upage) -> bool {
        self.entries.get(&upage).is_some_and(|pte| pte.dirty)
    }

    /// Whether the page has been touched since it was mapped.
    pub fn is_accessed(&self, upage: Upage) -> bool {
        self.entries.get(&upage).is_some_and(|pte| pte.accessed)
    }

    /// Records a user access, as the MMU would. `write` also sets the dirty
    /// bit.
    pub fn mark_access(&mut self, upage: Upage, write: bool) {
        if let Some(pte) = self.entries.get_mut(&upage) {
            pte.accessed = true;
            pte.dirty |= write;
        }
    }
}
