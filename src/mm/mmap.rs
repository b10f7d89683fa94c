//! The mmap manager.
//!
//! A mapping lays a file, or an executable segment of one, over a contiguous
//! run of user pages. Pages are installed lazily as `FILE` entries; the
//! fault handler calls back into [`read_file`] to populate them, and unmap
//! writes dirty pages back through [`write_file`].
//!
//! Two flavors share the handle:
//!
//! - a **user mapping** (`mmap` syscall) covers the whole file, rounded up
//!   to pages; bytes past end-of-file in the last page read as zero and are
//!   never written back;
//! - an **executable segment** covers `read_bytes` of file data followed by
//!   `zero_bytes` of zero fill (together page-aligned); zero-fill pages are
//!   materialized as zeroes and never touch the file.
//!
//! Every mapping reopens the file it covers, so closing the originating
//! descriptor does not invalidate the mapping.

use crate::Tid;
use crate::addr::{PAGE_SIZE, Upage, Va};
use crate::fs::{FileSys, file::File};
use crate::mm::Vm;
use crate::mm::page::Spaces;
use crate::mm::palloc::PageBytes;
use alloc::sync::Arc;

/// Descriptor of one contiguous mapping.
pub struct MmapHandle {
    /// Mapping id within the owning space.
    pub id: i32,
    /// Private handle onto the mapped file.
    pub file: File,
    /// First mapped page.
    pub base: Upage,
    /// Total pages covered.
    pub page_cnt: usize,
    /// Bytes of file data in the mapping; the rest is zero fill.
    pub read_bytes: usize,
    /// File offset the mapping starts at.
    pub offset: usize,
    /// Whether stores through the mapping are allowed.
    pub writable: bool,
    /// Whether this is an executable segment rather than a user `mmap`.
    pub is_segment: bool,
    /// Whether this is the writable static-data segment of an executable.
    pub is_static_data: bool,
}

/// Shared reference to a mapping; supplemental entries hold clones.
pub type MmapRef = Arc<MmapHandle>;

impl MmapHandle {
    /// Pages that carry file data (the remainder are pure zero fill).
    pub fn file_pages(&self) -> usize {
        self.read_bytes.div_ceil(PAGE_SIZE)
    }

    /// Valid file bytes in the last file-backed page.
    pub fn tail_bytes(&self) -> usize {
        if self.read_bytes == 0 {
            0
        } else {
            self.read_bytes - (self.file_pages() - 1) * PAGE_SIZE
        }
    }

    fn page_index(&self, upage: Upage) -> usize {
        debug_assert!(upage >= self.base);
        (upage.0 - self.base.0) / PAGE_SIZE
    }

    fn file_span(&self, index: usize) -> usize {
        if index + 1 == self.file_pages() {
            self.tail_bytes()
        } else {
            PAGE_SIZE
        }
    }
}

/// Populates one page of a mapping from its file; bytes past the file data
/// (segment zero fill, or the tail of the last page) read as zero.
pub fn read_file(fs: &FileSys, mh: &MmapRef, upage: Upage, page: &mut PageBytes) {
    let index = mh.page_index(upage);
    debug_assert!(index < mh.page_cnt);
    if index >= mh.file_pages() {
        page.fill(0);
        return;
    }
    let want = mh.file_span(index);
    let got = mh
        .file
        .read_at(fs, &mut page[..want], mh.offset + index * PAGE_SIZE);
    page[got..].fill(0);
}

/// Writes one dirty page back to the mapped file. Only writable mappings
/// write back, and zero-fill pages never do. Returns whether the bytes
/// reached the file.
pub fn write_file(fs: &FileSys, mh: &MmapRef, upage: Upage, page: &PageBytes) -> bool {
    if !mh.writable {
        return false;
    }
    let index = mh.page_index(upage);
    debug_assert!(index < mh.page_cnt);
    if index >= mh.file_pages() {
        return true;
    }
    let want = mh.file_span(index);
    mh.file
        .write_at(fs, &page[..want], mh.offset + index * PAGE_SIZE)
        == want
}

impl Vm {
    /// Establishes a user mapping of `file` at `addr`.
    ///
    /// `file` must be a private handle (the caller reopens the descriptor's
    /// file). Fails for an unaligned or null address, an empty file, or any
    /// target page that is already occupied or inside the stack region. The
    /// file handle is closed on failure.
    pub fn mmap(&self, fs: &FileSys, tid: Tid, file: File, addr: Va) -> Option<i32> {
        let len = file.length(fs);
        if addr.0 == 0 || addr.page_offset() != 0 || len == 0 {
            file.close(fs);
            return None;
        }
        let base = addr.round_down();
        let page_cnt = len.div_ceil(PAGE_SIZE);
        self.map_common(fs, tid, file, base, page_cnt, len, 0, true, false, false)
    }

    /// Lays an executable segment over user pages: `read_bytes` of file data
    /// from `offset`, then `zero_bytes` of zero fill. The two must sum to a
    /// whole number of pages.
    #[allow(clippy::too_many_arguments)]
    pub fn map_segment(
        &self,
        fs: &FileSys,
        tid: Tid,
        file: File,
        base: Upage,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> bool {
        assert!(
            (read_bytes + zero_bytes).is_multiple_of(PAGE_SIZE),
            "segment span must be page-aligned"
        );
        assert!(offset.is_multiple_of(PAGE_SIZE));
        let page_cnt = (read_bytes + zero_bytes) / PAGE_SIZE;
        self.map_common(
            fs, tid, file, base, page_cnt, read_bytes, offset, writable, true, writable,
        )
        .is_some()
    }

    #[allow(clippy::too_many_arguments)]
    fn map_common(
        &self,
        fs: &FileSys,
        tid: Tid,
        file: File,
        base: Upage,
        page_cnt: usize,
        read_bytes: usize,
        offset: usize,
        writable: bool,
        is_segment: bool,
        is_static_data: bool,
    ) -> Option<i32> {
        let mut spaces = self.registry.lock();
        let Some(space) = spaces.get_mut(&tid) else {
            file.close(fs);
            return None;
        };
        let id = space.next_mapid;
        let mh = Arc::new(MmapHandle {
            id,
            file,
            base,
            page_cnt,
            read_bytes,
            offset,
            writable,
            is_segment,
            is_static_data,
        });

        for i in 0..page_cnt {
            if !Self::install_file_locked(&mut spaces, tid, base.advance(i), mh.clone()) {
                // Roll back the pages installed so far.
                let space = spaces.get_mut(&tid).unwrap();
                for j in 0..i {
                    space.slots.remove(&base.advance(j));
                }
                drop(spaces);
                match Arc::try_unwrap(mh) {
                    Ok(handle) => handle.file.close(fs),
                    Err(_) => unreachable!("rolled-back mapping still referenced"),
                }
                return None;
            }
        }

        let space = spaces.get_mut(&tid).unwrap();
        space.next_mapid += 1;
        space.mmaps.insert(id, mh);
        Some(id)
    }

    /// Dissolves mapping `mapid`: walks its pages through the unmap path
    /// (writing dirty resident pages back), then drops the handle and closes
    /// its file. Fails for an unknown id.
    pub fn munmap(&self, fs: &FileSys, tid: Tid, mapid: i32) -> bool {
        let mut spaces = self.registry.lock();
        munmap_locked(self, fs, &mut spaces, tid, mapid)
    }

    /// Looks up a mapping id in `tid`'s space.
    pub fn mmap_handle(&self, tid: Tid, mapid: i32) -> Option<MmapRef> {
        self.registry
            .lock()
            .get(&tid)
            .and_then(|s| s.mmaps.get(&mapid).cloned())
    }
}

pub(crate) fn munmap_locked(
    vm: &Vm,
    fs: &FileSys,
    spaces: &mut Spaces,
    tid: Tid,
    mapid: i32,
) -> bool {
    let Some(mh) = spaces.get_mut(&tid).and_then(|s| s.mmaps.remove(&mapid)) else {
        return false;
    };
    for i in 0..mh.page_cnt {
        vm.unmap_locked(fs, spaces, tid, mh.base.advance(i));
    }
    match Arc::try_unwrap(mh) {
        Ok(handle) => handle.file.close(fs),
        Err(_) => panic!("unmapped pages still reference the mapping"),
    }
    true
}
