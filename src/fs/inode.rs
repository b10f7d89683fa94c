//! The inode layer.
//!
//! An inode occupies exactly one sector and indexes its data sectors through
//! four tiers: 122 direct pointers, then one single-, one double- and one
//! triple-indirect pointer, each indirect sector holding 128 pointers. A
//! pointer value of zero means "unallocated".
//!
//! ```text
//!  DiskInode
//!  ├── direct[0..122]                 -> data
//!  ├── indirect ──> [128]             -> data
//!  ├── dbl_indirect ──> [128] ─> [128] -> data
//!  └── trpl_indirect ─> [128] ─> [128] ─> [128] -> data
//! ```
//!
//! Files are dense: every sector below `length` is allocated and zero-filled
//! at allocation time, so extension reads back as zeroes. Writing past the
//! current end grows the allocation map first, then updates `length` and
//! flushes the inode sector.
//!
//! In memory, at most one [`Inode`] exists per sector; the open-inode table
//! coalesces opens onto it and counts them. An inode marked removed gives its
//! sector and all data sectors back to the free map when the last opener
//! closes it.

use crate::dev::block::{SECTOR_SIZE, Sector};
use crate::fs::cache::BlockCache;
use crate::fs::free_map::FreeMap;
use crate::sync::SpinLock;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

/// Identifies an on-disk inode.
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// Direct pointers per inode.
pub const DIRECT_COUNT: usize = 122;
/// Pointers per indirect sector.
pub const INDEX_COUNT: usize = 128;

/// First sector index past the direct tier.
const L0_END: usize = DIRECT_COUNT;
/// First sector index past the single-indirect tier.
const L1_END: usize = L0_END + INDEX_COUNT;
/// First sector index past the double-indirect tier.
const L2_END: usize = L1_END + INDEX_COUNT * INDEX_COUNT;
/// First sector index past the triple-indirect tier.
const L3_END: usize = L2_END + INDEX_COUNT * INDEX_COUNT * INDEX_COUNT;

/// Largest supported file length in bytes.
pub const MAX_LENGTH: u64 = (L3_END as u64) * SECTOR_SIZE as u64;

const ZEROS: [u8; SECTOR_SIZE] = [0; SECTOR_SIZE];

/// One sector full of sector pointers.
type IndexBlock = [u32; INDEX_COUNT];

/// The on-disk inode. Exactly one sector.
#[repr(C)]
#[derive(Clone, AsBytes, FromBytes)]
pub struct DiskInode {
    /// Direct data-sector pointers.
    pub direct: [u32; DIRECT_COUNT],
    /// Single-indirect index sector.
    pub indirect: u32,
    /// Double-indirect index sector.
    pub dbl_indirect: u32,
    /// Triple-indirect index sector.
    pub trpl_indirect: u32,
    /// Nonzero if this inode is a directory.
    pub is_dir: u32,
    /// File length in bytes.
    pub length: u32,
    /// Must equal [`INODE_MAGIC`].
    pub magic: u32,
}
const_assert!(core::mem::size_of::<DiskInode>() == SECTOR_SIZE);

impl DiskInode {
    fn empty(length: u32, is_dir: bool) -> DiskInode {
        DiskInode {
            direct: [0; DIRECT_COUNT],
            indirect: 0,
            dbl_indirect: 0,
            trpl_indirect: 0,
            is_dir: is_dir as u32,
            length,
            magic: INODE_MAGIC,
        }
    }
}

/// Sectors needed to hold `length` bytes.
fn bytes_to_sectors(length: u32) -> usize {
    (length as usize).div_ceil(SECTOR_SIZE)
}

/// Sectors a single entry spans at `level` (1 = leaf pointer).
fn entry_span(level: u32) -> usize {
    match level {
        1 => 1,
        2 => INDEX_COUNT,
        3 => INDEX_COUNT * INDEX_COUNT,
        _ => unreachable!("bad index level"),
    }
}

/// Maps a zero-based data-sector index to its sector pointer.
///
/// Returns `None` when `index` is beyond the addressable range. A returned
/// pointer of zero means the slot was never allocated.
fn index_to_sector(cache: &BlockCache, data: &DiskInode, index: usize) -> Option<u32> {
    let mut block: IndexBlock = [0; INDEX_COUNT];
    if index < L0_END {
        Some(data.direct[index])
    } else if index < L1_END {
        if data.indirect == 0 {
            return Some(0);
        }
        cache.read_obj(Sector(data.indirect), &mut block);
        Some(block[index - L0_END])
    } else if index < L2_END {
        if data.dbl_indirect == 0 {
            return Some(0);
        }
        let rel = index - L1_END;
        cache.read_obj(Sector(data.dbl_indirect), &mut block);
        let mid = block[rel / INDEX_COUNT];
        if mid == 0 {
            return Some(0);
        }
        cache.read_obj(Sector(mid), &mut block);
        Some(block[rel % INDEX_COUNT])
    } else if index < L3_END {
        let rel = index - L2_END;
        if data.trpl_indirect == 0 {
            return Some(0);
        }
        cache.read_obj(Sector(data.trpl_indirect), &mut block);
        let top = block[rel / (INDEX_COUNT * INDEX_COUNT)];
        if top == 0 {
            return Some(0);
        }
        cache.read_obj(Sector(top), &mut block);
        let mid = block[(rel / INDEX_COUNT) % INDEX_COUNT];
        if mid == 0 {
            return Some(0);
        }
        cache.read_obj(Sector(mid), &mut block);
        Some(block[rel % INDEX_COUNT])
    } else {
        None
    }
}

/// Sector holding byte `pos`, or `None` past end of file.
fn byte_to_sector(cache: &BlockCache, data: &DiskInode, pos: usize) -> Option<Sector> {
    if pos >= data.length as usize {
        return None;
    }
    let raw = index_to_sector(cache, data, pos / SECTOR_SIZE)?;
    debug_assert_ne!(raw, 0, "sector below file length must be allocated");
    Some(Sector(raw))
}

/// Ensures `*slot` names an allocated, zero-filled sector.
fn ensure_slot(cache: &BlockCache, free_map: &mut FreeMap, slot: &mut u32) -> bool {
    if *slot == 0 {
        match free_map.allocate(1) {
            Some(s) => {
                *slot = s.0;
                cache.write(s, &ZEROS);
            }
            None => return false,
        }
    }
    true
}

/// Allocates the subtree under `slot` to cover `sectors` leaves.
///
/// `level` 0 means `slot` is a data sector itself. Interior index sectors are
/// allocated on first use and zero-filled, so unused entries read as
/// unallocated. Already-populated entries are left alone. On failure,
/// whatever was allocated stays in place; the caller sees `false`.
fn allocate_index(
    cache: &BlockCache,
    free_map: &mut FreeMap,
    slot: &mut u32,
    sectors: usize,
    level: u32,
) -> bool {
    if !ensure_slot(cache, free_map, slot) {
        return false;
    }
    if level == 0 {
        return true;
    }
    let mut block: IndexBlock = [0; INDEX_COUNT];
    cache.read_obj(Sector(*slot), &mut block);
    let span = entry_span(level);
    let mut remaining = sectors;
    let mut ok = true;
    for entry in block.iter_mut() {
        if remaining == 0 {
            break;
        }
        let sub = remaining.min(span);
        if !allocate_index(cache, free_map, entry, sub, level - 1) {
            ok = false;
            break;
        }
        remaining -= sub;
    }
    cache.write_obj(Sector(*slot), &block);
    ok && remaining == 0
}

/// Grows the allocation map of `data` to cover `length` bytes.
fn allocate(cache: &BlockCache, free_map: &mut FreeMap, data: &mut DiskInode, length: u32) -> bool {
    let mut sectors = bytes_to_sectors(length);

    let n = sectors.min(DIRECT_COUNT);
    for slot in data.direct[..n].iter_mut() {
        if !ensure_slot(cache, free_map, slot) {
            return false;
        }
    }
    sectors -= n;
    if sectors == 0 {
        return true;
    }

    let n = sectors.min(INDEX_COUNT);
    if !allocate_index(cache, free_map, &mut data.indirect, n, 1) {
        return false;
    }
    sectors -= n;
    if sectors == 0 {
        return true;
    }

    let n = sectors.min(INDEX_COUNT * INDEX_COUNT);
    if !allocate_index(cache, free_map, &mut data.dbl_indirect, n, 2) {
        return false;
    }
    sectors -= n;
    if sectors == 0 {
        return true;
    }

    let n = sectors.min(INDEX_COUNT * INDEX_COUNT * INDEX_COUNT);
    if !allocate_index(cache, free_map, &mut data.trpl_indirect, n, 3) {
        return false;
    }
    sectors -= n;
    sectors == 0
}

/// Releases the subtree under `slot` covering `sectors` leaves, then `slot`
/// itself.
fn deallocate_index(
    cache: &BlockCache,
    free_map: &mut FreeMap,
    slot: u32,
    sectors: usize,
    level: u32,
) {
    if slot == 0 {
        return;
    }
    if level == 0 {
        free_map.release(Sector(slot), 1);
        return;
    }
    let mut block: IndexBlock = [0; INDEX_COUNT];
    cache.read_obj(Sector(slot), &mut block);
    let span = entry_span(level);
    let mut remaining = sectors;
    for entry in block.iter() {
        if remaining == 0 {
            break;
        }
        let sub = remaining.min(span);
        deallocate_index(cache, free_map, *entry, sub, level - 1);
        remaining -= sub;
    }
    free_map.release(Sector(slot), 1);
}

/// Returns all data and index sectors of `data` to the free map.
fn deallocate(cache: &BlockCache, free_map: &mut FreeMap, data: &DiskInode, length: u32) {
    let mut sectors = bytes_to_sectors(length);

    let n = sectors.min(DIRECT_COUNT);
    for slot in data.direct[..n].iter() {
        if *slot != 0 {
            free_map.release(Sector(*slot), 1);
        }
    }
    sectors -= n;
    if sectors == 0 {
        return;
    }

    let n = sectors.min(INDEX_COUNT);
    deallocate_index(cache, free_map, data.indirect, n, 1);
    sectors -= n;
    if sectors == 0 {
        return;
    }

    let n = sectors.min(INDEX_COUNT * INDEX_COUNT);
    deallocate_index(cache, free_map, data.dbl_indirect, n, 2);
    sectors -= n;
    if sectors == 0 {
        return;
    }

    let n = sectors.min(INDEX_COUNT * INDEX_COUNT * INDEX_COUNT);
    deallocate_index(cache, free_map, data.trpl_indirect, n, 3);
}

struct InodeInner {
    data: DiskInode,
    open_cnt: u32,
    deny_write_cnt: u32,
    removed: bool,
}

/// An open inode. Shared through the open-inode table; at most one exists per
/// sector.
pub struct Inode {
    sector: Sector,
    inner: SpinLock<InodeInner>,
}

/// Shared handle to an open inode.
pub type InodeRef = Arc<Inode>;

impl Inode {
    /// Sector this inode lives in. Doubles as its inode number.
    pub fn sector(&self) -> Sector {
        self.sector
    }

    /// Current length in bytes.
    pub fn length(&self) -> usize {
        self.inner.lock().data.length as usize
    }

    /// Whether this inode is a directory.
    pub fn is_dir(&self) -> bool {
        self.inner.lock().data.is_dir != 0
    }

    /// Whether the inode is marked for deletion.
    pub fn is_removed(&self) -> bool {
        self.inner.lock().removed
    }

    /// Number of open handles.
    pub fn open_cnt(&self) -> u32 {
        self.inner.lock().open_cnt
    }

    /// Number of standing write denials.
    pub fn deny_write_cnt(&self) -> u32 {
        self.inner.lock().deny_write_cnt
    }

    /// Marks the inode for deletion when the last opener closes it.
    pub fn remove(&self) {
        self.inner.lock().removed = true;
    }

    /// Registers a write denial. At most one per opener.
    pub fn deny_write(&self) {
        let mut inner = self.inner.lock();
        inner.deny_write_cnt += 1;
        assert!(inner.deny_write_cnt <= inner.open_cnt);
    }

    /// Withdraws a write denial registered with [`Inode::deny_write`].
    pub fn allow_write(&self) {
        let mut inner = self.inner.lock();
        assert!(inner.deny_write_cnt > 0);
        assert!(inner.deny_write_cnt <= inner.open_cnt);
        inner.deny_write_cnt -= 1;
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually read (short at end of file).
    ///
    /// Aligned full-sector spans go straight into `buf`; everything else
    /// passes through a bounce buffer so the cache slot stays the cache's
    /// own.
    pub fn read_at(&self, cache: &BlockCache, buf: &mut [u8], mut offset: usize) -> usize {
        let inner = self.inner.lock();
        let mut bounce = [0u8; SECTOR_SIZE];
        let mut bytes_read = 0;
        let mut size = buf.len();
        while size > 0 {
            let sector = match byte_to_sector(cache, &inner.data, offset) {
                Some(s) => s,
                None => break,
            };
            let sector_ofs = offset % SECTOR_SIZE;
            let inode_left = inner.data.length as usize - offset;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = size.min(inode_left).min(sector_left);
            if chunk == 0 {
                break;
            }
            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                let dst: &mut [u8; SECTOR_SIZE] = (&mut buf[bytes_read..bytes_read + SECTOR_SIZE])
                    .try_into()
                    .unwrap();
                cache.read(sector, dst);
            } else {
                cache.read(sector, &mut bounce);
                buf[bytes_read..bytes_read + chunk]
                    .copy_from_slice(&bounce[sector_ofs..sector_ofs + chunk]);
            }
            size -= chunk;
            offset += chunk;
            bytes_read += chunk;
        }
        bytes_read
    }

    /// Writes `buf` starting at `offset`, growing the file if the write ends
    /// past the current length. Returns the number of bytes written: 0 when
    /// growth fails (length is then unchanged).
    ///
    /// Write denial is enforced by the file layer, which owns the pairing of
    /// denials with openers; this layer only records the counter.
    pub fn write_at(
        &self,
        cache: &BlockCache,
        free_map: &mut FreeMap,
        buf: &[u8],
        mut offset: usize,
    ) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock();

        let end = offset + buf.len();
        if end > inner.data.length as usize {
            if end as u64 > MAX_LENGTH || !allocate(cache, free_map, &mut inner.data, end as u32) {
                return 0;
            }
            inner.data.length = end as u32;
            cache.write_obj(self.sector, &inner.data);
        }

        let mut bounce = [0u8; SECTOR_SIZE];
        let mut bytes_written = 0;
        let mut size = buf.len();
        while size > 0 {
            let sector = match byte_to_sector(cache, &inner.data, offset) {
                Some(s) => s,
                None => break,
            };
            let sector_ofs = offset % SECTOR_SIZE;
            let inode_left = inner.data.length as usize - offset;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = size.min(inode_left).min(sector_left);
            if chunk == 0 {
                break;
            }
            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                let src: &[u8; SECTOR_SIZE] = (&buf[bytes_written..bytes_written + SECTOR_SIZE])
                    .try_into()
                    .unwrap();
                cache.write(sector, src);
            } else {
                // Preserve the bytes around the chunk.
                if sector_ofs > 0 || chunk < sector_left {
                    cache.read(sector, &mut bounce);
                } else {
                    bounce = ZEROS;
                }
                bounce[sector_ofs..sector_ofs + chunk]
                    .copy_from_slice(&buf[bytes_written..bytes_written + chunk]);
                cache.write(sector, &bounce);
            }
            size -= chunk;
            offset += chunk;
            bytes_written += chunk;
        }
        bytes_written
    }
}

/// Writes a fresh on-disk inode to `sector` and allocates data sectors for
/// `length` bytes, each zero-filled. Returns false if allocation fails.
pub fn create(
    cache: &BlockCache,
    free_map: &mut FreeMap,
    sector: Sector,
    length: u32,
    is_dir: bool,
) -> bool {
    if length as u64 > MAX_LENGTH {
        return false;
    }
    let mut data = DiskInode::empty(length, is_dir);
    if !allocate(cache, free_map, &mut data, length) {
        return false;
    }
    cache.write_obj(sector, &data);
    true
}

/// The open-inode table: coalesces opens of the same sector onto one
/// in-memory inode.
pub struct InodeTable {
    open: BTreeMap<u32, InodeRef>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// An empty table.
    pub fn new() -> Self {
        InodeTable {
            open: BTreeMap::new(),
        }
    }

    /// Opens the inode at `sector`, reading it from disk unless it is
    /// already open.
    pub fn open(&mut self, cache: &BlockCache, sector: Sector) -> InodeRef {
        if let Some(inode) = self.open.get(&sector.0) {
            inode.inner.lock().open_cnt += 1;
            return inode.clone();
        }
        let mut data = DiskInode::empty(0, false);
        cache.read_obj(sector, &mut data);
        debug_assert_eq!(data.magic, INODE_MAGIC, "opened sector is not an inode");
        let inode = Arc::new(Inode {
            sector,
            inner: SpinLock::new(InodeInner {
                data,
                open_cnt: 1,
                deny_write_cnt: 0,
                removed: false,
            }),
        });
        self.open.insert(sector.0, inode.clone());
        inode
    }

    /// Opens another handle onto an already-open inode.
    pub fn reopen(&self, inode: &InodeRef) -> InodeRef {
        inode.inner.lock().open_cnt += 1;
        inode.clone()
    }

    /// Number of distinct inodes currently open.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Closes one handle. When the last handle goes away the inode leaves the
    /// table; if it was removed, its sector and all data sectors return to
    /// the free map.
    pub fn close(&mut self, cache: &BlockCache, free_map: &mut FreeMap, inode: InodeRef) {
        let reclaim = {
            let mut inner = inode.inner.lock();
            assert!(inner.open_cnt > 0);
            inner.open_cnt -= 1;
            if inner.open_cnt > 0 {
                return;
            }
            self.open.remove(&inode.sector.0);
            inner.removed.then(|| (inner.data.clone(), inner.data.length))
        };
        if let Some((data, length)) = reclaim {
            free_map.release(inode.sector, 1);
            deallocate(cache, free_map, &data, length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::block::MemDisk;
    use alloc::sync::Arc;
    use alloc::vec;

    const FS_SECTORS: u32 = 40_000;

    fn setup() -> (BlockCache, FreeMap) {
        let cache = BlockCache::new(Arc::new(MemDisk::new(FS_SECTORS)));
        let mut map = FreeMap::new(FS_SECTORS);
        for s in 0..3 {
            map.mark_used(Sector(s));
        }
        (cache, map)
    }

    #[test]
    fn create_open_close_roundtrip() {
        let (cache, mut map) = setup();
        let mut table = InodeTable::new();
        let sector = map.allocate(1).unwrap();
        assert!(create(&cache, &mut map, sector, 600, false));

        let ino = table.open(&cache, sector);
        assert_eq!(ino.length(), 600);
        assert!(!ino.is_dir());

        // Opening the same sector coalesces.
        let again = table.open(&cache, sector);
        assert!(Arc::ptr_eq(&ino, &again));
        assert_eq!(ino.open_cnt(), 2);
        table.close(&cache, &mut map, again);
        assert_eq!(ino.open_cnt(), 1);
        table.close(&cache, &mut map, ino);
        assert_eq!(table.open_count(), 0);
    }

    #[test]
    fn read_after_write() {
        let (cache, mut map) = setup();
        let mut table = InodeTable::new();
        let sector = map.allocate(1).unwrap();
        assert!(create(&cache, &mut map, sector, 600, false));
        let ino = table.open(&cache, sector);

        assert_eq!(ino.write_at(&cache, &mut map, b"xy", 0), 2);
        assert_eq!(ino.write_at(&cache, &mut map, b"Z", 512), 1);

        let mut buf = vec![0u8; 600];
        assert_eq!(ino.read_at(&cache, &mut buf, 0), 600);
        assert_eq!(&buf[..2], b"xy");
        assert!(buf[2..512].iter().all(|&b| b == 0));
        assert_eq!(buf[512], b'Z');
        assert!(buf[513..].iter().all(|&b| b == 0));
        assert_eq!(ino.length(), 600);
    }

    #[test]
    fn growth_zero_fills_gap() {
        let (cache, mut map) = setup();
        let mut table = InodeTable::new();
        let sector = map.allocate(1).unwrap();
        assert!(create(&cache, &mut map, sector, 0, false));
        let ino = table.open(&cache, sector);

        // Write far past the end; the gap must read as zeroes.
        assert_eq!(ino.write_at(&cache, &mut map, &[0x5a; 16], 3000), 16);
        assert_eq!(ino.length(), 3016);
        let mut buf = vec![0xffu8; 3016];
        assert_eq!(ino.read_at(&cache, &mut buf, 0), 3016);
        assert!(buf[..3000].iter().all(|&b| b == 0));
        assert!(buf[3000..].iter().all(|&b| b == 0x5a));
    }

    #[test]
    fn large_file_through_double_indirect() {
        let (cache, mut map) = setup();
        let mut table = InodeTable::new();
        let sector = map.allocate(1).unwrap();
        assert!(create(&cache, &mut map, sector, 0, false));
        let ino = table.open(&cache, sector);

        let chunk = vec![0xab; 4096];
        let total = 128 * 1024;
        for off in (0..total).step_by(chunk.len()) {
            assert_eq!(ino.write_at(&cache, &mut map, &chunk, off), chunk.len());
        }
        assert_eq!(ino.length(), total);

        let mut buf = vec![0u8; 4096];
        assert_eq!(ino.read_at(&cache, &mut buf, 65536), 4096);
        assert!(buf.iter().all(|&b| b == 0xab));

        // 256 data sectors: past the direct tier and into the double tier.
        let inner = ino.inner.lock();
        assert_ne!(inner.data.indirect, 0);
        assert_ne!(inner.data.dbl_indirect, 0);
        assert_eq!(inner.data.trpl_indirect, 0);
    }

    #[test]
    fn triple_indirect_walk() {
        let (cache, mut map) = setup();
        let mut table = InodeTable::new();
        let sector = map.allocate(1).unwrap();
        assert!(create(&cache, &mut map, sector, 0, false));
        let ino = table.open(&cache, sector);

        // One byte three sectors into the triple-indirect tier.
        let offset = (L2_END + 3) * SECTOR_SIZE;
        assert_eq!(ino.write_at(&cache, &mut map, &[0x42], offset), 1);

        let mut byte = [0u8];
        assert_eq!(ino.read_at(&cache, &mut byte, offset), 1);
        assert_eq!(byte[0], 0x42);
        // A neighbour in the same tier reads as zero.
        assert_eq!(ino.read_at(&cache, &mut byte, offset - SECTOR_SIZE), 1);
        assert_eq!(byte[0], 0);

        let inner = ino.inner.lock();
        assert_ne!(inner.data.trpl_indirect, 0);
        // Every mapped index below the length resolves to a real sector.
        for idx in [0, L0_END, L1_END, L2_END, L2_END + 3] {
            let s = index_to_sector(&cache, &inner.data, idx).unwrap();
            assert_ne!(s, 0, "index {idx} must be allocated");
        }
        assert!(index_to_sector(&cache, &inner.data, L3_END).is_none());
    }

    #[test]
    fn removed_inode_returns_sectors() {
        let (cache, mut map) = setup();
        let mut table = InodeTable::new();
        let sector = map.allocate(1).unwrap();
        assert!(create(&cache, &mut map, sector, 0, false));
        let ino = table.open(&cache, sector);
        assert_eq!(ino.write_at(&cache, &mut map, &[1u8; 70_000], 0), 70_000);

        let free_before_remove = map.free_count();
        ino.remove();
        table.close(&cache, &mut map, ino);
        // Inode sector + 137 data sectors + the single-indirect index sector.
        assert_eq!(map.free_count(), free_before_remove + 1 + 137 + 1);
    }

    #[test]
    fn allocation_failure_reports_false() {
        let cache = BlockCache::new(Arc::new(MemDisk::new(64)));
        let mut map = FreeMap::new(8); // far too small for the request
        for s in 0..3 {
            map.mark_used(Sector(s));
        }
        let sector = map.allocate(1).unwrap();
        assert!(!create(&cache, &mut map, sector, 1024 * 1024, false));
    }

    #[test]
    fn deny_write_counter_bounds() {
        let (cache, mut map) = setup();
        let mut table = InodeTable::new();
        let sector = map.allocate(1).unwrap();
        assert!(create(&cache, &mut map, sector, 0, false));
        let ino = table.open(&cache, sector);
        let ino2 = table.open(&cache, sector);

        ino.deny_write();
        ino2.deny_write();
        assert_eq!(ino.deny_write_cnt(), 2);
        assert!(ino.deny_write_cnt() <= ino.open_cnt());
        ino.allow_write();
        ino2.allow_write();
        assert_eq!(ino.deny_write_cnt(), 0);
        table.close(&cache, &mut map, ino2);
        table.close(&cache, &mut map, ino);
    }
}
