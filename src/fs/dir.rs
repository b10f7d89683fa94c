//! The directory layer.
//!
//! A directory is a file whose content is an array of fixed-size entries.
//! Every directory carries `.` and `..` entries (`..` of the root is the root
//! itself); they are invisible to `readdir`, refused by `remove`, and ignored
//! when deciding whether a directory is empty.

use crate::dev::block::Sector;
use crate::fs::cache::BlockCache;
use crate::fs::free_map::FreeMap;
use crate::fs::inode::InodeRef;
use alloc::string::String;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

/// Longest permitted entry name, in bytes.
pub const NAME_MAX: usize = 14;

/// Size of one on-disk directory entry.
pub const ENTRY_SIZE: usize = 20;

/// An on-disk directory entry: the name is NUL-terminated and NUL-padded.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct DirEntry {
    inode_sector: u32,
    in_use: u8,
    name: [u8; NAME_MAX + 1],
}
const_assert!(core::mem::size_of::<DirEntry>() == ENTRY_SIZE);

impl DirEntry {
    fn empty() -> DirEntry {
        DirEntry {
            inode_sector: 0,
            in_use: 0,
            name: [0; NAME_MAX + 1],
        }
    }

    fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
        &self.name[..len]
    }
}

/// Whether `name` may appear in a directory entry.
pub fn name_ok(name: &str) -> bool {
    !name.is_empty() && name.len() <= NAME_MAX && !name.contains('/')
}

/// Directory operations over an open inode.
pub struct Dir {
    inode: InodeRef,
}

impl Dir {
    /// Wraps a directory inode. Returns `None` for non-directories.
    pub fn from_inode(inode: InodeRef) -> Option<Dir> {
        inode.is_dir().then_some(Dir { inode })
    }

    /// The underlying inode.
    pub fn inode(&self) -> &InodeRef {
        &self.inode
    }

    fn entry_at(&self, cache: &BlockCache, index: usize) -> Option<DirEntry> {
        let mut entry = DirEntry::empty();
        let n = self.inode.read_at(cache, entry.as_bytes_mut(), index * ENTRY_SIZE);
        (n == ENTRY_SIZE).then_some(entry)
    }

    fn entry_count(&self) -> usize {
        self.inode.length() / ENTRY_SIZE
    }

    /// Finds the entry named `name` and returns its inode sector.
    pub fn lookup(&self, cache: &BlockCache, name: &str) -> Option<Sector> {
        for i in 0..self.entry_count() {
            let entry = self.entry_at(cache, i)?;
            if entry.in_use != 0 && entry.name_bytes() == name.as_bytes() {
                return Some(Sector(entry.inode_sector));
            }
        }
        None
    }

    /// Adds an entry mapping `name` to `sector`. Fails on an invalid or
    /// duplicate name, or when the directory file cannot grow.
    pub fn add(&self, cache: &BlockCache, free_map: &mut FreeMap, name: &str, sector: Sector) -> bool {
        if !name_ok(name) || self.lookup(cache, name).is_some() {
            return false;
        }
        let mut entry = DirEntry::empty();
        entry.inode_sector = sector.0;
        entry.in_use = 1;
        entry.name[..name.len()].copy_from_slice(name.as_bytes());

        // Reuse a dead slot if there is one, otherwise append.
        let count = self.entry_count();
        let mut index = count;
        for i in 0..count {
            if self.entry_at(cache, i).is_some_and(|e| e.in_use == 0) {
                index = i;
                break;
            }
        }
        self.inode
            .write_at(cache, free_map, entry.as_bytes(), index * ENTRY_SIZE)
            == ENTRY_SIZE
    }

    /// Removes the entry named `name`. `.` and `..` cannot be removed.
    pub fn remove_entry(&self, cache: &BlockCache, free_map: &mut FreeMap, name: &str) -> bool {
        if name == "." || name == ".." {
            return false;
        }
        for i in 0..self.entry_count() {
            let entry = match self.entry_at(cache, i) {
                Some(e) => e,
                None => return false,
            };
            if entry.in_use != 0 && entry.name_bytes() == name.as_bytes() {
                let dead = DirEntry::empty();
                return self
                    .inode
                    .write_at(cache, free_map, dead.as_bytes(), i * ENTRY_SIZE)
                    == ENTRY_SIZE;
            }
        }
        false
    }

    /// Returns the next live entry name at or after `*pos`, advancing `*pos`
    /// past it. `.` and `..` are skipped.
    pub fn read_entry(&self, cache: &BlockCache, pos: &mut usize) -> Option<String> {
        while *pos < self.entry_count() {
            let entry = self.entry_at(cache, *pos)?;
            *pos += 1;
            if entry.in_use == 0 {
                continue;
            }
            let name = entry.name_bytes();
            if name == b"." || name == b".." {
                continue;
            }
            return core::str::from_utf8(name).ok().map(String::from);
        }
        None
    }

    /// Whether the directory holds no live entries besides `.` and `..`.
    pub fn is_empty(&self, cache: &BlockCache) -> bool {
        let mut pos = 0;
        self.read_entry(cache, &mut pos).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::block::MemDisk;
    use crate::fs::inode::{self, InodeTable};
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    fn setup() -> (BlockCache, FreeMap, InodeTable, Dir) {
        let cache = BlockCache::new(Arc::new(MemDisk::new(4096)));
        let mut map = FreeMap::new(4096);
        for s in 0..3 {
            map.mark_used(Sector(s));
        }
        let mut table = InodeTable::new();
        assert!(inode::create(&cache, &mut map, Sector(2), 0, true));
        let ino = table.open(&cache, Sector(2));
        let dir = Dir::from_inode(ino).unwrap();
        assert!(dir.add(&cache, &mut map, ".", Sector(2)));
        assert!(dir.add(&cache, &mut map, "..", Sector(2)));
        (cache, map, table, dir)
    }

    #[test]
    fn add_lookup_remove() {
        let (cache, mut map, _table, dir) = setup();
        assert!(dir.add(&cache, &mut map, "hello", Sector(10)));
        assert_eq!(dir.lookup(&cache, "hello"), Some(Sector(10)));
        assert!(!dir.add(&cache, &mut map, "hello", Sector(11)), "duplicate");
        assert!(dir.remove_entry(&cache, &mut map, "hello"));
        assert_eq!(dir.lookup(&cache, "hello"), None);
        assert!(!dir.remove_entry(&cache, &mut map, "hello"));
    }

    #[test]
    fn name_limits() {
        let (cache, mut map, _table, dir) = setup();
        assert!(dir.add(&cache, &mut map, "a2345678901234", Sector(5)));
        assert!(!dir.add(&cache, &mut map, "a23456789012345", Sector(6)));
        assert!(!dir.add(&cache, &mut map, "", Sector(7)));
        assert!(!dir.add(&cache, &mut map, "a/b", Sector(8)));
    }

    #[test]
    fn readdir_skips_dot_entries() {
        let (cache, mut map, _table, dir) = setup();
        assert!(dir.is_empty(&cache));
        assert!(dir.add(&cache, &mut map, "a", Sector(10)));
        assert!(dir.add(&cache, &mut map, "b", Sector(11)));
        let mut pos = 0;
        let mut names = Vec::new();
        while let Some(name) = dir.read_entry(&cache, &mut pos) {
            names.push(name);
        }
        assert_eq!(names, ["a", "b"]);
        assert!(!dir.is_empty(&cache));
    }

    #[test]
    fn dot_entries_resolve_but_cannot_be_removed() {
        let (cache, mut map, _table, dir) = setup();
        assert_eq!(dir.lookup(&cache, "."), Some(Sector(2)));
        assert_eq!(dir.lookup(&cache, ".."), Some(Sector(2)));
        assert!(!dir.remove_entry(&cache, &mut map, "."));
        assert!(!dir.remove_entry(&cache, &mut map, ".."));
    }

    #[test]
    fn slot_reuse() {
        let (cache, mut map, _table, dir) = setup();
        assert!(dir.add(&cache, &mut map, "a", Sector(10)));
        let len_before = dir.inode().length();
        assert!(dir.remove_entry(&cache, &mut map, "a"));
        assert!(dir.add(&cache, &mut map, "b", Sector(11)));
        assert_eq!(dir.inode().length(), len_before, "dead slot is reused");
    }
}
