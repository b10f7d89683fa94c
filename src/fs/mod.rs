//! The file system.
//!
//! Layering, top to bottom:
//!
//! ```text
//! FileSys (facade: paths, create/open/remove/mkdir/chdir)
//!   ├── fs::file  open-file objects, deny-write enforcement
//!   ├── fs::dir   name -> inode entries
//!   ├── fs::inode multi-level indexed inodes
//!   ├── fs::free_map  sector bitmap
//!   └── fs::cache write-back sector cache
//! ```
//!
//! The facade serializes all operations with one coarse lock over the mutable
//! file-system state (free map and open-inode table); the cache keeps its own
//! lock below it. Absolute paths resolve from the root directory, relative
//! paths from the caller's working directory. A trailing slash is accepted;
//! any other empty component is rejected.
//!
//! Persistent layout: sector 0 is reserved, sector 1 holds the free-map
//! inode, sector 2 the root directory inode.

pub mod cache;
pub mod dir;
pub mod file;
pub mod free_map;
pub mod inode;

use crate::dev::block::{BlockDevice, Sector};
use crate::sync::{SpinLock, SpinLockGuard};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use cache::BlockCache;
use dir::Dir;
use file::File;
use free_map::FreeMap;
use inode::{InodeRef, InodeTable};

/// Reserved boot sector.
pub const RESERVED_SECTOR: Sector = Sector(0);
/// Sector of the free-map inode.
pub const FREE_MAP_SECTOR: Sector = Sector(1);
/// Sector of the root directory inode.
pub const ROOT_DIR_SECTOR: Sector = Sector(2);

/// Mutable file-system state, guarded by the file-system lock.
pub struct FsState {
    /// The free-sector bitmap.
    pub free_map: FreeMap,
    /// The open-inode table.
    pub inodes: InodeTable,
}

/// The mounted file system.
pub struct FileSys {
    cache: BlockCache,
    state: SpinLock<FsState>,
}

impl FileSys {
    /// Creates a fresh file system on `dev`: free map, root directory, and
    /// their on-disk images.
    pub fn format(dev: Arc<dyn BlockDevice>) -> FileSys {
        let sectors = dev.sector_count();
        let cache = BlockCache::new(dev);
        let mut free_map = FreeMap::new(sectors);
        free_map.mark_used(RESERVED_SECTOR);
        free_map.mark_used(FREE_MAP_SECTOR);
        free_map.mark_used(ROOT_DIR_SECTOR);

        let mut inodes = InodeTable::new();
        assert!(
            inode::create(&cache, &mut free_map, ROOT_DIR_SECTOR, 0, true),
            "cannot create root directory"
        );
        let root = inodes.open(&cache, ROOT_DIR_SECTOR);
        let root_dir = Dir::from_inode(root).unwrap();
        assert!(root_dir.add(&cache, &mut free_map, ".", ROOT_DIR_SECTOR));
        assert!(root_dir.add(&cache, &mut free_map, "..", ROOT_DIR_SECTOR));

        // The free map lives in an ordinary file; size it for one bit per
        // sector before snapshotting it, so its own data sectors are marked.
        let map_len = free_map.byte_len() as u32;
        assert!(
            inode::create(&cache, &mut free_map, FREE_MAP_SECTOR, map_len, false),
            "cannot create free-map file"
        );
        let map_inode = inodes.open(&cache, FREE_MAP_SECTOR);
        let snapshot = free_map.to_bytes();
        assert_eq!(
            map_inode.write_at(&cache, &mut free_map, &snapshot, 0),
            snapshot.len()
        );

        let fs = FileSys {
            cache,
            state: SpinLock::new(FsState { free_map, inodes }),
        };
        crate::kinfo!("filesys: formatted {} sectors", sectors);
        fs
    }

    /// Mounts an existing file system from `dev`.
    pub fn mount(dev: Arc<dyn BlockDevice>) -> FileSys {
        let sectors = dev.sector_count();
        let cache = BlockCache::new(dev);
        let mut inodes = InodeTable::new();
        let map_inode = inodes.open(&cache, FREE_MAP_SECTOR);
        let mut bytes = alloc::vec![0u8; map_inode.length()];
        assert_eq!(map_inode.read_at(&cache, &mut bytes, 0), bytes.len());
        let free_map = FreeMap::from_bytes(sectors, &bytes);
        FileSys {
            cache,
            state: SpinLock::new(FsState { free_map, inodes }),
        }
    }

    /// Flushes the free map and every dirty cache slot to disk.
    pub fn close(&self) {
        let mut st = self.state.lock();
        let map_inode = st.inodes.open(&self.cache, FREE_MAP_SECTOR);
        let snapshot = st.free_map.to_bytes();
        map_inode.write_at(&self.cache, &mut st.free_map, &snapshot, 0);
        self.close_locked(&mut st, map_inode);
        drop(st);
        self.cache.close();
    }

    /// The sector cache.
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub(crate) fn state(&self) -> SpinLockGuard<'_, FsState> {
        self.state.lock()
    }

    /// Splits a path into components. Accepts one trailing slash; rejects
    /// empty components and the empty path.
    fn split_path(path: &str) -> Option<(bool, Vec<&str>)> {
        if path.is_empty() {
            return None;
        }
        let absolute = path.starts_with('/');
        let body = if absolute { &path[1..] } else { path };
        let mut comps: Vec<&str> = body.split('/').collect();
        if comps.last() == Some(&"") {
            comps.pop();
        }
        if comps.iter().any(|c| c.is_empty()) {
            return None;
        }
        Some((absolute, comps))
    }

    /// Opens the directory resolution starts from.
    fn start_dir(&self, st: &mut FsState, cwd: Option<&InodeRef>, absolute: bool) -> InodeRef {
        match cwd {
            Some(dir) if !absolute => st.inodes.reopen(dir),
            _ => st.inodes.open(&self.cache, ROOT_DIR_SECTOR),
        }
    }

    /// Walks `comps`, returning the final inode (with an open reference).
    fn walk(&self, st: &mut FsState, mut cur: InodeRef, comps: &[&str]) -> Option<InodeRef> {
        for comp in comps {
            let dir = match Dir::from_inode(cur.clone()) {
                Some(d) => d,
                None => {
                    self.close_locked(st, cur);
                    return None;
                }
            };
            let next = dir.lookup(&self.cache, comp);
            self.close_locked(st, cur);
            let sector = next?;
            cur = st.inodes.open(&self.cache, sector);
        }
        Some(cur)
    }

    fn close_locked(&self, st: &mut FsState, ino: InodeRef) {
        let FsState { free_map, inodes } = st;
        inodes.close(&self.cache, free_map, ino);
    }

    /// Resolves `path` to its parent directory and final component.
    fn resolve_parent<'p>(
        &self,
        st: &mut FsState,
        cwd: Option<&InodeRef>,
        path: &'p str,
    ) -> Option<(Dir, &'p str)> {
        let (absolute, comps) = Self::split_path(path)?;
        let (name, dir_comps) = comps.split_last()?;
        let start = self.start_dir(st, cwd, absolute);
        let parent = self.walk(st, start, dir_comps)?;
        match Dir::from_inode(parent.clone()) {
            Some(d) => Some((d, name)),
            None => {
                self.close_locked(st, parent);
                None
            }
        }
    }

    /// Opens `path` as a file or directory handle.
    pub fn open(&self, cwd: Option<&InodeRef>, path: &str) -> Option<File> {
        let mut st = self.state.lock();
        let (absolute, comps) = Self::split_path(path)?;
        let start = self.start_dir(&mut st, cwd, absolute);
        let inode = self.walk(&mut st, start, &comps)?;
        Some(File::new(inode))
    }

    /// Creates a regular file of `initial_size` bytes at `path`.
    pub fn create(&self, cwd: Option<&InodeRef>, path: &str, initial_size: u32) -> bool {
        let mut st = self.state.lock();
        let Some((parent, name)) = self.resolve_parent(&mut st, cwd, path) else {
            return false;
        };
        let ok = self.create_in(&mut st, &parent, name, initial_size, false);
        self.close_locked(&mut st, parent.inode().clone());
        ok
    }

    /// Creates a directory at `path`, populated with `.` and `..`.
    pub fn mkdir(&self, cwd: Option<&InodeRef>, path: &str) -> bool {
        let mut st = self.state.lock();
        let Some((parent, name)) = self.resolve_parent(&mut st, cwd, path) else {
            return false;
        };
        let ok = self.create_in(&mut st, &parent, name, 0, true);
        self.close_locked(&mut st, parent.inode().clone());
        ok
    }

    fn create_in(
        &self,
        st: &mut FsState,
        parent: &Dir,
        name: &str,
        initial_size: u32,
        is_dir: bool,
    ) -> bool {
        if !dir::name_ok(name) || parent.lookup(&self.cache, name).is_some() {
            return false;
        }
        let Some(sector) = st.free_map.allocate(1) else {
            return false;
        };
        if !inode::create(&self.cache, &mut st.free_map, sector, initial_size, is_dir) {
            st.free_map.release(sector, 1);
            return false;
        }
        let child = st.inodes.open(&self.cache, sector);
        let mut ok = true;
        if is_dir {
            let child_dir = Dir::from_inode(child.clone()).unwrap();
            ok = child_dir.add(&self.cache, &mut st.free_map, ".", sector)
                && child_dir.add(
                    &self.cache,
                    &mut st.free_map,
                    "..",
                    parent.inode().sector(),
                );
        }
        ok = ok && parent.add(&self.cache, &mut st.free_map, name, sector);
        if !ok {
            // Roll the half-made inode back through the removal path.
            child.remove();
        }
        self.close_locked(st, child);
        ok
    }

    /// Removes the file or directory at `path`.
    ///
    /// A directory must be empty and must have no other openers (a process
    /// whose working directory it is holds it open).
    pub fn remove(&self, cwd: Option<&InodeRef>, path: &str) -> bool {
        let mut st = self.state.lock();
        let Some((parent, name)) = self.resolve_parent(&mut st, cwd, path) else {
            return false;
        };
        let ok = self.remove_in(&mut st, &parent, name);
        self.close_locked(&mut st, parent.inode().clone());
        ok
    }

    fn remove_in(&self, st: &mut FsState, parent: &Dir, name: &str) -> bool {
        let Some(sector) = parent.lookup(&self.cache, name) else {
            return false;
        };
        let target = st.inodes.open(&self.cache, sector);
        let mut ok = true;
        if target.is_dir() {
            let dir = Dir::from_inode(target.clone()).unwrap();
            ok = dir.is_empty(&self.cache) && target.open_cnt() == 1;
        }
        ok = ok && parent.remove_entry(&self.cache, &mut st.free_map, name);
        if ok {
            target.remove();
        }
        self.close_locked(st, target);
        ok
    }

    /// Opens `path` as a directory inode, for use as a working directory.
    pub fn open_dir(&self, cwd: Option<&InodeRef>, path: &str) -> Option<InodeRef> {
        let mut st = self.state.lock();
        let (absolute, comps) = Self::split_path(path)?;
        let start = self.start_dir(&mut st, cwd, absolute);
        let inode = self.walk(&mut st, start, &comps)?;
        if inode.is_dir() {
            Some(inode)
        } else {
            self.close_locked(&mut st, inode);
            None
        }
    }

    /// Opens another reference to an already-open inode.
    pub fn reopen_inode(&self, inode: &InodeRef) -> InodeRef {
        self.state.lock().inodes.reopen(inode)
    }

    /// Closes an inode reference obtained from this file system.
    pub fn close_inode(&self, inode: InodeRef) {
        let mut st = self.state.lock();
        self.close_locked(&mut st, inode);
    }

    /// Reads the next directory entry of an open directory handle, skipping
    /// `.` and `..`.
    pub fn readdir(&self, file: &mut File) -> Option<String> {
        let _st = self.state.lock();
        let dir = Dir::from_inode(file.inode().clone())?;
        let mut pos = file.tell();
        let name = dir.read_entry(&self.cache, &mut pos);
        file.seek(pos);
        name
    }

    /// Number of free sectors; test and diagnostic aid.
    pub fn free_sectors(&self) -> u32 {
        self.state.lock().free_map.free_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::block::MemDisk;
    use alloc::sync::Arc;
    use alloc::vec;

    fn fresh() -> FileSys {
        FileSys::format(Arc::new(MemDisk::new(8192)))
    }

    #[test]
    fn create_open_in_root() {
        let fs = fresh();
        assert!(fs.create(None, "a", 600));
        assert!(!fs.create(None, "a", 0), "duplicate name");
        let f = fs.open(None, "a").unwrap();
        assert_eq!(f.length(&fs), 600);
        f.close(&fs);
        assert!(fs.open(None, "missing").is_none());
    }

    #[test]
    fn path_component_rules() {
        let fs = fresh();
        assert!(fs.mkdir(None, "d"));
        assert!(fs.create(None, "/d/f", 0));
        assert!(fs.open(None, "d/f").is_some());
        assert!(fs.open(None, "d/").is_some(), "trailing slash");
        assert!(fs.open(None, "d//f").is_none(), "empty component");
        assert!(fs.open(None, "").is_none(), "empty path");
        assert!(fs.open(None, "/").is_some(), "root itself");
    }

    #[test]
    fn relative_paths_use_cwd() {
        let fs = fresh();
        assert!(fs.mkdir(None, "d"));
        let d = fs.open_dir(None, "d").unwrap();
        assert!(fs.create(Some(&d), "f", 10));
        assert!(fs.open(None, "/d/f").is_some());
        assert!(fs.open(Some(&d), "f").is_some());
        assert!(fs.open(Some(&d), "/f").is_none(), "absolute ignores cwd");
        // `..` climbs back to the root.
        assert!(fs.create(Some(&d), "../top", 0));
        assert!(fs.open(None, "/top").is_some());
        fs.close_inode(d);
    }

    #[test]
    fn directory_removal_rules() {
        let fs = fresh();
        assert!(fs.mkdir(None, "d"));
        assert!(fs.create(None, "d/f", 10));
        assert!(!fs.remove(None, "d"), "non-empty directory");
        assert!(fs.remove(None, "d/f"));
        assert!(fs.remove(None, "d"));
        assert!(fs.open(None, "d").is_none());
    }

    #[test]
    fn cwd_blocks_removal() {
        let fs = fresh();
        assert!(fs.mkdir(None, "d"));
        let cwd = fs.open_dir(None, "d").unwrap();
        assert!(!fs.remove(None, "d"), "held as working directory");
        fs.close_inode(cwd);
        assert!(fs.remove(None, "d"));
    }

    #[test]
    fn removed_file_sectors_return_after_last_close() {
        let fs = fresh();
        assert!(fs.create(None, "a", 4096));
        let free_before = fs.free_sectors();
        let f = fs.open(None, "a").unwrap();
        assert!(fs.remove(None, "a"));
        assert!(fs.open(None, "a").is_none(), "name is gone immediately");
        assert_eq!(fs.free_sectors(), free_before, "still open, not reclaimed");
        f.close(&fs);
        // 8 data sectors plus the inode sector itself.
        assert_eq!(fs.free_sectors(), free_before + 9);
    }

    #[test]
    fn mount_sees_formatted_state() {
        let disk = Arc::new(MemDisk::new(8192));
        {
            let fs = FileSys::format(disk.clone());
            assert!(fs.create(None, "persist", 0));
            let mut f = fs.open(None, "persist").unwrap();
            assert_eq!(f.write(&fs, b"payload"), 7);
            f.close(&fs);
            fs.close();
        }
        let fs = FileSys::mount(disk);
        let mut f = fs.open(None, "persist").unwrap();
        let mut buf = vec![0u8; 7];
        assert_eq!(f.read(&fs, &mut buf), 7);
        assert_eq!(&buf, b"payload");
        f.close(&fs);
        // The free map must still know the file's sectors are taken.
        let before = fs.free_sectors();
        assert!(fs.remove(None, "persist"));
        assert!(fs.free_sectors() > before);
    }
}
