//! Open-file objects.
//!
//! A [`File`] pairs an open inode with a position and remembers whether this
//! particular opener has denied writes to the inode. Write denial is
//! enforced here: a write against an inode with standing denials transfers
//! nothing and changes nothing.

use crate::fs::{FileSys, inode::InodeRef};

/// An open file (or directory) handle.
pub struct File {
    inode: InodeRef,
    pos: usize,
    denying: bool,
}

impl File {
    pub(crate) fn new(inode: InodeRef) -> File {
        File {
            inode,
            pos: 0,
            denying: false,
        }
    }

    /// The underlying inode.
    pub fn inode(&self) -> &InodeRef {
        &self.inode
    }

    /// Whether this handle names a directory.
    pub fn is_dir(&self) -> bool {
        self.inode.is_dir()
    }

    /// File length in bytes.
    pub fn length(&self, _fs: &FileSys) -> usize {
        self.inode.length()
    }

    /// Sector number of the inode; the file's stable identity.
    pub fn inumber(&self) -> u32 {
        self.inode.sector().0
    }

    /// Opens an independent handle onto the same inode, positioned at 0.
    pub fn reopen(&self, fs: &FileSys) -> File {
        let st = fs.state();
        File::new(st.inodes.reopen(&self.inode))
    }

    /// Moves the position to `pos`.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// The current position.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Reads at the current position, advancing it.
    pub fn read(&mut self, fs: &FileSys, buf: &mut [u8]) -> usize {
        let n = self.read_at(fs, buf, self.pos);
        self.pos += n;
        n
    }

    /// Reads at an explicit offset without touching the position.
    pub fn read_at(&self, fs: &FileSys, buf: &mut [u8], offset: usize) -> usize {
        let _st = fs.state();
        self.inode.read_at(fs.cache(), buf, offset)
    }

    /// Writes at the current position, advancing it. Returns 0 without any
    /// state change while writes to the inode are denied.
    pub fn write(&mut self, fs: &FileSys, buf: &[u8]) -> usize {
        let n = self.write_at(fs, buf, self.pos);
        self.pos += n;
        n
    }

    /// Writes at an explicit offset without touching the position.
    pub fn write_at(&self, fs: &FileSys, buf: &[u8], offset: usize) -> usize {
        let mut st = fs.state();
        if self.inode.deny_write_cnt() > 0 {
            return 0;
        }
        self.inode.write_at(fs.cache(), &mut st.free_map, buf, offset)
    }

    /// Denies writes to the underlying inode for the lifetime of this handle.
    /// Idempotent per handle.
    pub fn deny_write(&mut self) {
        if !self.denying {
            self.denying = true;
            self.inode.deny_write();
        }
    }

    /// Withdraws this handle's write denial, if any.
    pub fn allow_write(&mut self) {
        if self.denying {
            self.denying = false;
            self.inode.allow_write();
        }
    }

    /// Closes the handle, releasing its denial and its opener reference.
    pub fn close(mut self, fs: &FileSys) {
        self.allow_write();
        fs.close_inode(self.inode.clone());
    }
}
