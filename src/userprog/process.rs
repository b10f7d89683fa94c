//! Process bookkeeping.
//!
//! A process owns its file-descriptor table, its working directory and its
//! address space (held in the VM registry under the same id). Descriptors 0
//! and 1 are the console and never appear in the table; real files get the
//! lowest free descriptor from 2 up.
//!
//! `exec` consumes the installed [`Loader`]: the loader builds the child's
//! address space (typically mapping executable segments through the mmap
//! manager) and reports success. The load-completion handshake is
//! synchronous here — the parent observes either a fully loaded child or
//! `-1`, never anything in between. `wait` collects a child's exit status
//! exactly once.
//!
//! Teardown on exit is ordered so nothing leaks: mappings are dissolved
//! (writing dirty pages back), the supplemental page table releases frames
//! and swap slots, and open files and the working directory are closed.

use crate::fs::file::File;
use crate::fs::inode::InodeRef;
use crate::sync::{SpinLock, SpinLockGuard};
use crate::{Kernel, KernelError, Tid};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

/// Lowest descriptor handed to an opened file.
pub const FIRST_FILE_FD: i32 = 2;
/// Most files a process may hold open.
pub const MAX_OPEN_FILES: usize = 128;

/// Builds a child's address space for `exec`; returns whether the load
/// succeeded.
pub trait Loader: Send + Sync {
    /// Loads `cmd` into the process `pid`, whose empty address space already
    /// exists.
    fn load(&self, kernel: &Kernel, pid: Tid, cmd: &str) -> bool;
}

/// Per-process kernel state.
pub struct Process {
    /// Process id; also names its address space and frame ownership.
    pub pid: Tid,
    /// The process that spawned this one.
    pub parent: Option<Tid>,
    /// Open files, keyed by descriptor.
    pub files: BTreeMap<i32, File>,
    /// Working directory; `None` means the root.
    pub cwd: Option<InodeRef>,
    /// Exit status, once the process has exited.
    pub exit_status: Option<i32>,
}

impl Process {
    /// Installs `file` at the lowest free descriptor. A full table hands the
    /// file back so the caller can close it.
    pub fn install_file(&mut self, file: File) -> Result<i32, File> {
        if self.files.len() >= MAX_OPEN_FILES {
            return Err(file);
        }
        let mut fd = FIRST_FILE_FD;
        while self.files.contains_key(&fd) {
            fd += 1;
        }
        self.files.insert(fd, file);
        Ok(fd)
    }

    /// The open file behind `fd`.
    pub fn file_mut(&mut self, fd: i32) -> Result<&mut File, KernelError> {
        self.files.get_mut(&fd).ok_or(KernelError::NotFound)
    }
}

/// All processes, keyed by pid. Exited processes linger as zombies until
/// their parent collects them.
pub struct ProcessTable {
    inner: SpinLock<BTreeMap<u32, Process>>,
    next_pid: AtomicU32,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// An empty table.
    pub fn new() -> Self {
        ProcessTable {
            inner: SpinLock::new(BTreeMap::new()),
            next_pid: AtomicU32::new(1),
        }
    }

    fn alloc_pid(&self) -> Tid {
        Tid(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn lock(&self) -> SpinLockGuard<'_, BTreeMap<u32, Process>> {
        self.inner.lock()
    }
}

impl Kernel {
    /// Creates a process with an empty address space. The child inherits the
    /// parent's working directory.
    pub fn spawn(&self, parent: Option<Tid>) -> Tid {
        let pid = self.procs.alloc_pid();
        self.vm.create_space(pid);
        let cwd = {
            let procs = self.procs.lock();
            parent
                .and_then(|p| procs.get(&p.0))
                .and_then(|p| p.cwd.as_ref())
                .map(|d| self.fsys.reopen_inode(d))
        };
        let mut procs = self.procs.lock();
        procs.insert(
            pid.0,
            Process {
                pid,
                parent,
                files: BTreeMap::new(),
                cwd,
                exit_status: None,
            },
        );
        pid
    }

    /// Runs `cmd` as a child of `parent` through the installed loader.
    /// Returns the child pid, or -1 when there is no loader or the load
    /// fails.
    pub fn exec(&self, parent: Tid, cmd: &str) -> i32 {
        let Some(loader) = self.loader.clone() else {
            return -1;
        };
        let child = self.spawn(Some(parent));
        if loader.load(self, child, cmd) {
            crate::kinfo!("{}: exec '{}' -> pid {}", parent.0, cmd, child.0);
            child.0 as i32
        } else {
            // The child never ran; erase it completely.
            self.exit(child, -1);
            self.procs.lock().remove(&child.0);
            -1
        }
    }

    /// Terminates `pid` with `status`, releasing every resource it holds.
    /// The table entry stays behind as a zombie for the parent to collect.
    pub fn exit(&self, pid: Tid, status: i32) {
        let (files, cwd) = {
            let mut procs = self.procs.lock();
            let Some(proc) = procs.get_mut(&pid.0) else {
                return;
            };
            if proc.exit_status.is_some() {
                return;
            }
            proc.exit_status = Some(status);
            let files = core::mem::take(&mut proc.files);
            let cwd = proc.cwd.take();

            // This process will never wait again; drop its zombie children.
            let zombies: Vec<u32> = procs
                .iter()
                .filter(|(_, p)| p.parent == Some(pid) && p.exit_status.is_some())
                .map(|(id, _)| *id)
                .collect();
            for z in zombies {
                procs.remove(&z);
            }
            (files, cwd)
        };

        self.vm.destroy_space(&self.fsys, pid);
        for (_, file) in files {
            file.close(&self.fsys);
        }
        if let Some(dir) = cwd {
            self.fsys.close_inode(dir);
        }
        crate::kinfo!("{}: exit({})", pid.0, status);
    }

    /// Collects the exit status of a child, or -1 if `child` is not an
    /// unwaited child of `parent` that has exited.
    pub fn wait(&self, parent: Tid, child: Tid) -> i32 {
        let mut procs = self.procs.lock();
        let collectable = procs
            .get(&child.0)
            .is_some_and(|p| p.parent == Some(parent) && p.exit_status.is_some());
        if !collectable {
            return -1;
        }
        let proc = procs.remove(&child.0).unwrap();
        proc.exit_status.unwrap()
    }
}
