//! # KegOS core
//!
//! The core subsystems of a small teaching kernel, built as a hosted library:
//! the on-disk file system with a write-back sector cache, the demand-paged
//! virtual memory manager, and the validated user/kernel boundary.
//!
//! The kernel proper (scheduler, interrupt plumbing, device drivers) is out of
//! scope; everything this crate consumes from it is expressed as a narrow
//! interface:
//!
//! - [`dev::block::BlockDevice`] stands in for the raw disk driver,
//! - [`mm::palloc::Palloc`] for the physical page allocator,
//! - [`mm::pagedir::PageDir`] for the hardware page directory,
//! - [`userprog::process::Loader`] for the program loader,
//! - [`dev::console::Console`] for the keyboard and the display.
//!
//! All global state is owned by an explicit [`Kernel`] value with an
//! init/teardown lifecycle; there are no hidden singletons. Tests drive the
//! whole stack on the host with in-memory devices.
//!
//! ## Lock order
//!
//! A holder of a lock may only take locks that appear to the right of it:
//!
//! ```text
//! process table -> paging lock -> frame table -> swap
//!                              -> file-system state -> block cache
//! ```
//!
//! No component reaches back up the chain.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod addr;
pub mod dev;
pub mod fixed;
pub mod fs;
pub mod klog;
pub mod mm;
pub mod sync;
pub mod userprog;

use alloc::sync::Arc;
use core::sync::atomic::AtomicBool;

/// Errors the kernel can surface to a caller.
///
/// File-system internals report failure through booleans and sentinel values;
/// this enum exists at the seams where a failure reason has to travel (system
/// call handlers, user-memory access). The system call dispatcher converts
/// every variant into the conventional user-visible encoding (`-1`, `0` or
/// `false`); only [`KernelError::InvalidUserPointer`] additionally terminates
/// the offending process with status `-1`.
///
/// Invariant violations are not errors: they are bugs, and the kernel asserts
/// on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A user-supplied address failed validation.
    InvalidUserPointer,
    /// Writing to a read-only page, or to a file with writes denied.
    PermissionDenied,
    /// No free sector, frame, swap slot or file descriptor.
    OutOfResource,
    /// Inode, file, directory or descriptor is absent.
    NotFound,
    /// `create` or `mkdir` on an existing name.
    AlreadyExists,
}

/// Identifier of a kernel thread.
///
/// User processes are single-threaded, so this doubles as the process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tid(pub u32);

/// The assembled kernel: every process-wide structure, owned in one place and
/// passed by reference through the subsystem APIs.
pub struct Kernel {
    /// The mounted file system (block cache, free map, open-inode table).
    pub fsys: fs::FileSys,
    /// Virtual memory: frame pool, frame table, swap and the address-space
    /// registry.
    pub vm: mm::Vm,
    /// The process table.
    pub procs: userprog::process::ProcessTable,
    /// Console input queue and output sink for the standard descriptors.
    pub console: dev::console::Console,
    /// Program loader consumed by `exec`, installed by the embedder.
    pub loader: Option<Arc<dyn userprog::process::Loader>>,
    /// Set by the `halt` system call.
    pub powered_off: AtomicBool,
}

impl Kernel {
    /// Assembles a kernel from a mounted file system and a VM configuration.
    pub fn new(fsys: fs::FileSys, vm: mm::Vm) -> Self {
        Kernel {
            fsys,
            vm,
            procs: userprog::process::ProcessTable::new(),
            console: dev::console::Console::new(),
            loader: None,
            powered_off: AtomicBool::new(false),
        }
    }

    /// Installs the program loader used by `exec`.
    pub fn set_loader(&mut self, loader: Arc<dyn userprog::process::Loader>) {
        self.loader = Some(loader);
    }

    /// Flushes all file-system state to disk. The kernel must not be used
    /// afterwards.
    pub fn shutdown(&self) {
        self.fsys.close();
    }
}
