//! System-call numbers and dispatch.
//!
//! A user trap delivers the stack pointer; the call number sits at `esp` and
//! the arguments at `esp + 4`, `esp + 8`, `esp + 12`, all fetched through
//! the validated copy helpers. Every user pointer is checked before it is
//! dereferenced; a bad pointer terminates the process with status -1.
//! Recoverable failures (missing files, bad descriptors, exhausted
//! resources) come back as `-1`, `0` or `false` in the conventional
//! encoding.
//!
//! File-system calls are serialized by the file-system lock inside the
//! facade; console reads and writes bypass it.

use crate::addr::{PAGE_SIZE, Va};
use crate::fs::dir::NAME_MAX;
use crate::userprog::uaccess;
use crate::{Kernel, KernelError, Tid};
use alloc::string::String;
use alloc::vec;
use core::sync::atomic::Ordering;

pub const SYS_HALT: u32 = 0;
pub const SYS_EXIT: u32 = 1;
pub const SYS_EXEC: u32 = 2;
pub const SYS_WAIT: u32 = 3;
pub const SYS_CREATE: u32 = 4;
pub const SYS_REMOVE: u32 = 5;
pub const SYS_OPEN: u32 = 6;
pub const SYS_FILESIZE: u32 = 7;
pub const SYS_READ: u32 = 8;
pub const SYS_WRITE: u32 = 9;
pub const SYS_SEEK: u32 = 10;
pub const SYS_TELL: u32 = 11;
pub const SYS_CLOSE: u32 = 12;
pub const SYS_MMAP: u32 = 13;
pub const SYS_MUNMAP: u32 = 14;
pub const SYS_CHDIR: u32 = 15;
pub const SYS_MKDIR: u32 = 16;
pub const SYS_READDIR: u32 = 17;
pub const SYS_ISDIR: u32 = 18;
pub const SYS_INUMBER: u32 = 19;

/// What the trap returns to the outside world.
#[derive(Debug, PartialEq, Eq)]
pub enum Control {
    /// The call completed; resume the process with this return value.
    Resume(i32),
    /// The process terminated with this status.
    Exit(i32),
    /// The machine is powering off.
    Halt,
}

enum Flow {
    /// Kill the process with status -1 (invalid user memory).
    Kill,
    /// `exit` ran; the process is gone.
    Exited(i32),
    /// `halt` ran.
    Halted,
}

impl From<KernelError> for Flow {
    fn from(_: KernelError) -> Flow {
        // Every error that escapes a handler came from user-memory
        // validation; anything recoverable was already encoded in the
        // return value.
        Flow::Kill
    }
}

impl Kernel {
    /// Handles the system-call trap for `pid` with user stack pointer `esp`.
    pub fn syscall(&self, pid: Tid, esp: Va) -> Control {
        match self.dispatch(pid, esp) {
            Ok(value) => Control::Resume(value),
            Err(Flow::Kill) => {
                self.exit(pid, -1);
                Control::Exit(-1)
            }
            Err(Flow::Exited(status)) => Control::Exit(status),
            Err(Flow::Halted) => Control::Halt,
        }
    }

    /// Fetches the `idx`-th 32-bit word of the call frame (0 is the number).
    fn usr_arg(&self, pid: Tid, esp: Va, idx: usize) -> Result<u32, KernelError> {
        uaccess::read_user_u32(self, pid, Va(esp.0 + 4 * idx), esp)
    }

    fn usr_str(&self, pid: Tid, esp: Va, idx: usize) -> Result<String, KernelError> {
        let ptr = self.usr_arg(pid, esp, idx)?;
        uaccess::read_user_cstr(self, pid, Va(ptr as usize), esp)
    }

    fn dispatch(&self, pid: Tid, esp: Va) -> Result<i32, Flow> {
        let nr = self.usr_arg(pid, esp, 0).map_err(Flow::from)?;
        match nr {
            SYS_HALT => {
                self.powered_off.store(true, Ordering::SeqCst);
                Err(Flow::Halted)
            }
            SYS_EXIT => {
                let status = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
                self.exit(pid, status);
                Err(Flow::Exited(status))
            }
            SYS_EXEC => {
                let cmd = self.usr_str(pid, esp, 1).map_err(Flow::from)?;
                Ok(self.exec(pid, &cmd))
            }
            SYS_WAIT => {
                let child = self.usr_arg(pid, esp, 1).map_err(Flow::from)?;
                Ok(self.wait(pid, Tid(child)))
            }
            SYS_CREATE => {
                let name = self.usr_str(pid, esp, 1).map_err(Flow::from)?;
                let size = self.usr_arg(pid, esp, 2).map_err(Flow::from)?;
                let procs = self.procs.lock();
                let cwd = procs.get(&pid.0).and_then(|p| p.cwd.as_ref());
                Ok(self.fsys.create(cwd, &name, size) as i32)
            }
            SYS_REMOVE => {
                let name = self.usr_str(pid, esp, 1).map_err(Flow::from)?;
                let procs = self.procs.lock();
                let cwd = procs.get(&pid.0).and_then(|p| p.cwd.as_ref());
                Ok(self.fsys.remove(cwd, &name) as i32)
            }
            SYS_OPEN => {
                let name = self.usr_str(pid, esp, 1).map_err(Flow::from)?;
                let mut procs = self.procs.lock();
                let Some(proc) = procs.get_mut(&pid.0) else {
                    return Ok(-1);
                };
                let Some(file) = self.fsys.open(proc.cwd.as_ref(), &name) else {
                    return Ok(-1);
                };
                match proc.install_file(file) {
                    Ok(fd) => Ok(fd),
                    Err(file) => {
                        file.close(&self.fsys);
                        Ok(-1)
                    }
                }
            }
            SYS_FILESIZE => {
                let fd = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
                let mut procs = self.procs.lock();
                let Some(proc) = procs.get_mut(&pid.0) else {
                    return Ok(-1);
                };
                match proc.file_mut(fd) {
                    Ok(file) => Ok(file.length(&self.fsys) as i32),
                    Err(_) => Ok(-1),
                }
            }
            SYS_READ => self.sys_read(pid, esp),
            SYS_WRITE => self.sys_write(pid, esp),
            SYS_SEEK => {
                let fd = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
                let pos = self.usr_arg(pid, esp, 2).map_err(Flow::from)?;
                let mut procs = self.procs.lock();
                let Some(proc) = procs.get_mut(&pid.0) else {
                    return Ok(-1);
                };
                match proc.file_mut(fd) {
                    Ok(file) => {
                        file.seek(pos as usize);
                        Ok(0)
                    }
                    Err(_) => Ok(-1),
                }
            }
            SYS_TELL => {
                let fd = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
                let mut procs = self.procs.lock();
                let Some(proc) = procs.get_mut(&pid.0) else {
                    return Ok(-1);
                };
                match proc.file_mut(fd) {
                    Ok(file) => Ok(file.tell() as i32),
                    Err(_) => Ok(-1),
                }
            }
            SYS_CLOSE => {
                let fd = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
                let mut procs = self.procs.lock();
                let Some(proc) = procs.get_mut(&pid.0) else {
                    return Ok(-1);
                };
                match proc.files.remove(&fd) {
                    Some(file) => {
                        file.close(&self.fsys);
                        Ok(0)
                    }
                    None => Ok(-1),
                }
            }
            SYS_MMAP => self.sys_mmap(pid, esp),
            SYS_MUNMAP => {
                let mapid = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
                let segment = self
                    .vm
                    .mmap_handle(pid, mapid)
                    .is_some_and(|mh| mh.is_segment);
                if segment {
                    return Ok(-1);
                }
                Ok(if self.vm.munmap(&self.fsys, pid, mapid) {
                    0
                } else {
                    -1
                })
            }
            SYS_CHDIR => {
                let name = self.usr_str(pid, esp, 1).map_err(Flow::from)?;
                let mut procs = self.procs.lock();
                let Some(proc) = procs.get_mut(&pid.0) else {
                    return Ok(0);
                };
                match self.fsys.open_dir(proc.cwd.as_ref(), &name) {
                    Some(dir) => {
                        if let Some(old) = proc.cwd.replace(dir) {
                            self.fsys.close_inode(old);
                        }
                        Ok(1)
                    }
                    None => Ok(0),
                }
            }
            SYS_MKDIR => {
                let name = self.usr_str(pid, esp, 1).map_err(Flow::from)?;
                let procs = self.procs.lock();
                let cwd = procs.get(&pid.0).and_then(|p| p.cwd.as_ref());
                Ok(self.fsys.mkdir(cwd, &name) as i32)
            }
            SYS_READDIR => self.sys_readdir(pid, esp),
            SYS_ISDIR => {
                let fd = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
                let mut procs = self.procs.lock();
                let Some(proc) = procs.get_mut(&pid.0) else {
                    return Ok(0);
                };
                match proc.file_mut(fd) {
                    Ok(file) => Ok(file.is_dir() as i32),
                    Err(_) => Ok(0),
                }
            }
            SYS_INUMBER => {
                let fd = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
                let mut procs = self.procs.lock();
                let Some(proc) = procs.get_mut(&pid.0) else {
                    return Ok(-1);
                };
                match proc.file_mut(fd) {
                    Ok(file) => Ok(file.inumber() as i32),
                    Err(_) => Ok(-1),
                }
            }
            _ => Err(Flow::Kill),
        }
    }

    fn sys_read(&self, pid: Tid, esp: Va) -> Result<i32, Flow> {
        let fd = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
        let buf = self.usr_arg(pid, esp, 2).map_err(Flow::from)? as usize;
        let size = self.usr_arg(pid, esp, 3).map_err(Flow::from)? as usize;
        if !uaccess::check_user(&self.vm, pid, Va(buf), size, true, esp) {
            return Err(Flow::Kill);
        }
        match fd {
            0 => {
                // Console input bypasses the file system entirely.
                let mut tmp = vec![0u8; size];
                let n = self.console.read(&mut tmp);
                uaccess::copy_out(self, pid, Va(buf), &tmp[..n], esp).map_err(Flow::from)?;
                Ok(n as i32)
            }
            1 => Ok(-1),
            _ => {
                let mut procs = self.procs.lock();
                let Some(proc) = procs.get_mut(&pid.0) else {
                    return Ok(-1);
                };
                let Ok(file) = proc.file_mut(fd) else {
                    return Ok(-1);
                };
                if file.is_dir() {
                    return Ok(-1);
                }
                let mut tmp = vec![0u8; size];
                let n = file.read(&self.fsys, &mut tmp);
                uaccess::copy_out(self, pid, Va(buf), &tmp[..n], esp).map_err(Flow::from)?;
                Ok(n as i32)
            }
        }
    }

    fn sys_write(&self, pid: Tid, esp: Va) -> Result<i32, Flow> {
        let fd = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
        let buf = self.usr_arg(pid, esp, 2).map_err(Flow::from)? as usize;
        let size = self.usr_arg(pid, esp, 3).map_err(Flow::from)? as usize;
        let data = uaccess::copy_in(self, pid, Va(buf), size, esp).map_err(Flow::from)?;
        match fd {
            1 => {
                self.console.write(&data);
                Ok(size as i32)
            }
            0 => Ok(-1),
            _ => {
                let mut procs = self.procs.lock();
                let Some(proc) = procs.get_mut(&pid.0) else {
                    return Ok(-1);
                };
                let Ok(file) = proc.file_mut(fd) else {
                    return Ok(-1);
                };
                if file.is_dir() {
                    return Ok(-1);
                }
                Ok(file.write(&self.fsys, &data) as i32)
            }
        }
    }

    fn sys_mmap(&self, pid: Tid, esp: Va) -> Result<i32, Flow> {
        let fd = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
        let addr = self.usr_arg(pid, esp, 2).map_err(Flow::from)? as usize;
        if fd < 2 || addr == 0 || !addr.is_multiple_of(PAGE_SIZE) {
            return Ok(-1);
        }
        let reopened = {
            let mut procs = self.procs.lock();
            let Some(proc) = procs.get_mut(&pid.0) else {
                return Ok(-1);
            };
            let Ok(file) = proc.file_mut(fd) else {
                return Ok(-1);
            };
            if file.is_dir() {
                return Ok(-1);
            }
            // The mapping outlives the descriptor.
            file.reopen(&self.fsys)
        };
        match self.vm.mmap(&self.fsys, pid, reopened, Va(addr)) {
            Some(mapid) => Ok(mapid),
            None => Ok(-1),
        }
    }

    fn sys_readdir(&self, pid: Tid, esp: Va) -> Result<i32, Flow> {
        let fd = self.usr_arg(pid, esp, 1).map_err(Flow::from)? as i32;
        let name_out = self.usr_arg(pid, esp, 2).map_err(Flow::from)? as usize;
        // The caller must supply room for a full name and its terminator.
        if !uaccess::check_user(&self.vm, pid, Va(name_out), NAME_MAX + 1, true, esp) {
            return Err(Flow::Kill);
        }
        let mut procs = self.procs.lock();
        let Some(proc) = procs.get_mut(&pid.0) else {
            return Ok(0);
        };
        let Ok(file) = proc.file_mut(fd) else {
            return Ok(0);
        };
        if !file.is_dir() {
            return Ok(0);
        }
        match self.fsys.readdir(file) {
            Some(name) => {
                let mut bytes = name.into_bytes();
                bytes.push(0);
                uaccess::copy_out(self, pid, Va(name_out), &bytes, esp).map_err(Flow::from)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}
