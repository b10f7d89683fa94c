//! Validated access to user memory.
//!
//! User-supplied addresses are opaque integers until they pass through this
//! module. Nothing in the kernel dereferences them any other way: the check
//! functions decide whether an access *could* succeed, and the copy helpers
//! move the bytes through the frame pool, faulting pages in on demand and
//! setting the simulated accessed/dirty bits as the MMU would.
//!
//! A pointer is acceptable when it is non-null, below the user/kernel split,
//! and each spanned page either has a supplemental entry whose writability
//! covers the access or would be granted by the stack-growth rule. Any
//! failure surfaces as [`KernelError::InvalidUserPointer`], which the
//! dispatcher turns into termination with status -1.

use crate::addr::{PAGE_SIZE, STACK_PUSH_MARGIN, Va};
use crate::mm::Vm;
use crate::mm::page::VmSpace;
use crate::{Kernel, KernelError, Tid};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

/// Longest accepted user string, including room for the terminator.
pub const STR_MAX: usize = 4095;

fn check_page(space: &VmSpace, vaddr: Va, write: bool, esp: Va) -> bool {
    if vaddr.0 == 0 || !vaddr.is_user() {
        return false;
    }
    let upage = vaddr.round_down();
    match space.slots.get(&upage) {
        Some(slot) => !write || slot.writable,
        None => upage.in_stack_region() && vaddr.0 + STACK_PUSH_MARGIN >= esp.0,
    }
}

/// Whether a single user address may be read (or written, with `write`).
pub fn check_translate_user(vm: &Vm, tid: Tid, vaddr: Va, write: bool, esp: Va) -> bool {
    let spaces = vm.registry.lock();
    spaces
        .get(&tid)
        .is_some_and(|space| check_page(space, vaddr, write, esp))
}

/// Validates every page spanned by `[vaddr, vaddr + size)`.
pub fn check_user(vm: &Vm, tid: Tid, vaddr: Va, size: usize, write: bool, esp: Va) -> bool {
    if vaddr.0 == 0 || !vaddr.is_user() {
        return false;
    }
    if size == 0 {
        return true;
    }
    let Some(end) = vaddr.0.checked_add(size - 1) else {
        return false;
    };
    if !Va(end).is_user() {
        return false;
    }
    let spaces = vm.registry.lock();
    let Some(space) = spaces.get(&tid) else {
        return false;
    };
    let mut page = vaddr.round_down().0;
    while page <= end {
        // The lowest byte actually touched within this page.
        let probe = Va(page.max(vaddr.0));
        if !check_page(space, probe, write, esp) {
            return false;
        }
        page += PAGE_SIZE;
    }
    true
}

/// Copies `len` bytes in from user memory.
pub fn copy_in(
    kernel: &Kernel,
    tid: Tid,
    vaddr: Va,
    len: usize,
    esp: Va,
) -> Result<Vec<u8>, KernelError> {
    if !check_user(&kernel.vm, tid, vaddr, len, false, esp) {
        return Err(KernelError::InvalidUserPointer);
    }
    let mut out = vec![0u8; len];
    let mut spaces = kernel.vm.registry.lock();
    let mut pos = 0;
    while pos < len {
        let va = Va(vaddr.0 + pos);
        let kpage = kernel
            .vm
            .materialize_locked(&kernel.fsys, &mut spaces, tid, va, false, esp)
            .ok_or(KernelError::InvalidUserPointer)?;
        let off = va.page_offset();
        let n = (PAGE_SIZE - off).min(len - pos);
        let bytes = kernel.vm.palloc.page(kpage);
        out[pos..pos + n].copy_from_slice(&bytes.lock()[off..off + n]);
        spaces
            .get_mut(&tid)
            .unwrap()
            .pagedir
            .mark_access(va.round_down(), false);
        pos += n;
    }
    Ok(out)
}

/// Copies `data` out to user memory.
pub fn copy_out(
    kernel: &Kernel,
    tid: Tid,
    vaddr: Va,
    data: &[u8],
    esp: Va,
) -> Result<(), KernelError> {
    if !check_user(&kernel.vm, tid, vaddr, data.len(), true, esp) {
        return Err(KernelError::InvalidUserPointer);
    }
    let mut spaces = kernel.vm.registry.lock();
    let mut pos = 0;
    while pos < data.len() {
        let va = Va(vaddr.0 + pos);
        let kpage = kernel
            .vm
            .materialize_locked(&kernel.fsys, &mut spaces, tid, va, true, esp)
            .ok_or(KernelError::InvalidUserPointer)?;
        let off = va.page_offset();
        let n = (PAGE_SIZE - off).min(data.len() - pos);
        let bytes = kernel.vm.palloc.page(kpage);
        bytes.lock()[off..off + n].copy_from_slice(&data[pos..pos + n]);
        spaces
            .get_mut(&tid)
            .unwrap()
            .pagedir
            .mark_access(va.round_down(), true);
        pos += n;
    }
    Ok(())
}

/// Reads a little-endian `u32` from user memory.
pub fn read_user_u32(kernel: &Kernel, tid: Tid, vaddr: Va, esp: Va) -> Result<u32, KernelError> {
    let bytes = copy_in(kernel, tid, vaddr, 4, esp)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// Reads a NUL-terminated user string, re-validating at every page boundary.
/// Fails if no terminator appears within [`STR_MAX`] bytes.
pub fn read_user_cstr(
    kernel: &Kernel,
    tid: Tid,
    vaddr: Va,
    esp: Va,
) -> Result<String, KernelError> {
    let mut spaces = kernel.vm.registry.lock();
    let mut collected = Vec::new();
    let mut va = vaddr;
    if va.0 == 0 {
        return Err(KernelError::InvalidUserPointer);
    }
    loop {
        if !va.is_user() {
            return Err(KernelError::InvalidUserPointer);
        }
        let kpage = kernel
            .vm
            .materialize_locked(&kernel.fsys, &mut spaces, tid, va, false, esp)
            .ok_or(KernelError::InvalidUserPointer)?;
        let off = va.page_offset();
        let bytes = kernel.vm.palloc.page(kpage);
        let guard = bytes.lock();
        let chunk = &guard[off..];
        let nul = chunk.iter().position(|&b| b == 0);
        let take = nul.unwrap_or(chunk.len());
        if collected.len() + take >= STR_MAX && nul.is_none() {
            return Err(KernelError::InvalidUserPointer);
        }
        collected.extend_from_slice(&chunk[..take.min(STR_MAX - collected.len())]);
        if collected.len() >= STR_MAX {
            return Err(KernelError::InvalidUserPointer);
        }
        drop(guard);
        spaces
            .get_mut(&tid)
            .unwrap()
            .pagedir
            .mark_access(va.round_down(), false);
        if nul.is_some() {
            return String::from_utf8(collected).map_err(|_| KernelError::InvalidUserPointer);
        }
        va = Va(va.round_down().0 + PAGE_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{PHYS_BASE, STACK_REGION_BASE};
    use crate::dev::block::MemDisk;
    use crate::fs::FileSys;
    use alloc::sync::Arc;

    fn kernel() -> (Kernel, Tid) {
        let fsys = FileSys::format(Arc::new(MemDisk::new(4096)));
        let vm = crate::mm::Vm::new(8, Arc::new(MemDisk::new(256)));
        let k = Kernel::new(fsys, vm);
        let pid = k.spawn(None);
        (k, pid)
    }

    #[test]
    fn translate_rejects_null_and_kernel_addresses() {
        let (k, pid) = kernel();
        let esp = Va(PHYS_BASE - PAGE_SIZE);
        assert!(!check_translate_user(&k.vm, pid, Va(0), false, esp));
        assert!(!check_translate_user(&k.vm, pid, Va(PHYS_BASE), false, esp));
        assert!(!check_translate_user(&k.vm, pid, Va(usize::MAX), false, esp));
    }

    #[test]
    fn translate_honors_stack_growth_rule() {
        let (k, pid) = kernel();
        let esp = Va(PHYS_BASE - 2 * PAGE_SIZE);
        // Would be granted: at esp, above esp, and 32 below.
        assert!(check_translate_user(&k.vm, pid, esp, true, esp));
        assert!(check_translate_user(&k.vm, pid, Va(esp.0 + 100), true, esp));
        assert!(check_translate_user(&k.vm, pid, Va(esp.0 - 32), true, esp));
        // Would not: 33 below esp, or outside the stack region.
        assert!(!check_translate_user(&k.vm, pid, Va(esp.0 - 33), true, esp));
        assert!(!check_translate_user(
            &k.vm,
            pid,
            Va(STACK_REGION_BASE - PAGE_SIZE),
            false,
            esp
        ));
    }

    #[test]
    fn check_user_validates_every_spanned_page() {
        let (k, pid) = kernel();
        let esp = Va(PHYS_BASE - 4 * PAGE_SIZE);
        // Populate exactly one page at esp.
        copy_out(&k, pid, esp, &[1, 2, 3], esp).unwrap();

        // Within that page: fine. Reaching into the page below esp-32: not.
        assert!(check_user(&k.vm, pid, esp, PAGE_SIZE - 64, false, esp));
        assert!(!check_user(&k.vm, pid, Va(esp.0 - PAGE_SIZE), PAGE_SIZE, false, esp));
        // A span whose tail crosses into kernel space must fail even though
        // its first page is fine.
        assert!(!check_user(
            &k.vm,
            pid,
            Va(PHYS_BASE - 8),
            16,
            true,
            Va(PHYS_BASE - 8)
        ));
        // Zero-length accesses at a plausible address are fine.
        assert!(check_user(&k.vm, pid, esp, 0, false, esp));
    }

    #[test]
    fn write_check_respects_readonly_entries() {
        let (k, pid) = kernel();
        let esp = Va(PHYS_BASE - PAGE_SIZE);
        copy_out(&k, pid, esp, &[0xaa], esp).unwrap();
        {
            let mut spaces = k.vm.registry.lock();
            let space = spaces.get_mut(&pid).unwrap();
            space.slots.get_mut(&esp.round_down()).unwrap().writable = false;
        }
        assert!(check_user(&k.vm, pid, esp, 1, false, esp));
        assert!(!check_user(&k.vm, pid, esp, 1, true, esp));
        assert!(copy_in(&k, pid, esp, 1, esp).is_ok());
        assert_eq!(
            copy_out(&k, pid, esp, &[0xbb], esp),
            Err(KernelError::InvalidUserPointer)
        );
    }

    #[test]
    fn cstr_stops_at_page_boundaries_and_caps_length() {
        let (k, pid) = kernel();
        let esp = Va(PHYS_BASE - 8 * PAGE_SIZE);
        // A string spanning a page boundary.
        let at = Va(esp.0 + PAGE_SIZE - 3);
        copy_out(&k, pid, at, b"abcdef\0", esp).unwrap();
        assert_eq!(read_user_cstr(&k, pid, at, esp).unwrap(), "abcdef");

        // 4095 bytes with no terminator in sight: refused.
        let long = alloc::vec![b'y'; STR_MAX];
        copy_out(&k, pid, Va(esp.0 + PAGE_SIZE), &long, esp).unwrap();
        assert_eq!(
            read_user_cstr(&k, pid, Va(esp.0 + PAGE_SIZE), esp),
            Err(KernelError::InvalidUserPointer)
        );
    }
}
