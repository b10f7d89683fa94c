//! The block device interface.
//!
//! The real driver lives outside this crate; the kernel consumes it through
//! [`BlockDevice`], a blocking, infallible interface over fixed 512-byte
//! sectors. A device-level I/O error is unrecoverable at this layer and
//! surfaces as a panic inside the driver.
//!
//! [`MemDisk`] is the in-memory implementation used by the host test harness,
//! for both the file-system device and the swap device. Its [`Hook`] lets a
//! test observe every transfer that actually reaches the "hardware", which is
//! how cache-transparency properties are checked.

use crate::sync::SpinLock;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

/// Size of a disk sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Index of a sector on a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sector(pub u32);

impl core::ops::Add<u32> for Sector {
    type Output = Sector;
    fn add(self, rhs: u32) -> Sector {
        Sector(self.0 + rhs)
    }
}

/// A device of fixed-size sectors.
pub trait BlockDevice: Send + Sync {
    /// Reads one sector into `buf`. Blocks until complete.
    fn read(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]);

    /// Writes one sector from `buf`. Blocks until complete.
    fn write(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]);

    /// Number of sectors on the device.
    fn sector_count(&self) -> u32;
}

/// Observer for transfers reaching a [`MemDisk`]; `write` is true for writes.
pub type Hook = Arc<dyn Fn(Sector, bool) + Send + Sync>;

/// A RAM-backed block device.
pub struct MemDisk {
    sectors: SpinLock<Vec<[u8; SECTOR_SIZE]>>,
    hook: SpinLock<Option<Hook>>,
}

impl MemDisk {
    /// Creates a zero-filled device of `count` sectors.
    pub fn new(count: u32) -> Self {
        MemDisk {
            sectors: SpinLock::new(vec![[0; SECTOR_SIZE]; count as usize]),
            hook: SpinLock::new(None),
        }
    }

    /// Installs a transfer observer.
    pub fn set_hook(&self, hook: Hook) {
        *self.hook.lock() = Some(hook);
    }

    fn observe(&self, sector: Sector, write: bool) {
        let guard = self.hook.lock();
        if let Some(hook) = guard.as_ref() {
            hook(sector, write);
        }
    }
}

impl BlockDevice for MemDisk {
    fn read(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]) {
        self.observe(sector, false);
        let sectors = self.sectors.lock();
        *buf = sectors[sector.0 as usize];
    }

    fn write(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]) {
        self.observe(sector, true);
        let mut sectors = self.sectors.lock();
        sectors[sector.0 as usize] = *buf;
    }

    fn sector_count(&self) -> u32 {
        self.sectors.lock().len() as u32
    }
}
