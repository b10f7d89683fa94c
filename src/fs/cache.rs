//! Write-back cache of disk sectors.
//!
//! A fixed array of [`CACHE_SIZE`] slots sits between the file system and the
//! block device. Reads and writes transfer exactly one sector; dirty slots
//! are written back when evicted and when the cache is closed.
//!
//! Victim selection is an aging LRU: every lookup ages every slot by one, a
//! touched slot drops back to zero, and the victim is the slot with the
//! highest age (an empty slot, if one exists, is always preferred). This is
//! equivalent to keeping the slots sorted most-recent-first and evicting the
//! tail.
//!
//! Invariants, all protected by the single cache lock:
//! - a sector appears in at most one occupied slot;
//! - an occupied dirty slot is newer than its on-disk sector until flushed;
//! - an empty slot has no identity at all.

use crate::dev::block::{BlockDevice, SECTOR_SIZE, Sector};
use crate::sync::SpinLock;
use alloc::boxed::Box;
use alloc::sync::Arc;
use zerocopy::{AsBytes, FromBytes};

/// Number of slots in the cache.
pub const CACHE_SIZE: usize = 64;

struct Slot {
    sector: Sector,
    buf: [u8; SECTOR_SIZE],
    valid: bool,
    dirty: bool,
    age: u32,
}

impl Slot {
    const fn empty() -> Slot {
        Slot {
            sector: Sector(0),
            buf: [0; SECTOR_SIZE],
            valid: false,
            dirty: false,
            age: 0,
        }
    }
}

/// The sector cache for one block device.
pub struct BlockCache {
    dev: Arc<dyn BlockDevice>,
    slots: SpinLock<Box<[Slot; CACHE_SIZE]>>,
}

impl BlockCache {
    /// Creates an empty cache in front of `dev`.
    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        BlockCache {
            dev,
            slots: SpinLock::new(Box::new([const { Slot::empty() }; CACHE_SIZE])),
        }
    }

    /// Ages every slot and returns the index holding `sector`, if cached.
    fn lookup(slots: &mut [Slot; CACHE_SIZE], sector: Sector) -> Option<usize> {
        let mut found = None;
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.age = slot.age.saturating_add(1);
            if slot.valid && slot.sector == sector {
                found = Some(i);
            }
        }
        found
    }

    /// Picks a victim slot, writing it back first if dirty.
    fn evict(&self, slots: &mut [Slot; CACHE_SIZE]) -> usize {
        let victim = match slots.iter().position(|s| !s.valid) {
            Some(i) => i,
            None => {
                let mut oldest = 0;
                for i in 1..CACHE_SIZE {
                    if slots[i].age > slots[oldest].age {
                        oldest = i;
                    }
                }
                oldest
            }
        };
        let slot = &mut slots[victim];
        if slot.valid && slot.dirty {
            self.dev.write(slot.sector, &slot.buf);
            slot.dirty = false;
        }
        slot.valid = false;
        victim
    }

    /// Finds or loads the slot for `sector` and marks it most recent.
    fn slot_for(&self, slots: &mut [Slot; CACHE_SIZE], sector: Sector) -> usize {
        let idx = match Self::lookup(slots, sector) {
            Some(i) => i,
            None => {
                let i = self.evict(slots);
                let slot = &mut slots[i];
                slot.sector = sector;
                slot.valid = true;
                slot.dirty = false;
                self.dev.read(sector, &mut slot.buf);
                i
            }
        };
        slots[idx].age = 0;
        idx
    }

    /// Reads one sector through the cache.
    pub fn read(&self, sector: Sector, out: &mut [u8; SECTOR_SIZE]) {
        let mut slots = self.slots.lock();
        let idx = self.slot_for(&mut slots, sector);
        *out = slots[idx].buf;
    }

    /// Writes one sector through the cache.
    ///
    /// A write miss loads the sector first so that a later partial-sector
    /// update cannot clobber bytes it did not touch.
    pub fn write(&self, sector: Sector, data: &[u8; SECTOR_SIZE]) {
        let mut slots = self.slots.lock();
        let idx = self.slot_for(&mut slots, sector);
        let slot = &mut slots[idx];
        slot.buf = *data;
        slot.dirty = true;
    }

    /// Reads one sector into a sector-sized plain-data value.
    pub fn read_obj<T: AsBytes + FromBytes>(&self, sector: Sector, obj: &mut T) {
        let buf: &mut [u8; SECTOR_SIZE] = obj
            .as_bytes_mut()
            .try_into()
            .expect("object must be exactly one sector");
        self.read(sector, buf);
    }

    /// Writes a sector-sized plain-data value to one sector.
    pub fn write_obj<T: AsBytes>(&self, sector: Sector, obj: &T) {
        let buf: &[u8; SECTOR_SIZE] = obj
            .as_bytes()
            .try_into()
            .expect("object must be exactly one sector");
        self.write(sector, buf);
    }

    /// Writes back every dirty slot. All prior writes are on disk once this
    /// returns.
    pub fn close(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.valid && slot.dirty {
                self.dev.write(slot.sector, &slot.buf);
                slot.dirty = false;
            }
        }
    }

    /// The device behind the cache.
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.dev
    }

    #[cfg(test)]
    fn occupied_sectors(&self) -> alloc::vec::Vec<Sector> {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.valid)
            .map(|s| s.sector)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::block::MemDisk;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicU32, Ordering};

    fn counting_disk(count: u32) -> (Arc<MemDisk>, Arc<AtomicU32>, Arc<AtomicU32>) {
        let disk = Arc::new(MemDisk::new(count));
        let reads = Arc::new(AtomicU32::new(0));
        let writes = Arc::new(AtomicU32::new(0));
        let (r, w) = (reads.clone(), writes.clone());
        disk.set_hook(Arc::new(move |_, is_write| {
            if is_write {
                w.fetch_add(1, Ordering::SeqCst);
            } else {
                r.fetch_add(1, Ordering::SeqCst);
            }
        }));
        (disk, reads, writes)
    }

    fn sector_of(byte: u8) -> [u8; SECTOR_SIZE] {
        [byte; SECTOR_SIZE]
    }

    #[test]
    fn read_after_write_hits_cache() {
        let (disk, reads, writes) = counting_disk(128);
        let cache = BlockCache::new(disk);
        cache.write(Sector(5), &sector_of(0x11));
        let mut out = [0u8; SECTOR_SIZE];
        cache.read(Sector(5), &mut out);
        assert_eq!(out, sector_of(0x11));
        // One load for the write miss, nothing written back yet.
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn occupied_slots_hold_distinct_sectors() {
        let (disk, ..) = counting_disk(256);
        let cache = BlockCache::new(disk);
        for i in 0..200u32 {
            cache.write(Sector(i % 80), &sector_of(i as u8));
        }
        let mut sectors = cache.occupied_sectors();
        let total = sectors.len();
        sectors.sort();
        sectors.dedup();
        assert_eq!(sectors.len(), total);
        assert_eq!(total, CACHE_SIZE);
    }

    #[test]
    fn eviction_writes_back_and_preserves_data() {
        let (disk, _, writes) = counting_disk(256);
        let cache = BlockCache::new(disk.clone());
        for i in 0..CACHE_SIZE as u32 + 8 {
            cache.write(Sector(i), &sector_of(i as u8));
        }
        assert_eq!(writes.load(Ordering::SeqCst), 8);
        // Evicted sectors come back with their contents intact.
        let mut out = [0u8; SECTOR_SIZE];
        cache.read(Sector(0), &mut out);
        assert_eq!(out, sector_of(0));
    }

    #[test]
    fn close_flushes_everything_once() {
        let (disk, _, writes) = counting_disk(128);
        let cache = BlockCache::new(disk.clone());
        for i in 0..10u32 {
            cache.write(Sector(i), &sector_of(i as u8));
        }
        cache.close();
        assert_eq!(writes.load(Ordering::SeqCst), 10);
        cache.close();
        assert_eq!(writes.load(Ordering::SeqCst), 10, "clean slots flush nothing");

        // Cache transparency: a fresh read straight from the device sees the
        // same bytes as a read through the cache.
        let mut raw = [0u8; SECTOR_SIZE];
        disk.read(Sector(7), &mut raw);
        assert_eq!(raw, sector_of(7));
    }

    #[test]
    fn aging_evicts_least_recently_used() {
        let (disk, reads, _) = counting_disk(256);
        let cache = BlockCache::new(disk);
        for i in 0..CACHE_SIZE as u32 {
            cache.write(Sector(i), &sector_of(i as u8));
        }
        // Touch sector 0 so sector 1 becomes the oldest.
        let mut out = [0u8; SECTOR_SIZE];
        cache.read(Sector(0), &mut out);
        let before = reads.load(Ordering::SeqCst);
        cache.write(Sector(100), &sector_of(0xff));
        // Sector 0 must still be resident; re-reading it costs no device I/O.
        cache.read(Sector(0), &mut out);
        assert_eq!(reads.load(Ordering::SeqCst), before + 1); // only sector 100
        cache.read(Sector(1), &mut out);
        assert_eq!(reads.load(Ordering::SeqCst), before + 2); // sector 1 was evicted
    }
}
