//! End-to-end file-system scenarios, driven through the facade.

use kegos::dev::block::{MemDisk, SECTOR_SIZE, Sector};
use kegos::fs::FileSys;
use kegos::fs::cache::{BlockCache, CACHE_SIZE};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

fn fresh_fs(sectors: u32) -> FileSys {
    FileSys::format(Arc::new(MemDisk::new(sectors)))
}

#[test]
fn sparse_write_then_reopen() {
    let fs = fresh_fs(8192);
    assert!(fs.create(None, "a", 600));
    let mut f = fs.open(None, "a").unwrap();
    assert_eq!(f.write(&fs, b"xy"), 2);
    f.seek(512);
    assert_eq!(f.write(&fs, b"Z"), 1);
    f.close(&fs);

    let mut f = fs.open(None, "a").unwrap();
    let mut buf = vec![0xffu8; 600];
    assert_eq!(f.read(&fs, &mut buf), 600);
    assert_eq!(&buf[..2], b"xy");
    assert!(buf[2..512].iter().all(|&b| b == 0));
    assert_eq!(buf[512], b'Z');
    assert!(buf[513..].iter().all(|&b| b == 0));
    assert_eq!(f.length(&fs), 600);
    f.close(&fs);
}

#[test]
fn growth_through_indirect_tiers() {
    let fs = fresh_fs(8192);
    assert!(fs.create(None, "big", 0));
    let mut f = fs.open(None, "big").unwrap();

    let chunk = vec![0xabu8; 8192];
    let total = 128 * 1024;
    for _ in 0..total / chunk.len() {
        assert_eq!(f.write(&fs, &chunk), chunk.len());
    }
    assert_eq!(f.length(&fs), total);

    let mut out = vec![0u8; 4096];
    f.seek(65536);
    assert_eq!(f.read(&fs, &mut out), 4096);
    assert!(out.iter().all(|&b| b == 0xab));
    f.close(&fs);
}

#[test]
fn random_writes_read_back() {
    use rand::Rng;
    let fs = fresh_fs(8192);
    assert!(fs.create(None, "r", 0));
    let mut f = fs.open(None, "r").unwrap();

    let mut rng = rand::thread_rng();
    let mut model = vec![0u8; 40_000];
    for _ in 0..64 {
        let off = rng.gen_range(0..model.len() - 1);
        let len = rng.gen_range(1..(model.len() - off).min(2000));
        let data: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
        assert_eq!(f.write_at(&fs, &data, off), len);
        model[off..off + len].copy_from_slice(&data);
    }

    let written = f.length(&fs);
    let mut out = vec![0u8; written];
    assert_eq!(f.read_at(&fs, &mut out, 0), written);
    assert_eq!(out[..], model[..written]);
    f.close(&fs);
}

/// The cache holds 64 sectors; a hit must not touch the device, and one
/// eviction must write back exactly one dirty slot.
#[test]
fn cache_traffic_is_minimal() {
    let disk = Arc::new(MemDisk::new(4096));
    let reads0 = Arc::new(AtomicU32::new(0));
    let writebacks = Arc::new(AtomicU32::new(0));
    let (r0, wb) = (reads0.clone(), writebacks.clone());
    disk.set_hook(Arc::new(move |sector: Sector, is_write| {
        if is_write {
            wb.fetch_add(1, Ordering::SeqCst);
        } else if sector == Sector(100) {
            r0.fetch_add(1, Ordering::SeqCst);
        }
    }));

    let cache = BlockCache::new(disk);
    // Fill all 64 slots with distinct dirty sectors (100..164).
    for i in 0..CACHE_SIZE as u32 {
        cache.write(Sector(100 + i), &[i as u8; SECTOR_SIZE]);
    }
    assert_eq!(writebacks.load(Ordering::SeqCst), 0);
    assert_eq!(reads0.load(Ordering::SeqCst), 1, "loaded once on its write miss");

    // Re-reading sector 100 hits the cache: no further device read.
    let mut out = [0u8; SECTOR_SIZE];
    cache.read(Sector(100), &mut out);
    assert_eq!(out, [0u8; SECTOR_SIZE]); // sector 100 was filled with byte 0
    assert_eq!(reads0.load(Ordering::SeqCst), 1);

    // A 65th sector forces exactly one eviction of one dirty slot.
    cache.write(Sector(500), &[0xee; SECTOR_SIZE]);
    assert_eq!(writebacks.load(Ordering::SeqCst), 1);
    // Sector 100 was recently touched, so it was not the victim.
    cache.read(Sector(100), &mut out);
    assert_eq!(reads0.load(Ordering::SeqCst), 1);
}

#[test]
fn directory_tree_lifecycle() {
    let fs = fresh_fs(8192);
    assert!(fs.mkdir(None, "d"));

    // chdir into d, create a file there.
    let cwd = fs.open_dir(None, "d").unwrap();
    assert!(fs.create(Some(&cwd), "f", 10));

    // chdir back out.
    let root = fs.open_dir(Some(&cwd), "..").unwrap();
    fs.close_inode(cwd);

    assert!(!fs.remove(Some(&root), "d"), "directory is not empty");
    assert!(fs.remove(Some(&root), "d/f"));
    assert!(fs.remove(Some(&root), "d"));
    assert!(fs.open(Some(&root), "d").is_none());
    fs.close_inode(root);
}

#[test]
fn flush_makes_raw_disk_match_cache() {
    let disk = Arc::new(MemDisk::new(4096));
    let fs = FileSys::format(disk.clone());
    assert!(fs.create(None, "t", 0));
    let mut f = fs.open(None, "t").unwrap();
    assert_eq!(f.write(&fs, &[0x3c; 1500]), 1500);

    // Read through the cache.
    let mut via_cache = vec![0u8; 1500];
    assert_eq!(f.read_at(&fs, &mut via_cache, 0), 1500);
    f.close(&fs);
    fs.close();

    // A fresh mount (fresh cache) sees the same bytes.
    let fs2 = FileSys::mount(disk);
    let mut f = fs2.open(None, "t").unwrap();
    let mut raw = vec![0u8; 1500];
    assert_eq!(f.read(&fs2, &mut raw), 1500);
    assert_eq!(via_cache, raw);
    f.close(&fs2);
}
