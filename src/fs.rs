//! A flat program catalog standing in for a filesystem: exec resolves a
//! name to the entry point of a statically linked program. The virtio
//! disk backs it with a signature sector so the block path is exercised
//! on every boot.

use alloc::vec::Vec;

use log::{info, warn};

use crate::param::NAMELEN;
use crate::spinlock::SpinLock;
use crate::user;
use crate::virtio::{self, SECTOR_SIZE};

const MAGIC: &[u8; 8] = b"osmfs 1\0";
const SUPER_SECTOR: u64 = 0;
#[cfg(feature = "fs-debug")]
const SCRATCH_SECTOR: u64 = 1;

struct Program {
    name: [u8; NAMELEN],
    entry: usize,
}

static CATALOG: SpinLock<Vec<Program>> = SpinLock::new(Vec::new());

pub fn init() {
    for &(name, entry) in user::progs::BUILTINS {
        register(name.as_bytes(), entry as usize);
    }
    info!("fs: {} programs registered", CATALOG.lock().len());

    check_disk();
}

/// Read the signature sector; stamp the disk on first boot.
fn check_disk() {
    let mut sector = [0u8; SECTOR_SIZE];
    virtio::read_sector(SUPER_SECTOR, &mut sector);

    if &sector[..MAGIC.len()] == MAGIC {
        info!("fs: disk signature found");
    } else {
        warn!("fs: blank disk, writing signature");
        sector[..MAGIC.len()].copy_from_slice(MAGIC);
        virtio::write_sector(SUPER_SECTOR, &sector);
    }

    #[cfg(feature = "fs-debug")]
    scratch_self_test();
}

#[cfg(feature = "fs-debug")]
fn scratch_self_test() {
    let mut wbuf = [0u8; SECTOR_SIZE];
    for (i, b) in wbuf.iter_mut().enumerate() {
        *b = i as u8;
    }
    virtio::write_sector(SCRATCH_SECTOR, &wbuf);

    let mut rbuf = [0u8; SECTOR_SIZE];
    virtio::read_sector(SCRATCH_SECTOR, &mut rbuf);
    if wbuf == rbuf {
        log::debug!("fs: scratch sector round-trip ok");
    } else {
        log::error!("fs: scratch sector round-trip FAILED");
    }
}

pub fn register(name: &[u8], entry: usize) {
    let mut fixed = [0u8; NAMELEN];
    let n = name.len().min(NAMELEN - 1);
    fixed[..n].copy_from_slice(&name[..n]);
    CATALOG.lock().push(Program { name: fixed, entry });
}

/// Resolve a program name to its entry point.
pub fn lookup(name: &[u8]) -> Option<usize> {
    if name.is_empty() || name.len() >= NAMELEN {
        return None;
    }
    let catalog = CATALOG.lock();
    for p in catalog.iter() {
        let len = p.name.iter().position(|&c| c == 0).unwrap_or(0);
        if &p.name[..len] == name {
            return Some(p.entry);
        }
    }
    None
}
