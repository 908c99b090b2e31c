use core::ptr;

use log::{error, info};

use crate::kalloc::{kalloc, kalloc_zeroed, kfree};
use crate::page_table::{MapFlags, PageTable};
use crate::param::{
    align_down, CLINT, CLINT_MAP_SIZE, HEAP_USER_BASE, KERNBASE, PAGESIZE, PHYSTOP, PLIC,
    PLIC_MAP_SIZE, UART0, UART0_MAP_SIZE, VIRTIO0, VIRTIO_MMIO_END,
};
use crate::register::satp;

/// The single kernel root page table, shared by every process. User
/// heap regions are the only per-process mappings and are disjoint by
/// construction (keyed on pid).
static mut KERNEL_PAGE_TABLE: *mut PageTable = ptr::null_mut();

fn kernel_pd() -> &'static mut PageTable {
    unsafe {
        KERNEL_PAGE_TABLE
            .as_mut()
            .expect("vm: not initialized")
    }
}

/// Build the kernel address space: identity mappings for RAM and the
/// MMIO regions the kernel touches.
pub fn init() {
    unsafe {
        if !KERNEL_PAGE_TABLE.is_null() {
            return;
        }
        KERNEL_PAGE_TABLE = PageTable::alloc().expect("vm: no frame for root page table");
    }
    info!(
        "vm: Sv39 root page table at {:#x}",
        unsafe { KERNEL_PAGE_TABLE } as usize
    );

    self_test();

    // All of RAM is user-accessible: processes share the kernel's
    // identity-mapped space in this single-privilege model.
    map_identity_range(KERNBASE, PHYSTOP, MapFlags::RW | MapFlags::USER);

    // uart registers
    map_identity_range(UART0, UART0 + UART0_MAP_SIZE, MapFlags::RW);

    // virtio mmio window
    map_identity_range(VIRTIO0, VIRTIO_MMIO_END, MapFlags::RW);

    // CLINT
    map_identity_range(CLINT, CLINT + CLINT_MAP_SIZE, MapFlags::RW);

    // PLIC
    map_identity_range(PLIC, PLIC + PLIC_MAP_SIZE, MapFlags::RW);
}

/// Point satp at the root table (MODE=8, ASID=0) and flush the TLB.
pub fn activate() {
    let satp_val = kernel_pd().as_satp();
    satp::write(satp_val);
    info!("vm: satp={:#x}", satp_val);
}

/// Map one page; both addresses must be 4 KiB-aligned.
pub fn map(va: usize, pa: usize, flags: MapFlags) -> Result<(), &'static str> {
    kernel_pd().map(va, pa, flags)
}

/// Allocate a fresh zeroed frame and map it at `va`. The frame goes back
/// to the pool if the mapping fails.
pub fn map_page(va: usize, flags: MapFlags) -> Result<(), &'static str> {
    let pa = kalloc_zeroed();
    if pa.is_null() {
        return Err("map_page: out of frames");
    }
    if let Err(msg) = kernel_pd().map(va, pa as usize, flags) {
        kfree(pa);
        return Err(msg);
    }
    Ok(())
}

/// Drop the mapping for `va`; with `free_phys` the backing frame returns
/// to the pool. Empty intermediate tables are left in place.
pub fn unmap(va: usize, free_phys: bool) -> Result<(), &'static str> {
    kernel_pd().unmap(va, free_phys)
}

/// Software translation; `None` if `va` has no valid leaf.
pub fn translate(va: usize) -> Option<usize> {
    kernel_pd().translate(va)
}

fn map_identity_range(start: usize, end: usize, flags: MapFlags) {
    if end <= start {
        return;
    }
    let mut va = align_down(start, PAGESIZE);
    while va < end {
        if let Err(msg) = map(va, va, flags) {
            panic!("vm: identity map {:#x}: {}", va, msg);
        }
        va += PAGESIZE;
    }
}

/// Exercise map/translate/unmap against a fresh frame before any real
/// mappings exist. Runs once from `init`.
fn self_test() {
    let test_va = HEAP_USER_BASE;

    let pa = kalloc();
    if pa.is_null() {
        error!("vm self-test: out of frames, skipped");
        return;
    }

    if let Err(msg) = map(test_va, pa as usize, MapFlags::RW | MapFlags::USER) {
        error!("vm self-test: map failed: {}", msg);
        kfree(pa);
        return;
    }

    expect(
        translate(test_va) == Some(pa as usize),
        "translate returns the mapped frame",
    );

    expect(unmap(test_va, true).is_ok(), "unmap succeeds");
    expect(translate(test_va).is_none(), "translate fails after unmap");
}

fn expect(cond: bool, msg: &str) {
    if cond {
        info!("vm self-test: ok: {}", msg);
    } else {
        error!("vm self-test: FAILED: {}", msg);
    }
}

pub mod tests {
    use super::*;

    pub fn tests() -> &'static [(&'static str, fn())] {
        &[
            ("map_translate_offset", map_translate_offset),
            ("unmap_returns_frame", unmap_returns_frame),
            ("misaligned_map_fails", misaligned_map_fails),
        ]
    }

    // a VA outside RAM and every MMIO window, so no identity mapping is
    // disturbed
    fn scratch_va() -> usize {
        0x9000_0000
    }

    fn map_translate_offset() {
        let va = scratch_va();
        let pa = kalloc();
        assert!(!pa.is_null());
        map(va, pa as usize, MapFlags::RW).unwrap();
        assert_eq!(translate(va), Some(pa as usize));
        assert_eq!(translate(va + 0x123), Some(pa as usize + 0x123));
        unmap(va, true).unwrap();
    }

    fn unmap_returns_frame() {
        crate::cpu::push_off();
        let va = scratch_va();
        let pa = kalloc();
        assert!(!pa.is_null());
        map(va, pa as usize, MapFlags::RW | MapFlags::USER).unwrap();
        unmap(va, true).unwrap();
        assert!(translate(va).is_none());
        // the freed frame is at the head of the free list again
        let again = kalloc();
        assert_eq!(again, pa);
        kfree(again);
        crate::cpu::pop_off();
    }

    fn misaligned_map_fails() {
        let pa = kalloc();
        assert!(!pa.is_null());
        assert!(map(scratch_va() + 1, pa as usize, MapFlags::RW).is_err());
        assert!(map(scratch_va(), pa as usize + 1, MapFlags::RW).is_err());
        kfree(pa);
    }
}
